use async_trait::async_trait;
use insightflow::pipeline::{ContentFetcher, ContentItem, FetchError, RecencyWindow};
use std::process::Stdio;
use tokio::process::Command;

/// sysexits EX_DATAERR: the source refused the topic outright.
const EXIT_REJECTED: i32 = 65;
/// sysexits EX_TEMPFAIL: rate limited, try again later.
const EXIT_TEMPFAIL: i32 = 75;

/// Runs `<program> [args..] <topic> <window_days>` and reads a JSON array of
/// content items from its stdout. The pipeline bounds the call with its own
/// timeout; the child is killed if that future is dropped.
#[derive(Clone, Debug)]
pub struct CommandFetcher {
    program: String,
    args: Vec<String>,
}

impl CommandFetcher {
    /// `cmdline` is split on whitespace: program first, then fixed arguments.
    pub fn from_cmdline(cmdline: &str) -> anyhow::Result<Self> {
        let mut parts = cmdline.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("EXTRACTOR_CMD is empty"))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl ContentFetcher for CommandFetcher {
    async fn fetch(
        &self,
        topic: &str,
        window: RecencyWindow,
    ) -> Result<Vec<ContentItem>, FetchError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(topic)
            .arg(window.days.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FetchError::Unavailable(format!("spawn {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = format!("{} exited with {}: {}", self.program, output.status, stderr.trim());
            return Err(match output.status.code() {
                Some(EXIT_REJECTED) => FetchError::Rejected(detail),
                Some(EXIT_TEMPFAIL) => FetchError::RateLimited(detail),
                _ => FetchError::Unavailable(detail),
            });
        }

        serde_json::from_slice::<Vec<ContentItem>>(&output.stdout)
            .map_err(|e| FetchError::Malformed(format!("stdout is not a content item array: {e}")))
    }
}
