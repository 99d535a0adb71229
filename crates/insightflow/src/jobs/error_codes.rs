#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    FetchUnavailable,
    RateLimit,
    Timeout,
    Rejected,
    MalformedContent,
    Store,
    Orphaned,
    Stale,
    Unknown,
}

impl ErrorCode {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "FETCH_UNAVAILABLE" => Self::FetchUnavailable,
            "RATE_LIMIT" => Self::RateLimit,
            "TIMEOUT" => Self::Timeout,
            "REJECTED" => Self::Rejected,
            "MALFORMED_CONTENT" => Self::MalformedContent,
            "STORE" => Self::Store,
            "ORPHANED" => Self::Orphaned,
            "STALE" => Self::Stale,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchUnavailable => "FETCH_UNAVAILABLE",
            Self::RateLimit => "RATE_LIMIT",
            Self::Timeout => "TIMEOUT",
            Self::Rejected => "REJECTED",
            Self::MalformedContent => "MALFORMED_CONTENT",
            Self::Store => "STORE",
            Self::Orphaned => "ORPHANED",
            Self::Stale => "STALE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn suggested_action(code: &str) -> &'static str {
    match ErrorCode::from_str(code) {
        ErrorCode::FetchUnavailable => {
            "Retry is OK. Check the extractor command is installed and its sources are reachable."
        }
        ErrorCode::RateLimit => {
            "Back off. Lower WORKERS or raise RETRY_BASE_SECONDS so fewer fetches hit the source at once."
        }
        ErrorCode::Timeout => {
            "Raise FETCH_TIMEOUT_SECS or narrow the recency window. Check extractor latency."
        }
        ErrorCode::Rejected => {
            "Non-retryable. The source refused this topic; consider blocking it in the validator."
        }
        ErrorCode::MalformedContent => {
            "Inspect extractor output for this topic. The next attempt re-fetches fresh data."
        }
        ErrorCode::Store => {
            "Check disk space and database file permissions. Retry is OK once the store is writable."
        }
        ErrorCode::Orphaned => {
            "Worker exited mid-run. Check the worker's logs around started_at for a crash or kill."
        }
        ErrorCode::Stale => {
            "Run exceeded STALE_AFTER_SECS. Raise it or lower FETCH_TIMEOUT_SECS so the fetch fails first."
        }
        ErrorCode::Unknown => {
            "Inspect error_message and worker logs. Add a code mapping once understood."
        }
    }
}
