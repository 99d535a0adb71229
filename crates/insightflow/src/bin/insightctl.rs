use insightflow::config::Config;
use insightflow::db;
use insightflow::jobs::timeline::build_timeline;
use insightflow::jobs::{AttemptsRepo, ExtractionQueue, JobRef, MetricsRepo, Requester};
use insightflow::scheduler::{DailyRefresh, RefreshConfig};
use insightflow::similarity::LexicalSimilarity;
use insightflow::topics::TopicValidator;
use serde::Serialize;
use std::env;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const USAGE: &str = "insightctl <command>\n\
Commands:\n\
- follow <topic> [requester]\n\
- status <job_id|topic>\n\
- health\n\
- timeline <job_id>\n\
- refresh [--dry-run] [--limit N] [--min-followers N]\n\
- recover            (mark running jobs as orphaned; only when no worker is up)\n\
\n\
Uses INSIGHTFLOW_DATABASE_URL or DATABASE_URL (default sqlite://insightflow.db).\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,insightflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprint!("{USAGE}");
        std::process::exit(2);
    }

    let cfg = Config::from_env()?;
    let pool = db::make_pool(&cfg.database_url).await?;
    db::run_migrations(&pool).await?;

    let validator = TopicValidator::new(cfg.validator.clone(), Arc::new(LexicalSimilarity::new()));
    let queue = Arc::new(ExtractionQueue::open(pool.clone(), cfg.queue.clone(), validator).await?);

    match args[1].as_str() {
        "follow" => {
            let Some(topic) = args.get(2) else {
                usage_error("usage: insightctl follow <topic> [requester]");
            };
            let requester = Requester::user(args.get(3).map(String::as_str).unwrap_or("operator"))?;
            let receipt = queue.follow(topic, &requester).await?;
            print_json(&receipt)?;
        }
        "status" => {
            let Some(lookup) = args.get(2) else {
                usage_error("usage: insightctl status <job_id|topic>");
            };
            let snapshot = queue.status(&JobRef::parse(lookup)).await?;
            print_json(&snapshot)?;
        }
        "health" => {
            #[derive(Serialize)]
            struct Health {
                queue: insightflow::jobs::QueueHealth,
                metrics: insightflow::jobs::Metrics,
            }
            let health = Health {
                queue: queue.health().await,
                metrics: MetricsRepo::new(pool.clone()).snapshot().await?,
            };
            print_json(&health)?;
        }
        "timeline" => {
            let Some(id) = args.get(2) else {
                usage_error("usage: insightctl timeline <job_id>");
            };
            let job_id: Uuid = id.parse()?;
            let attempts = AttemptsRepo::new(pool.clone());
            match build_timeline(queue.jobs(), &attempts, job_id).await? {
                Some(t) => print_json(&t)?,
                None => {
                    eprintln!("no job {job_id}");
                    std::process::exit(1);
                }
            }
        }
        "refresh" => {
            let (dry_run, refresh_cfg) = parse_refresh_flags(&args[2..], cfg.refresh.clone())?;
            let report = DailyRefresh::new(Arc::clone(&queue), refresh_cfg)
                .run(dry_run)
                .await?;
            print_json(&report)?;
        }
        "recover" => {
            let n = queue.recover_orphans().await?;
            println!("recovered {n} orphaned jobs");
        }
        other => {
            eprintln!("Unknown command: {other}\n");
            eprint!("{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

fn parse_refresh_flags(
    flags: &[String],
    mut cfg: RefreshConfig,
) -> anyhow::Result<(bool, RefreshConfig)> {
    let mut dry_run = false;
    let mut it = flags.iter();
    while let Some(flag) = it.next() {
        match flag.as_str() {
            "--dry-run" => dry_run = true,
            "--limit" => {
                let v = it
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--limit needs a value"))?;
                cfg.limit = v.parse()?;
            }
            "--min-followers" => {
                let v = it
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--min-followers needs a value"))?;
                cfg.min_followers = v.parse()?;
            }
            other => anyhow::bail!("unknown refresh flag: {other}"),
        }
    }
    Ok((dry_run, cfg))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn usage_error(msg: &str) -> ! {
    eprintln!("{msg}");
    std::process::exit(2);
}
