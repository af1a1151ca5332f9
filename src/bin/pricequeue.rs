//! pricequeue CLI: seed, run and inspect the quote queue.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use pricequeue::checkpoint::CheckpointWriter;
use pricequeue::config::{Config, Settings};
use pricequeue::db::Db;
use pricequeue::engine::{Coordinator, Executor, RequestTemplate};
use pricequeue::http::ReqwestTransport;
use pricequeue::model::State;
use pricequeue::proxy::{ProxyRotator, source_from_settings};
use pricequeue::seed::{self, DEFAULT_KEY_COLUMN};
use pricequeue::store::QueueStore;
use pricequeue::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "pricequeue", about = "Resumable storage price scraper")]
struct Cli {
    /// Settings file; missing means built-in defaults
    #[arg(long, global = true, default_value = "pricequeue.toml")]
    settings: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Seed keys from a CSV file
    Seed {
        file: PathBuf,
        /// Column holding the keys
        #[arg(long, default_value = DEFAULT_KEY_COLUMN)]
        column: String,
    },
    /// Drain the queue until empty or Ctrl-C
    Run,
    /// Item counts per state
    Status,
    /// Show one item and its stored result
    Show { key: String },
    /// Move stalled in_progress items back to pending
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let settings = Settings::load_or_default(&cli.settings)?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "pricequeue".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    let db = Db::connect(config.database_url.expose_secret())
        .await?
        .with_stall_after(settings.store.stall_after());
    db.migrate().await?;

    match cli.command {
        Command::Seed { file, column } => cmd_seed(&db, &file, &column).await,
        Command::Run => cmd_run(db, settings).await,
        Command::Status => cmd_status(&db).await,
        Command::Show { key } => cmd_show(&db, &key).await,
        Command::Reset => {
            let reset = db.reset_stalled().await?;
            println!("Reset {reset} item(s) to pending");
            Ok(())
        }
    }
}

async fn cmd_seed(db: &Db, file: &Path, column: &str) -> anyhow::Result<()> {
    let keys = seed::read_keys(file, column)?;
    if keys.is_empty() {
        anyhow::bail!("no keys found in {} column '{column}'", file.display());
    }
    let report = db.seed(&keys).await?;
    println!(
        "Seeded {} new item(s), {} already present",
        report.inserted, report.skipped
    );
    Ok(())
}

async fn cmd_run(db: Db, settings: Settings) -> anyhow::Result<()> {
    let store: Arc<dyn QueueStore> = Arc::new(db);
    let cancel = CancellationToken::new();

    let mut proxies = ProxyRotator::default();
    if let Some(source) = source_from_settings(&settings.proxies) {
        proxies.load(source.as_ref()).await;
    }

    let transport = ReqwestTransport::new(
        settings.target.warmup_url.clone(),
        Duration::from_secs(settings.target.warmup_timeout_secs),
    );
    let executor = Executor::new(
        Arc::clone(&store),
        Box::new(transport),
        RequestTemplate::new(settings.target.clone()),
        settings.timing.clone(),
    )
    .with_proxies(proxies);

    let mut coordinator = Coordinator::new(
        store,
        executor,
        CheckpointWriter::from_settings(&settings.export),
        settings.store.clone(),
        cancel.clone(),
    );

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if watch_interrupts(tokio::signal::ctrl_c, interrupt).await {
            eprintln!("Forced exit");
            std::process::exit(130);
        }
    });

    let report = coordinator.run().await?;
    println!(
        "{}: {} processed, {} successful, {} failed ({:.1}% success)",
        if report.cancelled { "Cancelled" } else { "Completed" },
        report.counters.processed,
        report.counters.successful,
        report.counters.failed,
        report.counters.success_rate()
    );
    for path in &report.checkpoints {
        println!("Checkpoint: {}", path.display());
    }
    Ok(())
}

/// First press cancels the run gracefully. Returns `true` on a second
/// press, `false` if the signal cannot be watched.
async fn watch_interrupts<F, Fut>(mut press: F, cancel: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if press().await.is_err() {
        return false;
    }
    eprintln!("Interrupted: finishing the current item (Ctrl-C again to quit now)");
    cancel.cancel();
    press().await.is_ok()
}

async fn cmd_status(db: &Db) -> anyhow::Result<()> {
    let counts = db.state_counts().await?;
    println!("{:<12}  COUNT", "STATE");
    println!("{}", "-".repeat(20));
    for state in State::ALL {
        println!("{:<12}  {}", state, counts.get(state));
    }
    println!("{:<12}  {}", "total", counts.total());
    Ok(())
}

async fn cmd_show(db: &Db, key: &str) -> anyhow::Result<()> {
    let item = db.get(key).await?;

    println!("ID:         {}", item.id.0);
    println!("Key:        {}", item.key);
    println!("State:      {}", item.state);
    println!("Attempts:   {}", item.attempts);
    println!("Created:    {}", item.created_at);
    println!("Updated:    {}", item.updated_at);
    if let Some(claimed) = item.claimed_at {
        println!("Claimed:    {claimed}");
    }
    if let Some(resolved) = item.resolved_at {
        println!("Resolved:   {resolved}");
    }
    if let Some(ref result) = item.result {
        println!("---");
        println!(
            "Price:      {}",
            result
                .extracted_value
                .map(|v| format!("{v:.2}"))
                .unwrap_or("-".to_string())
        );
        println!("Observed:   {}", result.observed_at);
        println!("Identity:   {} <{}> {}", result.identity.name, result.identity.email, result.identity.phone);
        println!("Payload:    {}", serde_json::to_string_pretty(&result.raw_payload)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn second_interrupt_forces_exit() {
        let presses = AtomicUsize::new(0);
        let cancel = CancellationToken::new();
        let forced = watch_interrupts(
            || {
                presses.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
            cancel.clone(),
        )
        .await;

        assert!(forced);
        assert!(cancel.is_cancelled());
        assert_eq!(presses.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unwatchable_signal_never_cancels() {
        let cancel = CancellationToken::new();
        let forced = watch_interrupts(
            || async { Err(std::io::Error::other("no signal handler")) },
            cancel.clone(),
        )
        .await;

        assert!(!forced);
        assert!(!cancel.is_cancelled());
    }
}
