use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use vinted_watch::agent::{Pacing, PollingAgent};
use vinted_watch::auth::CredentialCache;
use vinted_watch::backoff::GlobalBackoff;
use vinted_watch::breaker::{BreakerConfig, CircuitBreaker};
use vinted_watch::config::{AppConfig, CONFIG_PATH, CONFIG_PATH_ENV};
use vinted_watch::fetcher::ResilientFetcher;
use vinted_watch::headers::HeaderPool;
use vinted_watch::ledger::DedupLedger;
use vinted_watch::registry::WatcherRegistry;
use vinted_watch::reporter;
use vinted_watch::transport::HttpTransport;

#[derive(Parser)]
#[command(name = "vinted-watch", about = "Poll Vinted catalogs and report new listings")]
struct Args {
    /// Path to config.toml (falls back to $VINTED_WATCH_CONFIG, then ./config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config_path = args
        .config
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(CONFIG_PATH));
    let config = AppConfig::load_or_default(&config_path)?;
    info!("Loaded config from {}", config_path.display());

    let upstream = &config.upstream;
    let headers = HeaderPool::from_file(&config.storage.headers_path);
    let transport = Arc::new(
        HttpTransport::new(Duration::from_secs(upstream.request_timeout_secs))
            .context("failed to build HTTP client")?,
    );
    let backoff = Arc::new(GlobalBackoff::new(Duration::from_secs(upstream.backoff_cap_secs)));
    let credentials = CredentialCache::new(transport.clone(), headers.clone(), backoff)
        .with_ttl(Duration::from_secs(upstream.credential_ttl_secs))
        .with_max_retries(upstream.credential_max_retries);
    let breaker = CircuitBreaker::new("catalog", BreakerConfig::from(&config.breaker));
    let fetcher = ResilientFetcher::new(
        transport,
        Arc::new(credentials),
        headers,
        Arc::new(breaker),
    )
    .with_timeout(Duration::from_secs(upstream.request_timeout_secs));

    let (tx, rx) = mpsc::channel(config.polling.queue_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let agent = PollingAgent::new(
        WatcherRegistry::new(&config.storage.watchers_path),
        DedupLedger::new(&config.storage.items_path),
        Arc::new(fetcher),
        tx,
        shutdown_rx,
    )
    .with_pacing(Pacing::from(&config.polling));

    let consumer = tokio::spawn(reporter::consume(rx));
    let mut poller = tokio::spawn(agent.run());

    info!("Watching. Press Ctrl+C to stop.");
    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        result = &mut poller => Some(result),
    };
    let outcome = match finished {
        Some(result) => result,
        None => {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
            poller.await
        }
    };

    let reported = consumer.await.context("reporter task panicked")?;
    info!("Reported {reported} listing(s) this session");

    match outcome.context("polling task panicked")? {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!("Polling stopped: {e}");
            Err(e.into())
        }
    }
}
