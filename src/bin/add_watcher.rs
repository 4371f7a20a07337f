//! add-watcher: register a catalog request URL with the watcher.
//!
//! This is the external command path: it appends to the same registry file the
//! running agent reads every cycle, so a new watcher is picked up on the next
//! cycle without a restart.
//!
//! The URL must already be a catalog API request URL. Either pass one with
//! `--url`, or pass the encoded filter query with `--filters` and the fixed
//! endpoint and pagination are filled in.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;

use vinted_watch::DEFAULT_CURRENCIES;
use vinted_watch::api::{catalog_request_url, extract_host};
use vinted_watch::config::{AppConfig, CONFIG_PATH, CONFIG_PATH_ENV};
use vinted_watch::registry::WatcherRegistry;
use vinted_watch::types::WatcherSpec;

#[derive(Parser)]
#[command(name = "add-watcher", about = "Append a watcher to the registry")]
struct Cli {
    /// Full catalog API request URL
    #[arg(long, conflicts_with = "filters", required_unless_present = "filters")]
    url: Option<String>,

    /// Encoded filter query appended to the default catalog endpoint,
    /// e.g. "catalog_ids[]=79&order=newest_first"
    #[arg(long)]
    filters: Option<String>,

    /// Accepted seller currency (repeatable). Defaults to EUR, CZK and PLN.
    #[arg(long = "currency")]
    currencies: Vec<String>,

    /// Path to config.toml
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(CONFIG_PATH));
    let config = AppConfig::load_or_default(&config_path)?;

    let url = match (cli.url, cli.filters) {
        (Some(url), _) => url,
        (None, Some(filters)) => catalog_request_url(&filters),
        (None, None) => bail!("either --url or --filters is required"),
    };
    extract_host(&url)?;

    let currencies: Vec<String> = if cli.currencies.is_empty() {
        DEFAULT_CURRENCIES.iter().map(|c| c.to_string()).collect()
    } else {
        cli.currencies
            .iter()
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
            .collect()
    };

    let registry = WatcherRegistry::new(&config.storage.watchers_path);
    registry.append(WatcherSpec::new(url.clone(), currencies.clone()))?;

    println!(
        "Watching {url} for currencies {} ({})",
        currencies.join(", "),
        registry.path().display()
    );
    Ok(())
}
