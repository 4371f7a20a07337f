//! Probe: catalog endpoint
//!
//! Acquires session cookies for the catalog host and fetches one page through
//! the same fetcher the agent uses, then documents:
//! - Session acquisition latency
//! - Listing count and a sample listing
//! - Seller currency distribution (empty = not converted)
//! - Id uniqueness within the page

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;

use vinted_watch::api::{catalog_request_url, extract_host};
use vinted_watch::auth::CredentialCache;
use vinted_watch::backoff::GlobalBackoff;
use vinted_watch::breaker::{BreakerConfig, CircuitBreaker};
use vinted_watch::fetcher::{ListingSource, ResilientFetcher};
use vinted_watch::headers::HeaderPool;
use vinted_watch::transport::HttpTransport;

#[derive(Parser)]
#[command(name = "probe_catalog", about = "Fetch one catalog page and describe it")]
struct Args {
    /// Catalog API request URL (defaults to the unfiltered first page)
    #[arg(long)]
    url: Option<String>,

    /// Header pool file
    #[arg(long, default_value = "headers.json")]
    headers: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let url = args.url.unwrap_or_else(|| catalog_request_url(""));
    let host = extract_host(&url)?;

    let headers = HeaderPool::from_file(&args.headers);
    let transport = Arc::new(HttpTransport::new(Duration::from_secs(10))?);
    let credentials = Arc::new(CredentialCache::new(
        transport.clone(),
        headers.clone(),
        Arc::new(GlobalBackoff::default()),
    ));
    let fetcher = ResilientFetcher::new(
        transport,
        credentials.clone(),
        headers,
        Arc::new(CircuitBreaker::new("probe", BreakerConfig::default())),
    );

    println!("=== Probe: catalog ===");
    println!("URL: {url}");
    println!();

    println!("--- 1. Session cookies ---");
    let start = Instant::now();
    let cred = credentials.get(&host).await?;
    println!("Host: {host}");
    println!("Latency: {:?}", start.elapsed());
    println!("Access token length: {}", cred.access_token.len());
    println!("Refresh token length: {}", cred.refresh_token.len());
    println!();

    println!("--- 2. Catalog page ---");
    let start = Instant::now();
    let listings = fetcher.fetch(&url).await?;
    println!("Latency: {:?}", start.elapsed());
    println!("Listing count: {}", listings.len());
    if let Some(first) = listings.first() {
        println!("\nSample listing (first):");
        println!("{}", serde_json::to_string_pretty(first)?);
    }
    println!();

    println!("--- 3. Seller currencies ---");
    let mut by_currency: BTreeMap<&str, usize> = BTreeMap::new();
    for listing in &listings {
        let key = if listing.seller_currency.is_empty() {
            "(none)"
        } else {
            listing.seller_currency.as_str()
        };
        *by_currency.entry(key).or_default() += 1;
    }
    for (currency, count) in &by_currency {
        println!("  {currency}: {count}");
    }
    println!();

    println!("--- 4. Id uniqueness ---");
    let unique: HashSet<_> = listings.iter().map(|l| l.id).collect();
    println!("  Total listings: {}", listings.len());
    println!("  Unique ids: {}", unique.len());
    println!();

    println!("=== Probe complete ===");
    Ok(())
}
