//! End-to-end polling scenarios: real registry and ledger files in a temp
//! dir, the real fetcher stack, and a routed fake upstream.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use serde_json::json;
use tokio::sync::{mpsc, watch};

use vinted_watch::agent::{Pacing, PollingAgent};
use vinted_watch::api::catalog_request_url;
use vinted_watch::auth::CredentialCache;
use vinted_watch::backoff::GlobalBackoff;
use vinted_watch::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use vinted_watch::error::{PollError, Result};
use vinted_watch::fetcher::{ListingSource, ResilientFetcher};
use vinted_watch::headers::{HeaderPool, HeaderSet};
use vinted_watch::ledger::DedupLedger;
use vinted_watch::registry::WatcherRegistry;
use vinted_watch::transport::{HttpResponse, Transport};
use vinted_watch::types::{ListingBatch, WatcherSpec};

/// Answers session requests with fresh cookies and catalog requests from a
/// script.
#[derive(Default)]
struct FakeUpstream {
    catalog: Mutex<VecDeque<HttpResponse>>,
    catalog_calls: Mutex<Vec<String>>,
    session_calls: Mutex<usize>,
}

impl FakeUpstream {
    fn push_catalog(&self, status: u16, body: serde_json::Value) {
        self.catalog.lock().push_back(HttpResponse {
            status,
            cookies: Vec::new(),
            body: body.to_string(),
        });
    }

    fn catalog_calls(&self) -> usize {
        self.catalog_calls.lock().len()
    }
}

#[async_trait]
impl Transport for FakeUpstream {
    async fn get(&self, url: &str, _headers: HeaderMap) -> Result<HttpResponse> {
        if !url.contains("/api/v2/catalog/items") {
            *self.session_calls.lock() += 1;
            return Ok(HttpResponse {
                status: 200,
                cookies: vec![
                    ("access_token_web".into(), "access".into()),
                    ("refresh_token_web".into(), "refresh".into()),
                ],
                body: String::new(),
            });
        }
        self.catalog_calls.lock().push(url.to_string());
        self.catalog
            .lock()
            .pop_front()
            .ok_or_else(|| PollError::Transport("no catalog response scripted".into()))
    }
}

fn item(id: u64, currency: Option<&str>) -> serde_json::Value {
    let mut item = json!({
        "id": id,
        "title": format!("item {id}"),
        "price": { "amount": "15.0" },
        "brand_title": "Levi's",
        "url": format!("https://www.vinted.sk/items/{id}"),
        "photo": { "url": format!("https://images.vinted.net/{id}.jpg") },
    });
    if let Some(currency) = currency {
        item["conversion"] = json!({ "seller_currency": currency });
    }
    item
}

struct Scenario {
    _dir: tempfile::TempDir,
    upstream: Arc<FakeUpstream>,
    fetcher: Arc<ResilientFetcher>,
    registry: WatcherRegistry,
    ledger: DedupLedger,
    rx: mpsc::Receiver<ListingBatch>,
    _shutdown_tx: watch::Sender<bool>,
    agent: PollingAgent,
}

fn scenario() -> Scenario {
    let dir = tempfile::tempdir().unwrap();
    let registry = WatcherRegistry::new(dir.path().join("watchers.json"));
    let ledger = DedupLedger::new(dir.path().join("items.json"));

    let upstream = Arc::new(FakeUpstream::default());
    let headers = HeaderPool::fixed(vec![HeaderSet::from([(
        "user-agent".to_string(),
        "Mozilla/5.0".to_string(),
    )])]);
    let credentials = Arc::new(CredentialCache::new(
        upstream.clone(),
        headers.clone(),
        Arc::new(GlobalBackoff::default()),
    ));
    let fetcher = Arc::new(ResilientFetcher::new(
        upstream.clone(),
        credentials,
        headers,
        Arc::new(CircuitBreaker::new("catalog", BreakerConfig::default())),
    ));

    let (tx, rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let agent = PollingAgent::new(
        registry.clone(),
        ledger.clone(),
        fetcher.clone(),
        tx,
        shutdown_rx,
    )
    .with_pacing(Pacing {
        between_cycles: Duration::ZERO,
        between_watchers: Duration::ZERO,
    });

    Scenario {
        _dir: dir,
        upstream,
        fetcher,
        registry,
        ledger,
        rx,
        _shutdown_tx: shutdown_tx,
        agent,
    }
}

fn forwarded_ids(batch: &ListingBatch) -> Vec<u64> {
    batch.listings.iter().map(|l| l.id).collect()
}

#[tokio::test(start_paused = true)]
async fn new_listings_are_recorded_and_matching_ones_forwarded() {
    let mut s = scenario();
    let url = catalog_request_url("brand_ids[]=53&order=newest_first");
    s.registry.append(WatcherSpec::new(url.clone(), ["EUR"])).unwrap();
    s.upstream.push_catalog(
        200,
        json!({ "items": [item(1, Some("EUR")), item(2, Some("CZK")), item(3, None)] }),
    );

    let report = s.agent.run_cycle().await.unwrap();
    assert_eq!(report.recorded, 3);
    assert_eq!(report.forwarded, 2);

    let batch = s.rx.try_recv().unwrap();
    assert_eq!(batch.watcher_url, url);
    assert_eq!(forwarded_ids(&batch), [1, 3]);
    assert_eq!(batch.listings[0].thumbnail_url, "https://images.vinted.net/1.jpg");
    for id in [1, 2, 3] {
        assert!(s.ledger.contains(id), "listing {id} not recorded");
    }
}

#[tokio::test(start_paused = true)]
async fn repeated_listings_are_forwarded_once() {
    let mut s = scenario();
    s.registry
        .append(WatcherSpec::new(catalog_request_url(""), ["EUR"]))
        .unwrap();
    let page = json!({ "items": [item(1, Some("EUR")), item(2, Some("CZK")), item(3, None)] });
    s.upstream.push_catalog(200, page.clone());
    s.upstream.push_catalog(200, page);

    s.agent.run_cycle().await.unwrap();
    assert_eq!(forwarded_ids(&s.rx.try_recv().unwrap()), [1, 3]);

    let report = s.agent.run_cycle().await.unwrap();
    assert_eq!(report.recorded, 0);
    assert_eq!(report.forwarded, 0);
    assert!(s.rx.try_recv().is_err());
    assert_eq!(s.ledger.len().unwrap(), 3);
    // Cookies were acquired once and reused for the second cycle.
    assert_eq!(*s.upstream.session_calls.lock(), 1);
}

#[tokio::test(start_paused = true)]
async fn upstream_failures_open_the_circuit() {
    let mut s = scenario();
    s.registry
        .append(WatcherSpec::new(catalog_request_url(""), Vec::<String>::new()))
        .unwrap();
    for _ in 0..3 {
        s.upstream.push_catalog(500, json!({}));
    }

    for _ in 0..3 {
        let report = s.agent.run_cycle().await.unwrap();
        assert_eq!(report.failed, 1);
    }
    assert_eq!(s.fetcher.breaker().state(), BreakerState::Open);
    assert_eq!(s.upstream.catalog_calls(), 3);

    // The agent keeps cycling, but nothing reaches the upstream while open.
    let report = s.agent.run_cycle().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(s.upstream.catalog_calls(), 3);
    assert!(matches!(
        s.fetcher.fetch(&catalog_request_url("")).await,
        Err(PollError::CircuitOpen)
    ));
    assert_eq!(s.upstream.catalog_calls(), 3);
    assert!(s.rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn watcher_added_while_running_is_polled_next_cycle() {
    let mut s = scenario();
    let first = catalog_request_url("catalog_ids[]=79");
    let second = catalog_request_url("catalog_ids[]=1206");
    s.registry.append(WatcherSpec::new(first.clone(), Vec::<String>::new())).unwrap();
    s.upstream.push_catalog(200, json!({ "items": [item(10, Some("PLN"))] }));

    assert_eq!(s.agent.run_cycle().await.unwrap().watchers, 1);

    s.registry.append(WatcherSpec::new(second.clone(), Vec::<String>::new())).unwrap();
    s.upstream.push_catalog(200, json!({ "items": [item(10, Some("PLN"))] }));
    s.upstream.push_catalog(200, json!({ "items": [item(11, Some("PLN"))] }));

    let report = s.agent.run_cycle().await.unwrap();
    assert_eq!(report.watchers, 2);
    assert_eq!(report.forwarded, 1);
    assert_eq!(*s.upstream.catalog_calls.lock(), [first.clone(), first, second]);

    assert_eq!(forwarded_ids(&s.rx.try_recv().unwrap()), [10]);
    assert_eq!(forwarded_ids(&s.rx.try_recv().unwrap()), [11]);
}
