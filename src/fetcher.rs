use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{COOKIE, HeaderValue};
use tracing::{debug, warn};

use crate::ACCESS_TOKEN_COOKIE;
use crate::api;
use crate::auth::CredentialCache;
use crate::breaker::CircuitBreaker;
use crate::error::{PollError, Result};
use crate::headers::HeaderPool;
use crate::transport::Transport;
use crate::types::Listing;

/// Default per-call timeout for catalog requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Anything that can turn a catalog request URL into listings.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch(&self, request_url: &str) -> Result<Vec<Listing>>;
}

/// Authenticated catalog fetch behind a circuit breaker.
///
/// The breaker is shared by every watcher, so failures caused by one watcher
/// also stop the others from loading a degraded upstream.
pub struct ResilientFetcher {
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialCache>,
    headers: HeaderPool,
    breaker: Arc<CircuitBreaker>,
    timeout: Duration,
}

impl ResilientFetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<CredentialCache>,
        headers: HeaderPool,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            transport,
            credentials,
            headers,
            breaker,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn request(&self, request_url: &str, host: &str, access_token: &str) -> Result<Vec<Listing>> {
        let mut headers = self.headers.pick()?;
        let cookie = HeaderValue::from_str(&format!("{ACCESS_TOKEN_COOKIE}={access_token}"))
            .map_err(|e| PollError::UnusableCredential {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        headers.insert(COOKIE, cookie);

        let resp = tokio::time::timeout(self.timeout, self.transport.get(request_url, headers))
            .await
            .map_err(|_| PollError::Timeout(self.timeout))??;

        if !resp.is_success() {
            return Err(PollError::UpstreamError {
                status: resp.status,
            });
        }
        api::parse_listings(&resp.body)
    }
}

#[async_trait]
impl ListingSource for ResilientFetcher {
    async fn fetch(&self, request_url: &str) -> Result<Vec<Listing>> {
        let host = api::extract_host(request_url)?;

        // Checked before credentials so an open circuit costs no network call.
        let permit = self.breaker.acquire()?;
        let credential = self.credentials.get(&host).await?;

        let outcome = self
            .request(request_url, &host, &credential.access_token)
            .await;
        match &outcome {
            Ok(listings) => {
                permit.success();
                debug!(url = request_url, count = listings.len(), "Catalog fetched");
            }
            Err(e) if e.counts_as_breaker_failure() => {
                permit.failure();
                if matches!(e, PollError::UpstreamError { status: 401 }) {
                    self.credentials.invalidate(&host);
                }
            }
            Err(e) => {
                if matches!(e, PollError::UnusableCredential { .. }) {
                    self.credentials.invalidate(&host);
                }
                warn!(url = request_url, "Catalog request not attempted: {e}");
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::GlobalBackoff;
    use crate::breaker::{BreakerConfig, BreakerState};
    use crate::clock::ManualClock;
    use crate::headers::HeaderSet;
    use crate::transport::HttpResponse;
    use crate::transport::testing::ScriptedTransport;
    use reqwest::header::HeaderMap;

    const URL: &str = "https://www.vinted.sk/api/v2/catalog/items?page=1&per_page=16";

    fn pool() -> HeaderPool {
        HeaderPool::fixed(vec![
            HeaderSet::from([("User-Agent".to_string(), "UA-1".to_string())]),
            HeaderSet::from([("User-Agent".to_string(), "UA-2".to_string())]),
        ])
    }

    fn fetcher(transport: Arc<dyn Transport>, clock: &ManualClock) -> ResilientFetcher {
        let creds = CredentialCache::new(transport.clone(), pool(), Arc::new(GlobalBackoff::default()))
            .with_clock(Arc::new(clock.clone()));
        let breaker = CircuitBreaker::with_clock(
            "catalog",
            BreakerConfig::default(),
            Arc::new(clock.clone()),
        );
        ResilientFetcher::new(transport, Arc::new(creds), pool(), Arc::new(breaker))
    }

    #[tokio::test(start_paused = true)]
    async fn attaches_cookie_and_decodes() {
        let transport = Arc::new(ScriptedTransport::default());
        transport
            .push_session("tok", "ref")
            .push_body(r#"{"items":[{"id":1,"title":"Coat"},{"id":2}]}"#);
        let f = fetcher(transport.clone(), &ManualClock::new());

        let listings = f.fetch(URL).await.unwrap();
        assert_eq!(listings.iter().map(|l| l.id).collect::<Vec<_>>(), [1, 2]);

        let requests = transport.requests.lock();
        assert_eq!(requests[0].0, "https://www.vinted.sk");
        assert_eq!(requests[1].0, URL);
        assert_eq!(requests[1].1[COOKIE], "access_token_web=tok");
        assert!(requests[1].1.contains_key("user-agent"));
    }

    #[tokio::test(start_paused = true)]
    async fn three_server_errors_open_the_circuit() {
        let transport = Arc::new(ScriptedTransport::default());
        transport
            .push_session("tok", "ref")
            .push_status(500)
            .push_status(500)
            .push_status(500);
        let f = fetcher(transport.clone(), &ManualClock::new());

        for _ in 0..3 {
            assert!(matches!(
                f.fetch(URL).await,
                Err(PollError::UpstreamError { status: 500 })
            ));
        }
        assert_eq!(f.breaker().state(), BreakerState::Open);

        let calls = transport.calls();
        assert!(matches!(f.fetch(URL).await, Err(PollError::CircuitOpen)));
        assert_eq!(transport.calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_trial_success_closes() {
        let transport = Arc::new(ScriptedTransport::default());
        transport
            .push_session("tok", "ref")
            .push_status(502)
            .push_status(502)
            .push_status(502)
            .push_body(r#"{"items":[]}"#);
        let clock = ManualClock::new();
        let f = fetcher(transport.clone(), &clock);

        for _ in 0..3 {
            let _ = f.fetch(URL).await;
        }
        clock.advance(Duration::from_secs(60));
        assert!(f.fetch(URL).await.unwrap().is_empty());
        assert_eq!(f.breaker().state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn decode_errors_count_as_failures() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_session("tok", "ref").push_body("<html>captcha</html>");
        let f = fetcher(transport, &ManualClock::new());

        assert!(matches!(f.fetch(URL).await, Err(PollError::DecodeError(_))));
        assert_eq!(f.breaker().counts().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn credential_failure_is_not_a_breaker_failure() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_status(403).push_status(403).push_status(403);
        let f = fetcher(transport, &ManualClock::new());

        assert!(matches!(
            f.fetch(URL).await,
            Err(PollError::CredentialAcquisitionFailed { .. })
        ));
        assert_eq!(f.breaker().counts().requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_drops_cached_credential() {
        let transport = Arc::new(ScriptedTransport::default());
        transport
            .push_session("stale", "ref")
            .push_status(401)
            .push_session("fresh", "ref")
            .push_body(r#"{"items":[]}"#);
        let f = fetcher(transport.clone(), &ManualClock::new());

        assert!(f.fetch(URL).await.is_err());
        f.fetch(URL).await.unwrap();
        assert_eq!(transport.requests.lock()[3].1[COOKIE], "access_token_web=fresh");
    }

    #[tokio::test(start_paused = true)]
    async fn unusable_session_cookie_is_not_a_breaker_failure() {
        let transport = Arc::new(ScriptedTransport::default());
        transport
            .push_session("bad\ntoken", "ref")
            .push_session("good", "ref")
            .push_body(r#"{"items":[]}"#);
        let f = fetcher(transport.clone(), &ManualClock::new());

        assert!(matches!(
            f.fetch(URL).await,
            Err(PollError::UnusableCredential { .. })
        ));
        assert_eq!(transport.calls(), 1);
        assert_eq!(f.breaker().counts(), Default::default());

        // The rejected cookie was dropped, so the next fetch re-acquires.
        f.fetch(URL).await.unwrap();
        assert_eq!(transport.requests.lock()[2].1[COOKIE], "access_token_web=good");
        assert_eq!(f.breaker().counts().requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_url_is_rejected_before_any_call() {
        let transport = Arc::new(ScriptedTransport::default());
        let f = fetcher(transport.clone(), &ManualClock::new());
        assert!(matches!(f.fetch("::nope").await, Err(PollError::InvalidUrl(_))));
        assert_eq!(transport.calls(), 0);
    }

    /// Answers session requests immediately and hangs on catalog requests.
    struct HangingCatalog;

    #[async_trait]
    impl Transport for HangingCatalog {
        async fn get(&self, url: &str, _headers: HeaderMap) -> Result<HttpResponse> {
            if url.contains("/api/") {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(HttpResponse {
                status: 200,
                cookies: vec![
                    ("access_token_web".into(), "tok".into()),
                    ("refresh_token_web".into(), "ref".into()),
                ],
                body: String::new(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_upstream_times_out_and_counts() {
        let f = fetcher(Arc::new(HangingCatalog), &ManualClock::new())
            .with_timeout(Duration::from_secs(10));

        assert!(matches!(
            f.fetch(URL).await,
            Err(PollError::Timeout(d)) if d == Duration::from_secs(10)
        ));
        assert_eq!(f.breaker().counts().failures, 1);
    }
}
