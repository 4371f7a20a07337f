use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backoff::GlobalBackoff;
use crate::clock::{Clock, SystemClock};
use crate::error::{PollError, Result};
use crate::headers::HeaderPool;
use crate::transport::Transport;
use crate::types::SessionCredential;
use crate::{ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};

/// Cached credentials are refreshed after this long, whatever the token says.
pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(60 * 60);

/// Attempts per acquisition, the first one included.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Session credentials per upstream host.
///
/// A cache hit never touches the network. A miss or an expired entry triggers
/// an unauthenticated GET against the host whose `Set-Cookie` headers carry the
/// access and refresh tokens. Failed attempts are retried behind the shared
/// [`GlobalBackoff`].
pub struct CredentialCache {
    transport: Arc<dyn Transport>,
    headers: HeaderPool,
    backoff: Arc<GlobalBackoff>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_retries: u32,
    cache: Mutex<HashMap<String, SessionCredential>>,
}

impl CredentialCache {
    pub fn new(transport: Arc<dyn Transport>, headers: HeaderPool, backoff: Arc<GlobalBackoff>) -> Self {
        Self {
            transport,
            headers,
            backoff,
            clock: Arc::new(SystemClock),
            ttl: DEFAULT_CREDENTIAL_TTL,
            max_retries: DEFAULT_MAX_RETRIES,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Return a fresh credential for `host`, acquiring one if needed.
    pub async fn get(&self, host: &str) -> Result<SessionCredential> {
        let now = self.clock.now();
        if let Some(cred) = self.cache.lock().get(host).filter(|c| c.is_fresh(now)) {
            debug!(host, "Using cached session cookies");
            return Ok(cred.clone());
        }

        let cred = self.acquire(host).await?;
        self.cache.lock().insert(host.to_string(), cred.clone());
        info!(
            host,
            ttl_mins = self.ttl.as_secs() / 60,
            "Session cookies cached"
        );
        Ok(cred)
    }

    /// Drop the cached credential for `host` so the next `get` re-acquires it.
    pub fn invalidate(&self, host: &str) {
        if self.cache.lock().remove(host).is_some() {
            info!(host, "Session cookies invalidated");
        }
    }

    async fn acquire(&self, host: &str) -> Result<SessionCredential> {
        for attempt in 0..self.max_retries {
            if attempt > 0 {
                self.backoff.wait(host).await;
            }

            let headers = self.headers.pick()?;
            let resp = match self.transport.get(host, headers).await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(host, attempt = attempt + 1, "Session request failed: {e}");
                    continue;
                }
            };

            if !resp.is_success() {
                warn!(host, attempt = attempt + 1, status = resp.status, "Session request rejected");
                continue;
            }

            let access = resp.cookie(ACCESS_TOKEN_COOKIE).filter(|v| !v.is_empty());
            let refresh = resp.cookie(REFRESH_TOKEN_COOKIE).filter(|v| !v.is_empty());
            let (Some(access), Some(refresh)) = (access, refresh) else {
                warn!(host, attempt = attempt + 1, "Session response lacked token cookies");
                continue;
            };

            self.backoff.reset();
            let acquired_at = self.clock.now();
            return Ok(SessionCredential {
                access_token: access.to_string(),
                refresh_token: refresh.to_string(),
                acquired_at,
                expires_at: acquired_at + self.ttl,
            });
        }

        Err(PollError::CredentialAcquisitionFailed {
            host: host.to_string(),
            attempts: self.max_retries,
        })
    }
}
