//! Process-wide exponential backoff.
//!
//! One counter is shared by every credential acquisition regardless of host,
//! so repeated failures anywhere slow the whole agent down. The counter only
//! goes back to zero after a successful acquisition.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tracing::warn;

/// Default upper bound on a single backoff wait (30 minutes).
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30 * 60);

#[derive(Debug)]
pub struct GlobalBackoff {
    attempt: AtomicU32,
    cap: Duration,
}

impl GlobalBackoff {
    pub fn new(cap: Duration) -> Self {
        Self {
            attempt: AtomicU32::new(0),
            cap,
        }
    }

    /// `min(2^attempt seconds, cap)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.cap)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    /// Delay for the current attempt, advancing the shared counter.
    pub fn next_delay(&self) -> Duration {
        let n = self
            .attempt
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_add(1))
            })
            .unwrap_or_else(|n| n);
        self.delay_for(n)
    }

    /// Sleep for the next delay in the sequence.
    pub async fn wait(&self, host: &str) {
        let delay = self.next_delay();
        warn!(host, delay_secs = delay.as_secs(), "Backing off before retry");
        tokio::time::sleep(delay).await;
    }

    pub fn reset(&self) {
        self.attempt.store(0, Ordering::SeqCst);
    }
}

impl Default for GlobalBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_CAP)
    }
}
