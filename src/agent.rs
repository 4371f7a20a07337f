//! The poll loop.
//!
//! One cycle reads the registry, polls each watcher in registry order, records
//! every unseen listing id, forwards the ones whose currency is accepted, and
//! pauses a random interval between watchers. Cycles are separated by a
//! longer random pause. Watchers are never polled concurrently.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::PollingConfig;
use crate::engine::{Partition, partition_new_listings};
use crate::error::{PollError, Result};
use crate::fetcher::ListingSource;
use crate::ledger::DedupLedger;
use crate::registry::WatcherRegistry;
use crate::types::{ListingBatch, WatcherSpec};

/// Upper bounds for the randomized pauses. Actual waits fall in `[max, 2 * max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub between_cycles: Duration,
    pub between_watchers: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

impl From<&PollingConfig> for Pacing {
    fn from(c: &PollingConfig) -> Self {
        Self {
            between_cycles: Duration::from_secs(c.max_wait_between_cycles_secs),
            between_watchers: Duration::from_secs(c.max_wait_between_watchers_secs),
        }
    }
}

/// Uniform random duration in `[max, 2 * max)`, saturating at `Duration::MAX`.
pub fn random_wait(max: Duration) -> Duration {
    let upper = max.saturating_mul(2);
    if upper <= max {
        return max;
    }
    rand::thread_rng().gen_range(max..upper)
}

/// Per-cycle totals, logged at the end of each cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub watchers: usize,
    pub failed: usize,
    pub recorded: usize,
    pub forwarded: usize,
}

pub struct PollingAgent {
    registry: WatcherRegistry,
    ledger: DedupLedger,
    source: Arc<dyn ListingSource>,
    output: mpsc::Sender<ListingBatch>,
    pacing: Pacing,
    shutdown: watch::Receiver<bool>,
}

impl PollingAgent {
    pub fn new(
        registry: WatcherRegistry,
        ledger: DedupLedger,
        source: Arc<dyn ListingSource>,
        output: mpsc::Sender<ListingBatch>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry,
            ledger,
            source,
            output,
            pacing: Pacing::default(),
            shutdown,
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Poll until shutdown is signalled. Returns an error only when polling
    /// cannot meaningfully continue: the registry is unreadable or the
    /// notifier has gone away.
    pub async fn run(mut self) -> Result<()> {
        info!(
            registry = %self.registry.path().display(),
            ledger = %self.ledger.path().display(),
            "Polling agent started"
        );

        while !self.is_shutdown() {
            let report = self.run_cycle().await?;
            info!(
                watchers = report.watchers,
                failed = report.failed,
                recorded = report.recorded,
                forwarded = report.forwarded,
                "Cycle complete"
            );

            let wait = random_wait(self.pacing.between_cycles);
            debug!(wait_secs = wait.as_secs(), "Sleeping until next cycle");
            if !self.pause(wait).await {
                break;
            }
        }

        info!("Polling agent stopped");
        Ok(())
    }

    /// One pass over every registered watcher.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let watchers = self.registry.list()?;
        let mut report = CycleReport::default();

        if watchers.is_empty() {
            info!("No watchers registered");
            return Ok(report);
        }

        for watcher in &watchers {
            if self.is_shutdown() {
                break;
            }
            report.watchers += 1;

            match self.process_watcher(watcher).await {
                Ok((recorded, forwarded)) => {
                    report.recorded += recorded;
                    report.forwarded += forwarded;
                }
                Err(PollError::NotifierClosed) => return Err(PollError::NotifierClosed),
                Err(e) => {
                    report.failed += 1;
                    warn!(watcher = %watcher.source_url, "Skipping watcher this cycle: {e}");
                }
            }

            if !self.pause(random_wait(self.pacing.between_watchers)).await {
                break;
            }
        }

        Ok(report)
    }

    /// Fetch, filter, record and forward for one watcher.
    /// Returns `(ids recorded, listings forwarded)`.
    async fn process_watcher(&self, watcher: &WatcherSpec) -> Result<(usize, usize)> {
        let listings = self.source.fetch(&watcher.source_url).await?;
        let ids: Vec<_> = listings.iter().map(|l| l.id).collect();
        let seen = self.ledger.seen_among(&ids);

        let Partition { new_ids, accepted } =
            partition_new_listings(listings, &seen, &watcher.accepted_currencies);

        // Recorded before forwarding so a crash never re-forwards a listing.
        self.ledger.record_batch(&new_ids)?;

        if accepted.is_empty() {
            debug!(watcher = %watcher.source_url, new = new_ids.len(), "Nothing to forward");
            return Ok((new_ids.len(), 0));
        }

        let forwarded = accepted.len();
        let batch = ListingBatch {
            watcher_url: watcher.source_url.clone(),
            detected_at: Utc::now(),
            listings: accepted,
        };
        // Blocks while the notifier queue is full.
        self.output
            .send(batch)
            .await
            .map_err(|_| PollError::NotifierClosed)?;

        info!(watcher = %watcher.source_url, count = forwarded, "Forwarded new listings");
        Ok((new_ids.len(), forwarded))
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep for `duration` unless shutdown arrives first. Returns `false`
    /// when the agent should stop.
    async fn pause(&mut self, duration: Duration) -> bool {
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);

        loop {
            if self.is_shutdown() {
                return false;
            }
            tokio::select! {
                _ = &mut sleep => return true,
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown channel closed");
                        return false;
                    }
                }
            }
        }
    }
}
