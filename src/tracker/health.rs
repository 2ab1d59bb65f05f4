use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::health::HealthState;
use crate::db::Gateway;
use crate::normalizer::parse_round_id;
use crate::source::SnapshotSource;
use crate::types::SourceStatus;

/// Flips the shared UP/DOWN flag by watching round progress between checks.
pub struct HealthMonitor {
    gateway: Arc<dyn Gateway>,
    source: Arc<dyn SnapshotSource>,
    health: Arc<HealthState>,
    period: Duration,
    call_timeout: Duration,
    /// Round id observed by the previous check; `None` until primed.
    baseline: Option<Option<u64>>,
}

impl HealthMonitor {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        source: Arc<dyn SnapshotSource>,
        health: Arc<HealthState>,
        period: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            source,
            health,
            period,
            call_timeout,
            baseline: None,
        }
    }

    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // First tick is immediate and primes the baseline.
            interval.tick().await;
            match self.observe().await {
                Some(observed) => {
                    self.check(observed);
                }
                None => warn!("Health check skipped: latest round id unavailable"),
            }
        }
    }

    /// Compares `observed` with the previous check and publishes the result.
    pub fn check(&mut self, observed: Option<u64>) -> SourceStatus {
        let status = match self.baseline {
            None => SourceStatus::Up,
            Some(prev) if prev == observed => SourceStatus::Down,
            Some(_) => SourceStatus::Up,
        };
        self.baseline = Some(observed);

        let before = self.health.status();
        self.health.set_status(status);
        self.health.set_last_round_id(observed);

        if before != status {
            match status {
                SourceStatus::Down => warn!(
                    last_round = ?observed,
                    "Source DOWN: no new round since the last check, polling paused"
                ),
                SourceStatus::Up => info!(last_round = ?observed, "Source UP: polling resumed"),
            }
        } else {
            debug!(status = %status, last_round = ?observed, "Health check");
        }
        status
    }

    /// Latest finalized id from the store, raised by the source's live round
    /// while paused. `None` when the store cannot answer.
    async fn observe(&self) -> Option<Option<u64>> {
        let stored = match timeout(self.call_timeout, self.gateway.latest_round_id()).await {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => {
                warn!("Health check store error: {e}");
                return None;
            }
            Err(_) => {
                warn!("Health check store timed out");
                return None;
            }
        };

        if self.health.is_up() {
            return Some(stored);
        }

        // The live round becomes finalized once it closes, so live - 1 is the
        // id the store would report if polling were running.
        let probed = match timeout(self.call_timeout, self.source.fetch_snapshot_pair()).await {
            Ok(Ok(pair)) => pair
                .live
                .round_id
                .as_deref()
                .and_then(parse_round_id)
                .map(|id| id.saturating_sub(1)),
            Ok(Err(e)) => {
                debug!("Health probe failed: {e}");
                None
            }
            Err(_) => None,
        };
        Some(stored.max(probed))
    }
}
