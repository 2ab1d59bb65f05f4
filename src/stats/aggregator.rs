use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout, MissedTickBehavior};
use tracing::{error, info};

use crate::db::Gateway;
use crate::error::{AppError, Result};
use crate::stats::AggregateStats;
use crate::types::now_ms;

/// Background task that rebuilds the aggregate row from every stored round.
/// A full recompute each period, so the row never drifts from the rounds table.
pub struct StatsAggregator {
    gateway: Arc<dyn Gateway>,
    period: Duration,
    persist_timeout: Duration,
}

impl StatsAggregator {
    pub fn new(gateway: Arc<dyn Gateway>, period: Duration, persist_timeout: Duration) -> Self {
        Self {
            gateway,
            period,
            persist_timeout,
        }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // First tick fires immediately: stats are fresh right after startup.
            interval.tick().await;
            match self.rebuild().await {
                Ok(Some(stats)) => info!(
                    rounds = stats.nb_entries,
                    up = stats.nb_round_up,
                    down = stats.nb_round_down,
                    "Aggregate rebuilt from {} rounds",
                    stats.nb_entries
                ),
                Ok(None) => info!("Aggregate skipped: no finalized rounds yet"),
                Err(e) => error!("Aggregator error: {e}"),
            }
        }
    }

    /// Recomputes and stores the aggregate. With no rounds on record nothing
    /// is written and any previous row stays as it was.
    pub async fn rebuild(&self) -> Result<Option<AggregateStats>> {
        let rounds = self.guarded(self.gateway.list_all_rounds()).await?;
        let Some(mut stats) = AggregateStats::from_rounds(&rounds) else {
            return Ok(None);
        };
        stats.computed_at = now_ms();
        self.guarded(self.gateway.write_aggregate(&stats)).await?;
        Ok(Some(stats))
    }

    async fn guarded<T>(&self, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        timeout(self.persist_timeout, fut)
            .await
            .map_err(|_| AppError::PersistenceUnavailable("aggregate store timed out".into()))?
    }
}
