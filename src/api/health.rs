//! Shared health state for the /health endpoint.
//! The status flag is written by the HealthMonitor only; the poll loop and the
//! API read it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::types::SourceStatus;

/// Shared health metrics. Updated by tracker tasks, read by the poll loop and API.
pub struct HealthState {
    /// True while the upstream source is producing new rounds.
    source_up: AtomicBool,
    /// Latest finalized round id seen by the last health check (0 = none).
    last_round_id: AtomicU64,
    /// Millisecond timestamp of the last completed poll cycle (0 = none).
    last_cycle_at_ms: AtomicU64,
    cycles_run: AtomicU64,
    cycles_paused: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            source_up: AtomicBool::new(true),
            last_round_id: AtomicU64::new(0),
            last_cycle_at_ms: AtomicU64::new(0),
            cycles_run: AtomicU64::new(0),
            cycles_paused: AtomicU64::new(0),
        }
    }

    pub fn set_status(&self, status: SourceStatus) {
        self.source_up
            .store(status == SourceStatus::Up, Ordering::Release);
    }

    pub fn status(&self) -> SourceStatus {
        if self.source_up.load(Ordering::Acquire) {
            SourceStatus::Up
        } else {
            SourceStatus::Down
        }
    }

    pub fn is_up(&self) -> bool {
        self.status() == SourceStatus::Up
    }

    pub fn set_last_round_id(&self, round_id: Option<u64>) {
        self.last_round_id
            .store(round_id.unwrap_or(0), Ordering::Relaxed);
    }

    pub fn last_round_id(&self) -> Option<u64> {
        match self.last_round_id.load(Ordering::Relaxed) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn record_cycle(&self, at_ms: u64) {
        self.last_cycle_at_ms.store(at_ms, Ordering::Relaxed);
        self.cycles_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cycles_paused(&self) {
        self.cycles_paused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_cycle_at_ms(&self) -> u64 {
        self.last_cycle_at_ms.load(Ordering::Relaxed)
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycles_run.load(Ordering::Relaxed)
    }

    pub fn cycles_paused(&self) -> u64 {
        self.cycles_paused.load(Ordering::Relaxed)
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}
