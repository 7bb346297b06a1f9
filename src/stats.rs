use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::hub::HubHandle;

/// Point-in-time view of ingestion progress.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Stats {
    pub current_ledger: u32,
    pub ledgers_processed: u64,
    pub transaction_count: u64,
    pub operation_count: u64,
    pub event_count: u64,
    /// Ledgers per second since `start_time`.
    pub processing_rate: f64,
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    pub connected_clients: usize,
}

impl Stats {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            current_ledger: 0,
            ledgers_processed: 0,
            transaction_count: 0,
            operation_count: 0,
            event_count: 0,
            processing_rate: 0.0,
            start_time: now,
            last_update_time: now,
            connected_clients: 0,
        }
    }
}

/// Counters written by the ingestion loop and read by reporting paths.
pub struct StatsAggregator {
    stats: RwLock<Stats>,
    clients: OnceLock<Arc<AtomicUsize>>,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            stats: RwLock::new(Stats::new(Utc::now())),
            clients: OnceLock::new(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Stats> {
        self.stats.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Stats> {
        self.stats.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reports the hub's subscriber count as `connected_clients`.
    ///
    /// Only the first attached hub is counted.
    pub fn attach_hub(&self, hub: &HubHandle) {
        if self.clients.set(hub.subscriber_counter()).is_err() {
            log::warn!("stats already report a broadcast hub, ignoring another one");
        }
    }

    pub fn increment_transactions(&self, count: u64) {
        self.write().transaction_count += count;
    }

    pub fn increment_operations(&self, count: u64) {
        self.write().operation_count += count;
    }

    pub fn increment_events(&self, count: u64) {
        self.write().event_count += count;
    }

    pub fn set_current_ledger(&self, sequence: u32) {
        self.write().current_ledger = sequence;
    }

    pub fn increment_ledgers_processed(&self) {
        let mut stats = self.write();
        stats.ledgers_processed += 1;

        let elapsed = (Utc::now() - stats.start_time).num_milliseconds() as f64 / 1000.0;
        if elapsed > 0.0 {
            stats.processing_rate = stats.ledgers_processed as f64 / elapsed;
        }
    }

    pub fn touch(&self) {
        self.write().last_update_time = Utc::now();
    }

    pub fn snapshot(&self) -> Stats {
        let mut stats = self.read().clone();
        if let Some(clients) = self.clients.get() {
            stats.connected_clients = clients.load(Ordering::Relaxed);
        }
        stats
    }

    /// Refreshes `last_update_time` every `interval` until `cancel` fires.
    pub fn spawn_ticker(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let aggregator = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => aggregator.touch(),
                }
            }
        })
    }
}
