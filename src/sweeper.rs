//! Periodic expiry of silent devices.

use crate::clock::Clock;
use crate::registry::DeviceRegistry;
use crate::store::{MetricStore, device_series};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Duration after which a silent device is forgotten.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// How often the sweeper looks for expired devices.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Evicts expired devices from the registry and deletes their series.
#[derive(Clone)]
pub struct Sweeper {
    registry: Arc<DeviceRegistry>,
    store: Arc<dyn MetricStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl Sweeper {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        store: Arc<dyn MetricStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            clock,
            ttl,
        }
    }

    /// Run one sweep and return the evicted addresses.
    ///
    /// The cutoff is taken while no observer is mid-ingestion, and the series
    /// of exactly the evicted set are deleted before any new observer may
    /// start, so a device reporting during the sweep keeps both its entry and
    /// its series. If an observer is busy the sweep is skipped rather than
    /// waited for; the next tick catches up.
    pub fn sweep(&self) -> Vec<String> {
        let Some(_sweep) = self.registry.try_sweep_guard() else {
            tracing::debug!("observers busy, sweep skipped");
            return Vec::new();
        };
        let now = self.clock.now();
        let expired = self.registry.evict_older_than(self.ttl, now);

        for address in &expired {
            for (series, labels) in device_series(address) {
                self.store.delete(series, &labels);
            }
            tracing::debug!(device = %address, "device expired");
        }

        if !expired.is_empty() {
            tracing::info!(
                expired = expired.len(),
                active = self.registry.len(),
                "forgot silent devices"
            );
        }
        expired
    }

    /// Sweep every `interval` until `shutdown` turns `true` or its sender is
    /// dropped.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        // interval_at panics on a zero period
        let interval = interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("sweeper stopped");
    }
}
