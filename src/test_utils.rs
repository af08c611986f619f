use crate::clock::ManualClock;
use crate::reading::Reading;
use crate::registry::DeviceRegistry;
use crate::store::PrometheusStore;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A stable device address for unit tests.
pub const TEST_MAC: &str = "AA:BB:CC:DD:EE:FF";

/// Wall-clock start for manual clocks, far enough from the epoch to make
/// unix timestamps obvious in assertions.
pub fn test_epoch() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

/// Build a `Reading` with all optional fields unset and no payload.
///
/// Tests can override just the fields they care about.
pub fn base_reading(address: &str) -> Reading {
    Reading {
        address: address.to_string(),
        rssi: -60,
        ..Reading::default()
    }
}

/// Fresh shared state: registry, prometheus-backed store and a paused clock.
pub fn test_state() -> (Arc<DeviceRegistry>, Arc<PrometheusStore>, Arc<ManualClock>) {
    (
        Arc::new(DeviceRegistry::new()),
        Arc::new(PrometheusStore::new().unwrap()),
        Arc::new(ManualClock::new(test_epoch())),
    )
}
