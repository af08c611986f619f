//! Point-in-time view of all active devices, in the shape of the Ruuvi
//! Gateway `/history` document.
//!
//! The view is built from a detached registry snapshot and one pass over each
//! series of the metric store. It is not atomic: a reading being observed
//! while the snapshot is built may show up in some fields of its device and
//! not in others.

use crate::clock::unix_seconds;
use crate::registry::{DeviceEntry, DeviceRegistry};
use crate::store::{Axis, Labels, MetricStore, Series, SeriesValues};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::SystemTime;

/// Top-level `/history` document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryData {
    pub data: Gateway,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Gateway {
    /// Always empty; kept for Ruuvi Gateway compatibility
    pub coordinates: String,
    /// Capture time in unix seconds
    pub timestamp: i64,
    pub gw_mac: String,
    pub tags: BTreeMap<String, Tag>,
}

/// Flattened state of one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub rssi: i32,
    /// Last-seen time in unix seconds
    pub timestamp: i64,
    pub data: String,
    pub data_format: u8,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: i64,
    pub accel_x: f64,
    pub accel_y: f64,
    pub accel_z: f64,
    pub movement_counter: i64,
    pub voltage: f64,
    pub tx_power: i32,
    pub measurement_sequence_number: i64,
    pub id: String,
}

/// Series that feed a [`Tag`].
const TAG_SERIES: [Series; 9] = [
    Series::Rssi,
    Series::Voltage,
    Series::Pressure,
    Series::Temperature,
    Series::Humidity,
    Series::Acceleration,
    Series::TxPower,
    Series::MoveCount,
    Series::Seqno,
];

/// Builds [`Gateway`] views over the registry and the metric store.
#[derive(Clone)]
pub struct SnapshotBuilder {
    registry: Arc<DeviceRegistry>,
    store: Arc<dyn MetricStore>,
    gateway_mac: String,
}

impl SnapshotBuilder {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        store: Arc<dyn MetricStore>,
        gateway_mac: String,
    ) -> Self {
        Self {
            registry,
            store,
            gateway_mac,
        }
    }

    pub fn gateway_mac(&self) -> &str {
        &self.gateway_mac
    }

    pub fn build_snapshot(&self, now: SystemTime) -> Gateway {
        let entries = self.registry.snapshot();
        let values: HashMap<Series, SeriesValues> = TAG_SERIES
            .into_iter()
            .map(|series| (series, self.store.values(series)))
            .collect();

        let tags = entries
            .into_values()
            .map(|entry| (entry.address.clone(), tag(entry, &values)))
            .collect();

        Gateway {
            coordinates: String::new(),
            timestamp: unix_seconds(now),
            gw_mac: self.gateway_mac.clone(),
            tags,
        }
    }
}

fn tag(entry: DeviceEntry, values: &HashMap<Series, SeriesValues>) -> Tag {
    // Series that were never written read as zero.
    let lookup = |series: Series, labels: &Labels<'_>| {
        values
            .get(&series)
            .and_then(|values| values.get(labels))
            .unwrap_or_default()
    };
    let value = |series| lookup(series, &Labels::device(&entry.address));
    let axis = |axis| lookup(Series::Acceleration, &Labels::axis(&entry.address, axis));

    Tag {
        rssi: value(Series::Rssi) as i32,
        timestamp: unix_seconds(entry.last_seen),
        data_format: entry.format_version,
        temperature: value(Series::Temperature),
        humidity: value(Series::Humidity),
        pressure: value(Series::Pressure) as i64,
        accel_x: axis(Axis::X),
        accel_y: axis(Axis::Y),
        accel_z: axis(Axis::Z),
        movement_counter: value(Series::MoveCount) as i64,
        voltage: value(Series::Voltage),
        tx_power: value(Series::TxPower) as i32,
        measurement_sequence_number: value(Series::Seqno) as i64,
        id: entry.address.clone(),
        data: entry.raw_payload_hex,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::Observer;
    use crate::reading::Acceleration;
    use crate::store::PrometheusStore;
    use crate::test_utils::{TEST_MAC, base_reading, test_epoch, test_state};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const GW_MAC: &str = "B8:27:EB:00:00:01";

    fn setup() -> (Observer, SnapshotBuilder) {
        let (registry, store, clock) = test_state();
        let observer = Observer::new(registry.clone(), store.clone(), clock);
        let builder = SnapshotBuilder::new(registry, store, GW_MAC.to_string());
        (observer, builder)
    }

    #[test]
    fn test_empty_snapshot() {
        let (_observer, builder) = setup();
        let gateway = builder.build_snapshot(test_epoch());

        assert_eq!(gateway.coordinates, "");
        assert_eq!(gateway.timestamp, 1_700_000_000);
        assert_eq!(gateway.gw_mac, GW_MAC);
        assert!(gateway.tags.is_empty());
    }

    #[test]
    fn test_snapshot_scenario() {
        let (observer, builder) = setup();
        let mut reading = base_reading("aa:bb:cc:dd:ee:ff");
        reading.voltage = Some(3000);
        reading.raw_bytes = vec![0x05, 0x12, 0x34];
        observer.observe(&reading);

        let gateway = builder.build_snapshot(test_epoch() + Duration::from_secs(5));
        assert_eq!(gateway.tags.len(), 1);

        let tag = &gateway.tags[TEST_MAC];
        assert_eq!(tag.id, TEST_MAC);
        assert_eq!(tag.rssi, -60);
        assert_eq!(tag.timestamp, 1_700_000_000);
        assert_eq!(tag.data, "0201061BFF9904051234");
        assert_eq!(tag.data_format, 5);
        assert_eq!(tag.voltage, 3.0);
        assert_eq!(tag.temperature, 0.0);
        assert_eq!(tag.tx_power, 0);
        assert_eq!(gateway.timestamp, 1_700_000_005);
    }

    #[test]
    fn test_snapshot_truncates_integer_fields() {
        let (observer, builder) = setup();
        let mut reading = base_reading(TEST_MAC);
        reading.pressure = Some(101_325);
        reading.humidity = Some(4550);
        reading.tx_power = Some(-4);
        reading.move_count = Some(66);
        reading.seqno = Some(205);
        reading.acceleration = Some(Acceleration {
            x: 0.004,
            y: -0.004,
            z: 1.036,
        });
        observer.observe(&reading);

        let tag = &builder.build_snapshot(test_epoch()).tags[TEST_MAC];
        assert_eq!(tag.pressure, 1013);
        assert_eq!(tag.humidity, 45.5);
        assert_eq!(tag.tx_power, -4);
        assert_eq!(tag.movement_counter, 66);
        assert_eq!(tag.measurement_sequence_number, 205);
        assert_eq!((tag.accel_x, tag.accel_y, tag.accel_z), (0.004, -0.004, 1.036));
    }

    /// Counts reads while delegating to a real store.
    struct CountingStore {
        inner: PrometheusStore,
        gets: AtomicUsize,
        passes: AtomicUsize,
    }

    impl MetricStore for CountingStore {
        fn set(&self, series: Series, labels: &Labels<'_>, value: f64) {
            self.inner.set(series, labels, value)
        }

        fn increment(&self, series: Series, labels: &Labels<'_>) {
            self.inner.increment(series, labels)
        }

        fn get(&self, series: Series, labels: &Labels<'_>) -> Option<f64> {
            self.gets.fetch_add(1, Ordering::Relaxed);
            self.inner.get(series, labels)
        }

        fn values(&self, series: Series) -> SeriesValues {
            self.passes.fetch_add(1, Ordering::Relaxed);
            self.inner.values(series)
        }

        fn delete(&self, series: Series, labels: &Labels<'_>) {
            self.inner.delete(series, labels)
        }
    }

    #[test]
    fn test_snapshot_reads_each_series_once_regardless_of_device_count() {
        let (registry, _, clock) = test_state();
        let store = Arc::new(CountingStore {
            inner: PrometheusStore::new().unwrap(),
            gets: AtomicUsize::new(0),
            passes: AtomicUsize::new(0),
        });
        let observer = Observer::new(registry.clone(), store.clone(), clock);
        for i in 0..200u8 {
            let mut reading = base_reading(&format!("AA:BB:CC:DD:{:02X}:{:02X}", i / 16, i));
            reading.tx_power = Some(4);
            reading.acceleration = Some(Acceleration {
                x: 0.0,
                y: 0.0,
                z: f64::from(i),
            });
            observer.observe(&reading);
        }
        let builder = SnapshotBuilder::new(registry, store.clone(), GW_MAC.to_string());

        let gateway = builder.build_snapshot(test_epoch());
        assert_eq!(gateway.tags.len(), 200);
        assert_eq!(store.gets.load(Ordering::Relaxed), 0);
        assert_eq!(store.passes.load(Ordering::Relaxed), TAG_SERIES.len());

        let tag = &gateway.tags["AA:BB:CC:DD:0C:C7"];
        assert_eq!(tag.accel_z, 199.0);
        assert_eq!(tag.tx_power, 4);
        assert_eq!(tag.rssi, -60);
    }

    #[test]
    fn test_snapshot_has_one_tag_per_device() {
        let (observer, builder) = setup();
        for address in ["11:11:11:11:11:11", "22:22:22:22:22:22", "11:11:11:11:11:11"] {
            observer.observe(&base_reading(address));
        }

        let gateway = builder.build_snapshot(test_epoch());
        let keys: Vec<&str> = gateway.tags.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["11:11:11:11:11:11", "22:22:22:22:22:22"]);
    }

    #[test]
    fn test_tag_serializes_with_gateway_field_names() {
        let (observer, builder) = setup();
        observer.observe(&base_reading(TEST_MAC));

        let json = serde_json::to_value(HistoryData {
            data: builder.build_snapshot(test_epoch()),
        })
        .unwrap();

        let tag = &json["data"]["tags"][TEST_MAC];
        for field in [
            "rssi",
            "timestamp",
            "data",
            "dataFormat",
            "temperature",
            "humidity",
            "pressure",
            "accelX",
            "accelY",
            "accelZ",
            "movementCounter",
            "voltage",
            "txPower",
            "measurementSequenceNumber",
            "id",
        ] {
            assert!(tag.get(field).is_some(), "missing {field}");
        }
        assert_eq!(json["data"]["gw_mac"], GW_MAC);
        assert_eq!(json["data"]["coordinates"], "");
        assert_eq!(tag["dataFormat"], 5);
        assert_eq!(tag["data"], "");
    }
}
