//! Ingestion of decoded readings.

use crate::clock::Clock;
use crate::mac_address::canonical_address;
use crate::reading::Reading;
use crate::registry::DeviceRegistry;
use crate::store::{Axis, Labels, MetricStore, Series};
use std::sync::Arc;

/// Ruuvi Innovations manufacturer ID.
///
/// Scanners that hand over the whole manufacturer data block put it in front
/// of the payload as little-endian bytes `99 04`.
pub const RUUVI_MANUFACTURER_ID: u16 = 0x0499;

/// Advertisement header re-attached to payloads in the history document:
/// flags AD structure, manufacturer data AD header and the Ruuvi company id.
pub const ADVERTISEMENT_HEADER: &str = "0201061BFF9904";

/// Format reported for payloads too short to carry a format byte.
pub const DEFAULT_FORMAT_VERSION: u8 = 5;

/// Raw payload as it is kept in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadFrame {
    /// `ADVERTISEMENT_HEADER` followed by the payload in uppercase hex, or
    /// empty when the payload is shorter than two bytes
    pub hex: String,
    pub format_version: u8,
}

impl PayloadFrame {
    pub fn from_raw(raw: &[u8]) -> Self {
        let payload = match raw {
            [low, high, rest @ ..] if u16::from_le_bytes([*low, *high]) == RUUVI_MANUFACTURER_ID => {
                rest
            }
            _ => raw,
        };

        match payload {
            [format_version, _, ..] => PayloadFrame {
                hex: format!("{ADVERTISEMENT_HEADER}{}", hex::encode_upper(payload)),
                format_version: *format_version,
            },
            _ => PayloadFrame {
                hex: String::new(),
                format_version: DEFAULT_FORMAT_VERSION,
            },
        }
    }
}

/// Routes readings into the device registry and the metric store.
#[derive(Clone)]
pub struct Observer {
    registry: Arc<DeviceRegistry>,
    store: Arc<dyn MetricStore>,
    clock: Arc<dyn Clock>,
}

impl Observer {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        store: Arc<dyn MetricStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            store,
            clock,
        }
    }

    /// Record one reading.
    ///
    /// Never fails: payloads too short to frame are stored as empty with the
    /// default format, and absent measurements leave their series untouched.
    pub fn observe(&self, reading: &Reading) {
        let address = canonical_address(&reading.address);
        let frame = PayloadFrame::from_raw(&reading.raw_bytes);

        let _ingest = self.registry.ingest_guard();
        let is_new = self.registry.upsert(
            &address,
            self.clock.now(),
            frame.hex,
            frame.format_version,
        );
        if is_new {
            tracing::debug!(device = %address, format = frame.format_version, "new device");
        }

        let device = Labels::device(&address);
        let store = self.store.as_ref();

        store.increment(Series::Frames, &device);
        store.set(Series::Rssi, &device, f64::from(reading.rssi));

        if let Some(millivolts) = reading.voltage {
            store.set(Series::Voltage, &device, f64::from(millivolts) / 1000.0);
        }
        if let Some(pascals) = reading.pressure {
            store.set(Series::Pressure, &device, f64::from(pascals) / 100.0);
        }
        if let Some(celsius) = reading.temperature {
            store.set(Series::Temperature, &device, celsius);
        }
        if let Some(humidity) = reading.humidity {
            store.set(Series::Humidity, &device, f64::from(humidity) / 100.0);
        }
        if let Some(acceleration) = reading.acceleration {
            for (axis, value) in Axis::ALL.into_iter().zip([
                acceleration.x,
                acceleration.y,
                acceleration.z,
            ]) {
                store.set(Series::Acceleration, &Labels::axis(&address, axis), value);
            }
        }
        store.set(Series::Format, &device, f64::from(reading.data_format()));
        if let Some(tx_power) = reading.tx_power {
            store.set(Series::TxPower, &device, f64::from(tx_power));
        }
        if let Some(move_count) = reading.move_count {
            store.set(Series::MoveCount, &device, f64::from(move_count));
        }
        if let Some(seqno) = reading.seqno {
            store.set(Series::Seqno, &device, f64::from(seqno));
        }
    }
}
