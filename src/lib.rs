//! `ruuvi-exporter` library.
//!
//! The binary (`src/main.rs`) is responsible for logging setup and process
//! exit codes. Readings flow through [`observer::Observer`] into the device
//! registry and the metric store. [`sweeper::Sweeper`] forgets silent devices
//! and [`snapshot::SnapshotBuilder`] renders the `/history` view. The run loop
//! lives in [`crate::app`] where it can be tested with an injected source.

pub mod app;
pub mod clock;
pub mod gateway;
pub mod mac_address;
pub mod observer;
pub mod output;
pub mod reading;
pub mod registry;
pub mod server;
pub mod snapshot;
pub mod source;
pub mod store;
pub mod sweeper;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use app::{Exporter, Options, RunError, parse_duration};
pub use clock::{Clock, ManualClock, SystemClock};
pub use mac_address::MacAddress;
pub use observer::{Observer, PayloadFrame};
pub use output::SnapshotEncoder;
pub use output::json::PrettyJsonEncoder;
pub use reading::{Acceleration, Reading};
pub use registry::{DeviceEntry, DeviceRegistry};
pub use snapshot::{Gateway, HistoryData, SnapshotBuilder, Tag};
pub use source::{ReadingSource, SourceError, StdinSource};
pub use store::{MetricStore, PrometheusStore, Series, SeriesValues};
pub use sweeper::Sweeper;
