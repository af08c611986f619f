//! Label-keyed metric series.
//!
//! The observer, the sweeper and the snapshot builder only talk to the
//! [`MetricStore`] trait. [`PrometheusStore`] is the production backend: one
//! counter vector and ten gauge vectors registered in a private
//! [`prometheus::Registry`], which is what `/metrics` exposes.

use prometheus::core::Collector;
use prometheus::proto;
use prometheus::{CounterVec, GaugeVec, Opts, Registry};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while building a metric store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Metric registration failed: {0}")]
    Registration(#[from] prometheus::Error),
}

/// Acceleration axis label value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn as_str(self) -> &'static str {
        match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        }
    }

    fn from_label(value: &str) -> Option<Self> {
        Axis::ALL.into_iter().find(|axis| axis.as_str() == value)
    }
}

/// One logical series per measurement kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Series {
    Frames,
    Rssi,
    Voltage,
    Pressure,
    Temperature,
    Humidity,
    Acceleration,
    Format,
    TxPower,
    MoveCount,
    Seqno,
}

impl Series {
    pub const ALL: [Series; 11] = [
        Series::Frames,
        Series::Rssi,
        Series::Voltage,
        Series::Pressure,
        Series::Temperature,
        Series::Humidity,
        Series::Acceleration,
        Series::Format,
        Series::TxPower,
        Series::MoveCount,
        Series::Seqno,
    ];

    /// Exported metric name.
    pub fn name(self) -> &'static str {
        match self {
            Series::Frames => "ruuvi_frames_total",
            Series::Rssi => "ruuvi_rssi_dbm",
            Series::Voltage => "ruuvi_battery_volts",
            Series::Pressure => "ruuvi_pressure_hpa",
            Series::Temperature => "ruuvi_temperature_celsius",
            Series::Humidity => "ruuvi_humidity_ratio",
            Series::Acceleration => "ruuvi_acceleration_g",
            Series::Format => "ruuvi_format",
            Series::TxPower => "ruuvi_txpower_dbm",
            Series::MoveCount => "ruuvi_movecount_total",
            Series::Seqno => "ruuvi_seqno_current",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            Series::Frames => "Total Ruuvi frames received",
            Series::Rssi => "Ruuvi tag received signal strength RSSI",
            Series::Voltage => "Ruuvi tag battery voltage",
            Series::Pressure => "Ruuvi tag sensor air pressure",
            Series::Temperature => "Ruuvi tag sensor temperature",
            Series::Humidity => "Ruuvi tag sensor relative humidity",
            Series::Acceleration => "Ruuvi tag sensor acceleration X/Y/Z",
            Series::Format => "Ruuvi frame format version (e.g. 3 or 5)",
            Series::TxPower => "Ruuvi transmit power in dBm",
            Series::MoveCount => "Ruuvi movement counter",
            Series::Seqno => "Ruuvi frame sequence number",
        }
    }

    pub fn is_counter(self) -> bool {
        matches!(self, Series::Frames)
    }

    pub fn label_names(self) -> &'static [&'static str] {
        match self {
            Series::Acceleration => &["device", "axis"],
            _ => &["device"],
        }
    }
}

/// Label set identifying one series instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Labels<'a> {
    pub device: &'a str,
    pub axis: Option<Axis>,
}

impl<'a> Labels<'a> {
    pub fn device(device: &'a str) -> Self {
        Self { device, axis: None }
    }

    pub fn axis(device: &'a str, axis: Axis) -> Self {
        Self {
            device,
            axis: Some(axis),
        }
    }

    /// Label values in the order of [`Series::label_names`].
    fn values(&self) -> Vec<&'a str> {
        match self.axis {
            Some(axis) => vec![self.device, axis.as_str()],
            None => vec![self.device],
        }
    }

    /// Labels of a collected instance, `None` if it lacks a device label.
    fn from_metric(metric: &'a proto::Metric) -> Option<Self> {
        let mut device = None;
        let mut axis = None;
        for pair in metric.get_label() {
            match pair.get_name() {
                "device" => device = Some(pair.get_value()),
                "axis" => axis = Some(Axis::from_label(pair.get_value())?),
                _ => return None,
            }
        }
        Some(Self {
            device: device?,
            axis,
        })
    }

    fn matches(&self, metric: &proto::Metric) -> bool {
        let pairs = metric.get_label();
        pairs.len() == self.values().len()
            && pairs.iter().all(|pair| match pair.get_name() {
                "device" => pair.get_value() == self.device,
                "axis" => self
                    .axis
                    .is_some_and(|axis| pair.get_value() == axis.as_str()),
                _ => false,
            })
    }
}

/// Every `(series, labels)` combination a device can own. The sweeper
/// deletes exactly these.
pub fn device_series(device: &str) -> Vec<(Series, Labels<'_>)> {
    Series::ALL
        .into_iter()
        .flat_map(|series| match series {
            Series::Acceleration => Axis::ALL
                .into_iter()
                .map(|axis| (series, Labels::axis(device, axis)))
                .collect::<Vec<_>>(),
            _ => vec![(series, Labels::device(device))],
        })
        .collect()
}

/// Every instance of one series, read in a single pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesValues {
    by_device: HashMap<String, HashMap<Option<Axis>, f64>>,
}

impl SeriesValues {
    pub fn insert(&mut self, labels: &Labels<'_>, value: f64) {
        self.by_device
            .entry(labels.device.to_string())
            .or_default()
            .insert(labels.axis, value);
    }

    pub fn get(&self, labels: &Labels<'_>) -> Option<f64> {
        self.by_device.get(labels.device)?.get(&labels.axis).copied()
    }

    /// Number of series instances.
    pub fn len(&self) -> usize {
        self.by_device.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_device.is_empty()
    }
}

/// Capability to write, read back and delete label-keyed series.
///
/// Implementations must be safe for concurrent use. None of the operations
/// fail: writing with a label set that does not fit the series, or deleting
/// a series instance that does not exist, is a no-op.
pub trait MetricStore: Send + Sync {
    fn set(&self, series: Series, labels: &Labels<'_>, value: f64);
    fn increment(&self, series: Series, labels: &Labels<'_>);
    /// Current value, or `None` when the instance has never been written or
    /// was deleted. Reading never creates an instance.
    fn get(&self, series: Series, labels: &Labels<'_>) -> Option<f64>;
    /// All current instances of `series`. Like `get`, never creates one.
    fn values(&self, series: Series) -> SeriesValues;
    fn delete(&self, series: Series, labels: &Labels<'_>);
}

/// [`MetricStore`] backed by `prometheus` metric vectors.
#[derive(Clone)]
pub struct PrometheusStore {
    registry: Registry,
    frames: CounterVec,
    gauges: HashMap<Series, GaugeVec>,
}

impl PrometheusStore {
    /// Create a store with its own registry.
    pub fn new() -> Result<Self, StoreError> {
        Self::with_registry(Registry::new())
    }

    /// Register all series in `registry`.
    pub fn with_registry(registry: Registry) -> Result<Self, StoreError> {
        let frames = CounterVec::new(
            Opts::new(Series::Frames.name(), Series::Frames.help()),
            Series::Frames.label_names(),
        )?;
        registry.register(Box::new(frames.clone()))?;

        let mut gauges = HashMap::new();
        for series in Series::ALL.into_iter().filter(|s| !s.is_counter()) {
            let gauge = GaugeVec::new(
                Opts::new(series.name(), series.help()),
                series.label_names(),
            )?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.insert(series, gauge);
        }

        Ok(Self {
            registry,
            frames,
            gauges,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn collector(&self, series: Series) -> Option<&dyn Collector> {
        if series.is_counter() {
            Some(&self.frames)
        } else {
            self.gauges.get(&series).map(|g| g as &dyn Collector)
        }
    }

    fn metric_value(series: Series, metric: &proto::Metric) -> f64 {
        if series.is_counter() {
            metric.get_counter().get_value()
        } else {
            metric.get_gauge().get_value()
        }
    }
}

impl MetricStore for PrometheusStore {
    fn set(&self, series: Series, labels: &Labels<'_>, value: f64) {
        if series.is_counter() {
            tracing::warn!(series = series.name(), "counter series cannot be set");
            return;
        }
        let Some(gauge) = self.gauges.get(&series) else {
            return;
        };
        match gauge.get_metric_with_label_values(&labels.values()) {
            Ok(instance) => instance.set(value),
            Err(error) => tracing::warn!(series = series.name(), %error, "dropping write"),
        }
    }

    fn increment(&self, series: Series, labels: &Labels<'_>) {
        let values = labels.values();
        let result = if series.is_counter() {
            self.frames
                .get_metric_with_label_values(&values)
                .map(|counter| counter.inc())
        } else {
            match self.gauges.get(&series) {
                Some(gauge) => gauge
                    .get_metric_with_label_values(&values)
                    .map(|instance| instance.inc()),
                None => Ok(()),
            }
        };
        if let Err(error) = result {
            tracing::warn!(series = series.name(), %error, "dropping increment");
        }
    }

    fn get(&self, series: Series, labels: &Labels<'_>) -> Option<f64> {
        // Lookup through collect() so that reading back a missing device does
        // not resurrect an empty series.
        let families = self.collector(series)?.collect();
        families
            .iter()
            .flat_map(|family| family.get_metric())
            .find(|metric| labels.matches(metric))
            .map(|metric| Self::metric_value(series, metric))
    }

    fn values(&self, series: Series) -> SeriesValues {
        let mut values = SeriesValues::default();
        let Some(collector) = self.collector(series) else {
            return values;
        };
        for family in collector.collect() {
            for metric in family.get_metric() {
                if let Some(labels) = Labels::from_metric(metric) {
                    values.insert(&labels, Self::metric_value(series, metric));
                }
            }
        }
        values
    }

    fn delete(&self, series: Series, labels: &Labels<'_>) {
        let values = labels.values();
        // Missing instances are expected here: optional fields are only
        // written when present.
        let _ = if series.is_counter() {
            self.frames.remove_label_values(&values)
        } else {
            match self.gauges.get(&series) {
                Some(gauge) => gauge.remove_label_values(&values),
                None => Ok(()),
            }
        };
    }
}
