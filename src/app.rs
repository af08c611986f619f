//! Core application runner for `ruuvi-exporter`.
//!
//! Wires the registry, metric store, sweeper and HTTP server together. Kept
//! apart from process setup in `main.rs` so the run loop can be driven with
//! an injected reading source, listener and interrupt.

use crate::clock::{Clock, SystemClock};
use crate::gateway::resolve_gateway_mac;
use crate::mac_address::canonical_address;
use crate::observer::Observer;
use crate::output::json::PrettyJsonEncoder;
use crate::registry::DeviceRegistry;
use crate::server::{AppState, create_router};
use crate::snapshot::SnapshotBuilder;
use crate::source::{ReadingResult, ReadingSource, SourceError};
use crate::store::{PrometheusStore, StoreError};
use crate::sweeper::Sweeper;
use axum::Router;
use clap::Parser;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinError;

/// Command line and environment configuration.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Address the HTTP server listens on.
    #[arg(long, env = "RUUVI_EXPORTER_LISTEN", default_value = "0.0.0.0:9521")]
    pub listen: SocketAddr,

    /// Forget a tag and its metrics after this long without readings.
    /// Accepts duration with suffix: 30s, 1m, 500ms, 2h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, env = "RUUVI_EXPORTER_TTL", default_value = "1m", value_parser = parse_duration)]
    pub ttl: Duration,

    /// How often to look for silent tags. Same format as --ttl.
    #[arg(
        long,
        env = "RUUVI_EXPORTER_SWEEP_INTERVAL",
        default_value = "1m",
        value_parser = parse_duration
    )]
    pub sweep_interval: Duration,

    /// Hardware address reported as gw_mac in /history.
    /// Detected from the first active network interface when omitted.
    #[arg(long, env = "RUUVI_EXPORTER_GATEWAY_MAC", value_name = "MAC")]
    pub gateway_mac: Option<String>,

    /// Verbose output, log rejected readings and device churn
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

/// Errors returned by the run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("background task failed: {0}")]
    Task(#[from] JoinError),
}

/// Parse a duration string like "3s", "1m", "500ms", "2h" or plain seconds.
///
/// # Examples
/// ```
/// use ruuvi_exporter::app::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    // "ms" before "m" and "s"
    const UNITS: [(&str, &str, u64); 4] = [
        ("ms", "milliseconds", 1),
        ("h", "hours", 3_600_000),
        ("m", "minutes", 60_000),
        ("s", "seconds", 1_000),
    ];

    let (number, unit, millis_per_unit) = UNITS
        .iter()
        .find_map(|&(suffix, unit, scale)| {
            src.strip_suffix(suffix).map(|number| (number, unit, scale))
        })
        .unwrap_or((src, "duration", 1_000));

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid {unit}: {number}"))?;
    value
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("{unit} out of range: {number}"))
}

/// Shared state of one exporter instance.
#[derive(Clone)]
pub struct Exporter {
    registry: Arc<DeviceRegistry>,
    store: Arc<PrometheusStore>,
    clock: Arc<dyn Clock>,
    gateway_mac: String,
    ttl: Duration,
}

impl Exporter {
    pub fn new(
        store: PrometheusStore,
        clock: Arc<dyn Clock>,
        gateway_mac: String,
        ttl: Duration,
    ) -> Self {
        Self {
            registry: Arc::new(DeviceRegistry::new()),
            store: Arc::new(store),
            clock,
            gateway_mac,
            ttl,
        }
    }

    /// Build an exporter on the system clock, resolving the gateway address
    /// from the host unless one is configured.
    pub fn from_options(options: &Options) -> Result<Self, RunError> {
        let gateway_mac = match options.gateway_mac.as_deref() {
            Some(mac) => canonical_address(mac),
            None => resolve_gateway_mac(),
        };
        Ok(Self::new(
            PrometheusStore::new()?,
            Arc::new(SystemClock),
            gateway_mac,
            options.ttl,
        ))
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<PrometheusStore> {
        &self.store
    }

    pub fn observer(&self) -> Observer {
        Observer::new(
            self.registry.clone(),
            self.store.clone(),
            self.clock.clone(),
        )
    }

    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            self.registry.clone(),
            self.store.clone(),
            self.clock.clone(),
            self.ttl,
        )
    }

    pub fn snapshot_builder(&self) -> SnapshotBuilder {
        SnapshotBuilder::new(
            self.registry.clone(),
            self.store.clone(),
            self.gateway_mac.clone(),
        )
    }

    pub fn router(&self) -> Router {
        create_router(AppState {
            snapshots: self.snapshot_builder(),
            encoder: Arc::new(PrettyJsonEncoder),
            metrics: self.store.registry().clone(),
            clock: self.clock.clone(),
        })
    }
}

/// Feed readings to `observer` until the channel closes.
///
/// Rejected readings are logged and skipped. Returns the number of readings
/// observed.
pub async fn ingest(mut readings: mpsc::Receiver<ReadingResult>, observer: Observer) -> u64 {
    let mut observed = 0;
    while let Some(result) = readings.recv().await {
        match result {
            Ok(reading) => {
                observer.observe(&reading);
                observed += 1;
            }
            Err(error) => tracing::debug!(%error, "reading rejected"),
        }
    }
    tracing::info!(observed, "reading source closed");
    observed
}

async fn stopped(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Serve `exporter` on `listener` and ingest from `source` until `interrupt`
/// resolves.
///
/// The HTTP server keeps answering after the source closes, so the last
/// readings stay visible until their devices expire.
pub async fn serve<F>(
    exporter: Exporter,
    listener: TcpListener,
    sweep_interval: Duration,
    source: &dyn ReadingSource,
    interrupt: F,
) -> Result<(), RunError>
where
    F: Future<Output = ()>,
{
    let readings = source.start().await?;
    let (stop, shutdown) = watch::channel(false);

    let sweeper = tokio::spawn(exporter.sweeper().run(sweep_interval, shutdown.clone()));
    let server = axum::serve(listener, exporter.router())
        .with_graceful_shutdown(stopped(shutdown));
    let server = tokio::spawn(async move { server.await });
    let ingest = tokio::spawn(ingest(readings, exporter.observer()));

    interrupt.await;
    tracing::info!("shutting down");
    ingest.abort();
    let _ = stop.send(true);

    server.await??;
    sweeper.await?;
    Ok(())
}

/// Run the exporter until Ctrl-C.
pub async fn run(options: Options, source: &dyn ReadingSource) -> Result<(), RunError> {
    let exporter = Exporter::from_options(&options)?;
    let listener = TcpListener::bind(options.listen).await?;
    tracing::info!(
        listen = %listener.local_addr()?,
        gw_mac = %exporter.snapshot_builder().gateway_mac(),
        ttl = ?options.ttl,
        "exporter started"
    );

    serve(
        exporter,
        listener,
        options.sweep_interval,
        source,
        shutdown_signal(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::reading::Reading;
    use crate::store::{Labels, MetricStore, Series};
    use crate::test_utils::{TEST_MAC, base_reading, test_epoch};
    use std::pin::Pin;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    struct FakeSource {
        results: Mutex<Vec<ReadingResult>>,
        fail: bool,
    }

    impl FakeSource {
        fn new(results: Vec<ReadingResult>) -> Self {
            Self {
                results: Mutex::new(results),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                results: Mutex::new(Vec::new()),
                fail: true,
            }
        }
    }

    impl ReadingSource for FakeSource {
        fn start(
            &self,
        ) -> Pin<
            Box<
                dyn Future<Output = Result<mpsc::Receiver<ReadingResult>, SourceError>>
                    + Send
                    + '_,
            >,
        > {
            let results = self.results.lock().unwrap().clone();
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    return Err(SourceError::Io("no input".to_string()));
                }
                let (tx, rx) = mpsc::channel::<ReadingResult>(results.len().max(1));
                tokio::spawn(async move {
                    for r in results {
                        let _ = tx.send(r).await;
                    }
                });
                Ok(rx)
            })
        }
    }

    fn exporter() -> Exporter {
        Exporter::new(
            PrometheusStore::new().unwrap(),
            Arc::new(ManualClock::new(test_epoch())),
            "B8:27:EB:00:00:01".to_string(),
            Duration::from_secs(60),
        )
    }

    fn scenario_reading() -> Reading {
        let mut reading = base_reading("aa:bb:cc:dd:ee:ff");
        reading.voltage = Some(3000);
        reading.raw_bytes = vec![0x05, 0x12, 0x34];
        reading
    }

    #[test]
    fn test_parse_duration_suffixes() {
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn test_parse_duration_with_whitespace() {
        assert_eq!(parse_duration("  5s  ").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("10 m").unwrap(), Duration::from_secs(600));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert_eq!(parse_duration("").unwrap_err(), "empty duration string");
        assert_eq!(parse_duration("abc").unwrap_err(), "invalid duration: abc");
        assert_eq!(parse_duration("xs").unwrap_err(), "invalid seconds: x");
        assert_eq!(parse_duration("-1m").unwrap_err(), "invalid minutes: -1");
        assert!(parse_duration("18446744073709551615h").is_err());
    }

    #[test]
    fn test_options_defaults() {
        let options = Options::try_parse_from(["ruuvi-exporter"]).unwrap();
        assert_eq!(options.listen, "0.0.0.0:9521".parse().unwrap());
        assert_eq!(options.ttl, Duration::from_secs(60));
        assert_eq!(options.sweep_interval, Duration::from_secs(60));
        assert_eq!(options.gateway_mac, None);
        assert!(!options.verbose);
    }

    #[test]
    fn test_options_overrides() {
        let options = Options::try_parse_from([
            "ruuvi-exporter",
            "--listen",
            "127.0.0.1:9000",
            "--ttl",
            "5m",
            "--sweep-interval",
            "10s",
            "--gateway-mac",
            "b8:27:eb:00:00:01",
            "-v",
        ])
        .unwrap();
        assert_eq!(options.listen.port(), 9000);
        assert_eq!(options.ttl, Duration::from_secs(300));
        assert_eq!(options.sweep_interval, Duration::from_secs(10));
        assert!(options.verbose);

        let exporter = Exporter::from_options(&options).unwrap();
        assert_eq!(
            exporter.snapshot_builder().gateway_mac(),
            "B8:27:EB:00:00:01"
        );
    }

    #[test]
    fn test_options_rejects_bad_duration() {
        assert!(Options::try_parse_from(["ruuvi-exporter", "--ttl", "soon"]).is_err());
    }

    #[tokio::test]
    async fn test_ingest_observes_readings_and_skips_errors() {
        let exporter = exporter();
        let source = FakeSource::new(vec![
            Ok(scenario_reading()),
            Err(SourceError::InvalidReading {
                line: 2,
                reason: "bad".to_string(),
            }),
            Ok(base_reading("11:11:11:11:11:11")),
        ]);

        let readings = source.start().await.unwrap();
        assert_eq!(ingest(readings, exporter.observer()).await, 2);

        assert_eq!(exporter.registry().len(), 2);
        let device = Labels::device(TEST_MAC);
        assert_eq!(exporter.store().get(Series::Voltage, &device), Some(3.0));
        assert_eq!(exporter.store().get(Series::Format, &device), Some(3.0));
    }

    #[tokio::test]
    async fn test_serve_fails_when_source_cannot_start() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let result = serve(
            exporter(),
            listener,
            Duration::from_secs(60),
            &FakeSource::failing(),
            async {},
        )
        .await;
        assert!(matches!(result, Err(RunError::Source(SourceError::Io(_)))));
    }

    #[tokio::test]
    async fn test_serve_answers_history_until_interrupted() {
        let exporter = exporter();
        let registry = exporter.registry().clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let source = FakeSource::new(vec![Ok(scenario_reading())]);

        let mut response = String::new();
        let interrupt = async {
            while registry.is_empty() {
                tokio::task::yield_now().await;
            }
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET /history HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
            stream.read_to_string(&mut response).await.unwrap();
        };

        serve(exporter, listener, Duration::from_secs(60), &source, interrupt)
            .await
            .unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("\"gw_mac\": \"B8:27:EB:00:00:01\""));
        assert!(response.contains("\"data\": \"0201061BFF9904051234\""));
        assert_eq!(registry.len(), 1);
    }
}
