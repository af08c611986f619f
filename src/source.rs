//! Reading sources.
//!
//! Scanning and payload decoding happen outside this crate. A source hands
//! over readings that are already decoded, as a channel of results so that
//! undecodable input can be reported without stopping the stream.

use crate::reading::Reading;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Error types for reading sources.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// A line that is not a valid reading
    #[error("Invalid reading on line {line}: {reason}")]
    InvalidReading { line: usize, reason: String },
    /// The underlying input failed
    #[error("I/O error: {0}")]
    Io(String),
}

/// Convenience alias for readings or per-item source errors.
pub type ReadingResult = Result<Reading, SourceError>;

/// Channel buffer size for reading results.
pub const READING_CHANNEL_BUFFER_SIZE: usize = 100;

/// Source abstraction so the run loop can be tested without a live feed.
pub trait ReadingSource: Send + Sync {
    fn start(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<ReadingResult>, SourceError>> + Send + '_>>;
}

/// Newline-delimited JSON readings on standard input.
///
/// Each line holds one reading, for example
/// `{"address": "AA:BB:CC:DD:EE:FF", "rssi": -60, "voltage": 3000, "raw": "99040512FC"}`.
/// Measurements that the tag did not send are simply left out.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinSource;

impl ReadingSource for StdinSource {
    fn start(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<ReadingResult>, SourceError>> + Send + '_>>
    {
        Box::pin(async move { Ok(spawn_line_reader(BufReader::new(tokio::io::stdin()))) })
    }
}

/// Parse one JSON line into a [`Reading`].
pub fn parse_line(line_number: usize, line: &str) -> ReadingResult {
    serde_json::from_str(line).map_err(|error| SourceError::InvalidReading {
        line: line_number,
        reason: error.to_string(),
    })
}

/// Read JSON lines from `reader` on a background task until end of input.
///
/// Blank lines are skipped. The channel closes when the input ends, after
/// an I/O error has been delivered, or when the receiver is dropped.
pub fn spawn_line_reader<R>(reader: R) -> mpsc::Receiver<ReadingResult>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(READING_CHANNEL_BUFFER_SIZE);

    tokio::spawn(async move {
        let mut lines = reader.lines();
        let mut line_number = 0;
        loop {
            let result = match lines.next_line().await {
                Ok(Some(line)) => {
                    line_number += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    parse_line(line_number, &line)
                }
                Ok(None) => break,
                Err(error) => {
                    let _ = tx.send(Err(SourceError::Io(error.to_string()))).await;
                    break;
                }
            };
            if tx.send(result).await.is_err() {
                break;
            }
        }
    });

    rx
}
