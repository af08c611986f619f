//! Encoders for the two reporting endpoints.
//!
//! The history document goes through the [`SnapshotEncoder`] trait so the
//! HTTP layer can be exercised with encoders that fail. The metrics feed is
//! rendered straight from the prometheus registry.

pub mod exposition;
pub mod json;

use crate::snapshot::HistoryData;
use thiserror::Error;

/// Errors produced while encoding a response body.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Metrics encoding failed: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("Encoded body is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Trait for turning a history snapshot into a response body.
pub trait SnapshotEncoder: Send + Sync {
    /// MIME type of the encoded body.
    fn content_type(&self) -> &'static str;

    /// Encode the whole document. No partial output is produced on error.
    fn encode(&self, history: &HistoryData) -> Result<String, EncodeError>;
}
