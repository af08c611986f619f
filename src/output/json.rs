//! Pretty-printed JSON encoder for the history document.

use crate::output::{EncodeError, SnapshotEncoder};
use crate::snapshot::HistoryData;
use serde::Serialize;
use serde_json::Serializer;
use serde_json::ser::PrettyFormatter;

/// Indentation used by the Ruuvi Gateway history endpoint.
const INDENT: &[u8] = b"    ";

/// Encodes [`HistoryData`] as JSON indented with four spaces.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrettyJsonEncoder;

impl SnapshotEncoder for PrettyJsonEncoder {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode(&self, history: &HistoryData) -> Result<String, EncodeError> {
        let mut body = Vec::with_capacity(512);
        let mut serializer = Serializer::with_formatter(&mut body, PrettyFormatter::with_indent(INDENT));
        history.serialize(&mut serializer)?;
        Ok(String::from_utf8(body)?)
    }
}
