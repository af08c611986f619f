//! Prometheus text exposition of the metric store.

use crate::output::EncodeError;
use prometheus::{Encoder, Registry, TextEncoder};

/// Encoded `/metrics` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exposition {
    pub content_type: String,
    pub body: String,
}

/// Render every series in `registry` in the Prometheus text format.
pub fn render_prometheus(registry: &Registry) -> Result<Exposition, EncodeError> {
    let encoder = TextEncoder::new();
    let mut body = Vec::new();
    encoder.encode(&registry.gather(), &mut body)?;

    Ok(Exposition {
        content_type: encoder.format_type().to_string(),
        body: String::from_utf8(body)?,
    })
}
