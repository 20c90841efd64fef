//! Wire protocol for remote module invocation.
//!
//! Requests carry a base64-over-JSON encoding of `(payload, kwargs)` plus
//! headers with the serialized ambient context. Responses are streamed and
//! segmented by a literal delimiter token (not a newline, so segments may
//! span lines). Each segment is a tagged frame: binary-object frames start
//! with [`OBJECT_MARKER`] followed by base64 of the JSON encoding of the
//! value; anything else decodes as plain UTF-8 text. The explicit tag
//! replaces parse-or-fallback detection while keeping both shapes
//! interchangeable on the wire.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::core::errors::{ModError, Result};

/// Literal token separating response segments.
pub const SEGMENT_DELIMITER: &str = "<|lazyllm_delimiter|>";

/// Marker opening a binary-object frame.
pub const OBJECT_MARKER: &str = "<|obj|>";

/// Header carrying the serialized ambient parameter map.
pub const GLOBAL_PARAMS_HEADER: &str = "Global-Parameters";

/// Header carrying the session identifier.
pub const SESSION_ID_HEADER: &str = "Session-ID";

/// A decoded response segment: either a rich value or raw text.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Object(Value),
    Text(String),
}

impl Segment {
    pub fn into_value(self) -> Value {
        match self {
            Segment::Object(v) => v,
            Segment::Text(s) => Value::String(s),
        }
    }

    /// Render the segment the way a sink should display it.
    pub fn display_text(&self) -> String {
        match self {
            Segment::Object(Value::String(s)) => s.clone(),
            Segment::Object(v) => v.to_string(),
            Segment::Text(s) => s.clone(),
        }
    }
}

/// Encode a value as a binary-object frame.
pub fn encode_segment(value: &Value) -> Result<String> {
    let raw = serde_json::to_vec(value)?;
    Ok(format!("{OBJECT_MARKER}{}", BASE64.encode(raw)))
}

/// Decode one response segment. A well-formed binary-object frame yields
/// the original value; everything else is UTF-8 text (lossy on invalid
/// bytes, the remote side owns its encoding).
pub fn decode_segment(bytes: &[u8]) -> Segment {
    if let Some(rest) = bytes.strip_prefix(OBJECT_MARKER.as_bytes()) {
        if let Ok(raw) = BASE64.decode(rest) {
            if let Ok(value) = serde_json::from_slice(&raw) {
                return Segment::Object(value);
            }
        }
    }
    Segment::Text(String::from_utf8_lossy(bytes).into_owned())
}

/// Encode a request body or header value: base64 over the JSON encoding.
pub fn encode_request<T: Serialize>(value: &T) -> Result<String> {
    let raw = serde_json::to_vec(value)?;
    Ok(BASE64.encode(raw))
}

/// Inverse of [`encode_request`].
pub fn decode_request<T: DeserializeOwned>(text: &str) -> Result<T> {
    let raw = BASE64
        .decode(text.trim())
        .map_err(|e| ModError::serialization("base64", e))?;
    Ok(serde_json::from_slice(&raw)?)
}
