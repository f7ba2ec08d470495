//! JSON codec for the subscriber protocol.
//!
//! # Frame batching
//!
//! The server may coalesce several queued payloads into one WebSocket text
//! frame.  Payloads inside a frame are separated by [`FRAME_DELIMITER`]; since
//! `serde_json` never emits a raw newline in compact output, splitting on the
//! delimiter always recovers the original payloads.
//!
//! ```text
//! {"type":"workout_stats",...}\n{"type":"workout_stats",...}\n{"type":"success",...}
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::protocol::messages::{EventEnvelope, EventKind, InboundMessage, Reply};

/// Separator between payloads batched into one text frame.
pub const FRAME_DELIMITER: char = '\n';

/// Errors that can occur while encoding or decoding envelopes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The text was not a JSON object with a string `type` field.
    #[error("invalid message format: {0}")]
    InvalidJson(String),

    /// The `type` field named a command this server does not implement.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// A payload could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Parses one subscriber payload into an [`InboundMessage`].
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidJson`] if the text is not a JSON object
/// with a string `type` and an optional object `data`.
pub fn decode_inbound(text: &str) -> Result<InboundMessage, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
}

/// Wraps `data` in a timestamped event envelope and serializes it.
///
/// # Examples
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use erg_core::protocol::{encode_event, EventKind, TransitionNotice};
/// use erg_core::WorkoutState;
///
/// let at = Utc.with_ymd_and_hms(2024, 5, 1, 7, 30, 0).unwrap();
/// let json = encode_event(
///     EventKind::WorkoutStarted,
///     &TransitionNotice::started(WorkoutState::WorkoutRow),
///     at,
/// )
/// .unwrap();
/// assert!(json.contains(r#""timestamp":"2024-05-01T07:30:00Z""#));
/// ```
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if `data` fails to serialize.
pub fn encode_event<T: Serialize>(
    kind: EventKind,
    data: &T,
    at: DateTime<Utc>,
) -> Result<String, ProtocolError> {
    let envelope = EventEnvelope {
        kind,
        data,
        timestamp: format_timestamp(at),
    };
    serde_json::to_string(&envelope).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Serializes a command reply.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if the reply fails to serialize.
pub fn encode_reply(reply: &Reply) -> Result<String, ProtocolError> {
    serde_json::to_string(reply).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Formats an event timestamp as RFC 3339 with whole seconds and a `Z` suffix.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Appends `payload` to a batch frame, inserting the delimiter when the
/// frame already holds a payload.
pub fn append_to_batch(frame: &mut String, payload: &str) {
    if !frame.is_empty() {
        frame.push(FRAME_DELIMITER);
    }
    frame.push_str(payload);
}

/// Splits a (possibly batched) text frame back into its payloads.
pub fn split_batch(frame: &str) -> impl Iterator<Item = &str> {
    frame.split(FRAME_DELIMITER).filter(|part| !part.is_empty())
}
