//! JSON message types for the subscriber-facing WebSocket protocol.
//!
//! # Message flow
//!
//! ```text
//! Subscriber → Server:  {"type":"start_workout","data":{...}}   InboundMessage
//! Server → Subscriber:  {"type":"success","data":{...}}          Reply (to one subscriber)
//! Server → All:         {"type":"workout_stats","data":{...},
//!                        "timestamp":"2024-05-01T07:30:00Z"}     event envelope
//! ```
//!
//! Inbound messages are parsed in two steps: the envelope first (any `type`
//! string is accepted), then the `type` is matched against [`ControlKind`].
//! That keeps "malformed JSON" and "unknown command" distinguishable so the
//! subscriber gets a precise error back.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::domain::info::DeviceInfo;
use crate::domain::state::WorkoutState;
use crate::protocol::codec::ProtocolError;

// ── Subscriber → Server ───────────────────────────────────────────────────────

/// The envelope every subscriber message arrives in.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    /// Command arguments.  Missing or `null` becomes an empty object.
    #[serde(default, deserialize_with = "object_or_null")]
    pub data: Map<String, Value>,
}

fn object_or_null<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Commands a subscriber may issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    StartWorkout,
    StopWorkout,
    GetStatus,
}

impl ControlKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlKind::StartWorkout => "start_workout",
            ControlKind::StopWorkout => "stop_workout",
            ControlKind::GetStatus => "get_status",
        }
    }
}

impl FromStr for ControlKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start_workout" => Ok(ControlKind::StartWorkout),
            "stop_workout" => Ok(ControlKind::StopWorkout),
            "get_status" => Ok(ControlKind::GetStatus),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Server → Subscriber (replies) ─────────────────────────────────────────────

/// Reply sent to the one subscriber that issued a command.
///
/// # Serde representation
///
/// ```json
/// {"type":"error","data":{"message":"workout_type is required","code":"ERROR"}}
/// {"type":"success","data":{"action":"stop_workout","message":"Workout stopped successfully"}}
/// {"type":"status","data":{"connected":false,"serial":"",...}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Reply {
    Error { message: String, code: String },
    Success { action: String, message: String },
    Status(DeviceInfo),
}

/// Error code carried by every `error` reply.
pub const ERROR_CODE: &str = "ERROR";

impl Reply {
    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error {
            message: message.into(),
            code: ERROR_CODE.to_string(),
        }
    }

    pub fn success(action: ControlKind, message: impl Into<String>) -> Self {
        Reply::Success {
            action: action.as_str().to_string(),
            message: message.into(),
        }
    }

    pub fn status(info: DeviceInfo) -> Self {
        Reply::Status(info)
    }
}

// ── Server → All (events) ─────────────────────────────────────────────────────

/// Kinds of broadcast events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WorkoutStats,
    WorkoutState,
    WorkoutStarted,
    WorkoutEnded,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::WorkoutStats => "workout_stats",
            EventKind::WorkoutState => "workout_state",
            EventKind::WorkoutStarted => "workout_started",
            EventKind::WorkoutEnded => "workout_ended",
        }
    }
}

/// The timestamped envelope every broadcast event is wrapped in.
#[derive(Debug, Serialize)]
pub struct EventEnvelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: &'a T,
    pub timestamp: String,
}

/// Payload of a `workout_state` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkoutStateInfo {
    pub operational_state: String,
    pub workout_state: WorkoutState,
    pub is_active: bool,
}

/// Payload of `workout_started` and `workout_ended` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionNotice {
    pub message: String,
    pub state: WorkoutState,
}

impl TransitionNotice {
    pub fn started(state: WorkoutState) -> Self {
        Self {
            message: "Workout started".to_string(),
            state,
        }
    }

    pub fn ended(state: WorkoutState) -> Self {
        Self {
            message: "Workout ended".to_string(),
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inbound_missing_data_is_empty_object() {
        let msg: InboundMessage = serde_json::from_str(r#"{"type":"get_status"}"#).unwrap();
        assert_eq!(msg.kind, "get_status");
        assert!(msg.data.is_empty());
    }

    #[test]
    fn test_inbound_null_data_is_empty_object() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"type":"stop_workout","data":null}"#).unwrap();
        assert!(msg.data.is_empty());
    }

    #[test]
    fn test_inbound_rejects_non_object_data() {
        let result = serde_json::from_str::<InboundMessage>(r#"{"type":"x","data":[1,2]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_control_kind_parse_known_and_unknown() {
        assert_eq!("get_status".parse::<ControlKind>(), Ok(ControlKind::GetStatus));
        assert_eq!(
            "reboot".parse::<ControlKind>(),
            Err(ProtocolError::UnknownType("reboot".to_string()))
        );
    }

    #[test]
    fn test_reply_error_shape() {
        // Arrange
        let reply = Reply::error("Invalid message format");

        // Act
        let json = serde_json::to_value(&reply).unwrap();

        // Assert
        assert_eq!(
            json,
            json!({"type":"error","data":{"message":"Invalid message format","code":"ERROR"}})
        );
    }

    #[test]
    fn test_reply_success_shape() {
        let reply = Reply::success(ControlKind::StartWorkout, "Workout started successfully");
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "success");
        assert_eq!(json["data"]["action"], "start_workout");
    }

    #[test]
    fn test_reply_status_carries_device_info() {
        let reply = Reply::status(DeviceInfo::default());
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["data"]["connected"], false);
    }

    #[test]
    fn test_workout_state_info_shape() {
        let info = WorkoutStateInfo {
            operational_state: "ready".to_string(),
            workout_state: WorkoutState::WorkoutRow,
            is_active: true,
        };
        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            json!({"operational_state":"ready","workout_state":"workout_row","is_active":true})
        );
    }

    #[test]
    fn test_transition_notice_messages() {
        assert_eq!(
            TransitionNotice::started(WorkoutState::WorkoutRow).message,
            "Workout started"
        );
        assert_eq!(
            TransitionNotice::ended(WorkoutState::WorkoutEnd).message,
            "Workout ended"
        );
    }
}
