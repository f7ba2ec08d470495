//! Subscriber command routing.
//!
//! The router turns one inbound text message into exactly one [`Reply`].  It
//! owns no connection and no device: it decodes, validates what it can
//! without the monitor, and forwards the rest through [`DeviceControl`].
//!
//! ```text
//! text ─► decode_inbound ─► ControlRequest::from_kind ─► DeviceControl
//!   │                               │                         │
//!   └─ "Invalid message format"     ├─ "Unknown message type: X"
//!                                   └─ "workout_type is required"
//!                                            "Failed to …: <reason>" ─┘
//! ```

use async_trait::async_trait;
use erg_core::{decode_inbound, ControlKind, Reply, WorkoutParams};
use tracing::debug;

use crate::domain::{ControlError, ControlRequest, ControlResponse};

/// Reply text for anything that is not a JSON object with a string `type`.
pub const INVALID_FORMAT: &str = "Invalid message format";

// ── Device control seam ───────────────────────────────────────────────────────

/// Request/response access to the monitor.
///
/// Implemented by the device manager's control client; mocked in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceControl: Send + Sync {
    async fn send_control(&self, request: ControlRequest) -> Result<ControlResponse, ControlError>;
}

// ── Router ────────────────────────────────────────────────────────────────────

/// Maps subscriber commands onto device control requests.
#[derive(Debug, Clone)]
pub struct Router<C> {
    control: C,
}

impl<C: DeviceControl> Router<C> {
    pub fn new(control: C) -> Self {
        Self { control }
    }

    /// Handles one inbound text message and returns the reply for its sender.
    pub async fn dispatch(&self, text: &str) -> Reply {
        let message = match decode_inbound(text) {
            Ok(message) => message,
            Err(e) => {
                debug!("rejecting inbound message: {e}");
                return Reply::error(INVALID_FORMAT);
            }
        };

        let request = match ControlRequest::from_kind(&message.kind, &message.data) {
            Ok(request) => request,
            Err(ControlError::UnknownRequest(kind)) => {
                return Reply::error(format!("Unknown message type: {kind}"))
            }
            Err(e) => return Reply::error(e.to_string()),
        };

        match request {
            ControlRequest::StartWorkout(params) => self.start_workout(params).await,
            ControlRequest::StopWorkout => self.stop_workout().await,
            ControlRequest::GetStatus => self.get_status().await,
        }
    }

    async fn start_workout(&self, params: WorkoutParams) -> Reply {
        match self.control.send_control(ControlRequest::StartWorkout(params)).await {
            Ok(_) => Reply::success(ControlKind::StartWorkout, "Workout started successfully"),
            Err(e) if e.is_delivery_failure() => {
                Reply::error(format!("Failed to send start command: {e}"))
            }
            Err(e) => Reply::error(format!("Failed to start workout: {e}")),
        }
    }

    async fn stop_workout(&self) -> Reply {
        match self.control.send_control(ControlRequest::StopWorkout).await {
            Ok(_) => Reply::success(ControlKind::StopWorkout, "Workout stopped successfully"),
            Err(e) if e.is_delivery_failure() => {
                Reply::error(format!("Failed to send stop command: {e}"))
            }
            Err(e) => Reply::error(format!("Failed to stop workout: {e}")),
        }
    }

    async fn get_status(&self) -> Reply {
        match self.control.send_control(ControlRequest::GetStatus).await {
            Ok(ControlResponse::Status(info)) => Reply::status(info),
            Ok(ControlResponse::Done) => Reply::error("Failed to get status: no status returned"),
            Err(e) => Reply::error(format!("Failed to get status: {e}")),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use erg_core::{DeviceError, DeviceInfo, WorkoutError, WorkoutKind};
    use mockall::predicate::eq;

    use super::*;

    fn router(mock: MockDeviceControl) -> Router<MockDeviceControl> {
        Router::new(mock)
    }

    fn error_message(reply: Reply) -> String {
        match reply {
            Reply::Error { message, code } => {
                assert_eq!(code, "ERROR");
                message
            }
            other => panic!("expected error reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_json_is_rejected_without_device_call() {
        // Arrange: any device call would fail the test
        let mut mock = MockDeviceControl::new();
        mock.expect_send_control().never();

        // Act
        let reply = router(mock).dispatch("{not json").await;

        // Assert
        assert_eq!(error_message(reply), "Invalid message format");
    }

    #[tokio::test]
    async fn test_unknown_type_is_named_in_reply() {
        let mut mock = MockDeviceControl::new();
        mock.expect_send_control().never();

        let reply = router(mock).dispatch(r#"{"type":"calibrate"}"#).await;

        assert_eq!(error_message(reply), "Unknown message type: calibrate");
    }

    #[tokio::test]
    async fn test_start_without_workout_type_is_rejected_locally() {
        let mut mock = MockDeviceControl::new();
        mock.expect_send_control().never();

        let reply = router(mock)
            .dispatch(r#"{"type":"start_workout","data":{}}"#)
            .await;

        assert_eq!(error_message(reply), "workout_type is required");
    }

    #[tokio::test]
    async fn test_start_forwards_params_and_reports_success() {
        // Arrange
        let mut expected = WorkoutParams::new(WorkoutKind::FixedTime);
        expected.time = Some(60);
        let mut mock = MockDeviceControl::new();
        mock.expect_send_control()
            .with(eq(ControlRequest::StartWorkout(expected)))
            .times(1)
            .returning(|_| Ok(ControlResponse::Done));

        // Act
        let reply = router(mock)
            .dispatch(r#"{"type":"start_workout","data":{"workout_type":"fixed_time","time":60}}"#)
            .await;

        // Assert
        assert_eq!(
            reply,
            Reply::Success {
                action: "start_workout".to_string(),
                message: "Workout started successfully".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_start_validation_failure_is_reported_as_start_failure() {
        let mut mock = MockDeviceControl::new();
        mock.expect_send_control()
            .times(1)
            .returning(|_| Err(ControlError::Validation(WorkoutError::MissingDistance)));

        let reply = router(mock)
            .dispatch(r#"{"type":"start_workout","data":{"workout_type":"fixed_distance"}}"#)
            .await;

        assert_eq!(
            error_message(reply),
            "Failed to start workout: distance is required for fixed_distance workout"
        );
    }

    #[tokio::test]
    async fn test_start_timeout_is_reported_as_send_failure() {
        let mut mock = MockDeviceControl::new();
        mock.expect_send_control()
            .returning(|_| Err(ControlError::Timeout));

        let reply = router(mock)
            .dispatch(r#"{"type":"start_workout","data":{"workout_type":"just_row"}}"#)
            .await;

        assert_eq!(
            error_message(reply),
            "Failed to send start command: timeout waiting for device manager"
        );
    }

    #[tokio::test]
    async fn test_stop_not_connected() {
        let mut mock = MockDeviceControl::new();
        mock.expect_send_control()
            .with(eq(ControlRequest::StopWorkout))
            .returning(|_| Err(ControlError::NotConnected));

        let reply = router(mock).dispatch(r#"{"type":"stop_workout"}"#).await;

        assert_eq!(
            error_message(reply),
            "Failed to stop workout: device not connected"
        );
    }

    #[tokio::test]
    async fn test_stop_success() {
        let mut mock = MockDeviceControl::new();
        mock.expect_send_control()
            .returning(|_| Ok(ControlResponse::Done));

        let reply = router(mock).dispatch(r#"{"type":"stop_workout"}"#).await;

        assert_eq!(
            reply,
            Reply::success(ControlKind::StopWorkout, "Workout stopped successfully")
        );
    }

    #[tokio::test]
    async fn test_stop_device_failure() {
        let mut mock = MockDeviceControl::new();
        mock.expect_send_control()
            .returning(|_| Err(ControlError::Device(DeviceError::Rejected("busy".to_string()))));

        let reply = router(mock).dispatch(r#"{"type":"stop_workout"}"#).await;

        assert_eq!(
            error_message(reply),
            "Failed to stop workout: device rejected command: busy"
        );
    }

    #[tokio::test]
    async fn test_get_status_returns_cached_info() {
        let info = DeviceInfo {
            connected: true,
            serial: "431234567".to_string(),
            model: 5,
            battery: 80,
            erg_type: "static_d".to_string(),
            op_state: "ready".to_string(),
        };
        let returned = info.clone();
        let mut mock = MockDeviceControl::new();
        mock.expect_send_control()
            .with(eq(ControlRequest::GetStatus))
            .returning(move |_| Ok(ControlResponse::Status(returned.clone())));

        let reply = router(mock).dispatch(r#"{"type":"get_status"}"#).await;

        assert_eq!(reply, Reply::status(info));
    }

    #[tokio::test]
    async fn test_get_status_failure() {
        let mut mock = MockDeviceControl::new();
        mock.expect_send_control()
            .returning(|_| Err(ControlError::Stopped));

        let reply = router(mock).dispatch(r#"{"type":"get_status"}"#).await;

        assert_eq!(
            error_message(reply),
            "Failed to get status: device manager is not running"
        );
    }
}
