//! Command types for the gatepassd protocol

use chrono::{DateTime, Utc};
use gatepass_util::{ActorId, ClientId, GatepassId, ParentId, StudentId};
use serde::{Deserialize, Serialize};

use crate::{
    Actor, ApprovalToken, Decision, GatepassRequest, GatepassStats, GatepassStatus, HealthStatus,
    Parent, Student, API_VERSION,
};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Caller identity as resolved by the identity collaborator
    #[serde(default)]
    pub actor: Option<Actor>,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            actor: None,
            command,
        }
    }

    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    Unauthenticated,
    ValidationFailed,
    InvalidStateTransition,
    TokenNotFound,
    TokenExpired,
    TokenAlreadyUsed,
    DuplicateToken,
    NotFound,
    PermissionDenied,
    Conflict,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    // Registry

    RegisterParent {
        name: String,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        phone: Option<String>,
        #[serde(default)]
        address: Option<String>,
    },

    RegisterStudent {
        user_id: ActorId,
        roll_no: String,
        #[serde(default)]
        guardians: Vec<ParentId>,
    },

    AddGuardian { student: StudentId, parent: ParentId },

    RemoveGuardian { student: StudentId, parent: ParentId },

    // Workflow

    /// Student requests a new gatepass (requires a STUDENT actor)
    CreateGatepass {
        student: StudentId,
        destination: String,
        #[serde(default)]
        purpose: String,
        from_time: DateTime<Utc>,
        to_time: DateTime<Utc>,
    },

    /// Unauthenticated approval callback: `/approval/{token}/{action}`.
    /// Both segments are passed through verbatim.
    RedeemApproval { token: String, action: String },

    /// Look up a token before the guardian decides
    InspectToken { token: String },

    /// Warden decision (requires a WARDEN actor)
    WardenDecide {
        gatepass_id: GatepassId,
        action: Decision,
        #[serde(default, rename = "override")]
        is_override: bool,
    },

    /// Security logs the student leaving campus
    LogExit { gatepass_id: GatepassId },

    /// Security logs the student returning
    LogEntry { gatepass_id: GatepassId },

    /// Re-send approval links to guardians who have not decided yet
    ResendNotifications { gatepass_id: GatepassId },

    /// Run the expiry sweeper now
    SweepExpired,

    // Queries

    GetGatepass { gatepass_id: GatepassId },

    ListByStudent { student: StudentId },

    ListByStatus { status: GatepassStatus },

    PendingForParent { parent: ParentId },

    ListStudentsOut,

    GetStats,

    // Connection

    /// Subscribe to events (returns immediately, events stream separately)
    SubscribeEvents,

    /// Unsubscribe from events
    UnsubscribeEvents,

    /// Get health status
    GetHealth,

    /// Ping for keepalive
    Ping,
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Parent(Parent),
    Student(Student),
    Gatepass(GatepassRequest),
    /// Struct variant: an internally tagged newtype cannot hold a sequence
    Gatepasses { gatepasses: Vec<GatepassRequest> },
    Token(ApprovalToken),
    Stats(GatepassStats),
    Swept { count: usize },
    NotificationsSent { count: usize },
    Subscribed { client_id: ClientId },
    Unsubscribed,
    Health(HealthStatus),
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization() {
        let req = Request::new(1, Command::Ping).with_actor(Actor::warden("w-1"));
        let json = serde_json::to_string(&req).unwrap();
        let parsed: Request = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.request_id, 1);
        assert!(matches!(parsed.command, Command::Ping));
        assert_eq!(parsed.actor, Some(Actor::warden("w-1")));
    }

    #[test]
    fn redeem_command_from_callback_json() {
        let json = r#"{
            "request_id": 7,
            "api_version": 1,
            "command": {"type": "redeem_approval", "token": "abc", "action": "approve"}
        }"#;
        let parsed: Request = serde_json::from_str(json).unwrap();

        assert!(parsed.actor.is_none());
        match parsed.command {
            Command::RedeemApproval { token, action } => {
                assert_eq!(token, "abc");
                assert_eq!(action, "approve");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn warden_override_defaults_to_false() {
        let id = GatepassId::new();
        let json = format!(
            r#"{{"type": "warden_decide", "gatepass_id": "{}", "action": "reject"}}"#,
            id
        );
        let parsed: Command = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            parsed,
            Command::WardenDecide { is_override: false, action: Decision::Reject, .. }
        ));
    }

    #[test]
    fn error_response_serialization() {
        let resp = Response::error(3, ErrorInfo::new(ErrorCode::TokenExpired, "expired"));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["result"]["err"]["code"], "token_expired");
    }
}
