//! Command dispatch

use chrono::{DateTime, Utc};
use gatepass_api::{
    Actor, Command, Decision, ErrorCode, ErrorInfo, HealthStatus, Request, Response,
    ResponsePayload, API_VERSION,
};
use gatepass_core::{CoreError, GatepassEngine, NewGatepass};
use gatepass_ipc::PeerInfo;
use gatepass_util::ClientId;
use tracing::{debug, error};

type CommandResult = Result<ResponsePayload, ErrorInfo>;

/// Handle one request from a connected client
pub fn handle_request(
    engine: &GatepassEngine,
    client_id: ClientId,
    peer: PeerInfo,
    request: Request,
    now: DateTime<Utc>,
) -> Response {
    let request_id = request.request_id;

    if request.api_version != API_VERSION {
        return Response::error(
            request_id,
            ErrorInfo::new(
                ErrorCode::InvalidRequest,
                format!(
                    "Unsupported API version {} (expected {})",
                    request.api_version, API_VERSION
                ),
            ),
        );
    }

    // Only a peer running as root or as the daemon user may speak for someone
    if request.actor.is_some() && !peer.trusted {
        return Response::error(
            request_id,
            ErrorInfo::new(
                ErrorCode::Unauthenticated,
                "Untrusted peer cannot assert an actor",
            ),
        );
    }

    let result = handle_command(
        engine,
        client_id,
        peer,
        request.actor.as_ref(),
        request.command,
        now,
    );

    match result {
        Ok(payload) => Response::success(request_id, payload),
        Err(e) => Response::error(request_id, e),
    }
}

fn handle_command(
    engine: &GatepassEngine,
    client_id: ClientId,
    peer: PeerInfo,
    actor: Option<&Actor>,
    command: Command,
    now: DateTime<Utc>,
) -> CommandResult {
    match command {
        Command::RegisterParent {
            name,
            email,
            phone,
            address,
        } => {
            require_trusted(peer)?;
            let parent = engine
                .register_parent(&name, email, phone, address)
                .map_err(core_error)?;
            Ok(ResponsePayload::Parent(parent))
        }

        Command::RegisterStudent {
            user_id,
            roll_no,
            guardians,
        } => {
            require_trusted(peer)?;
            let student = engine
                .register_student(user_id, &roll_no, &guardians)
                .map_err(core_error)?;
            Ok(ResponsePayload::Student(student))
        }

        Command::AddGuardian { student, parent } => {
            require_trusted(peer)?;
            let student = engine.add_guardian(&student, &parent).map_err(core_error)?;
            Ok(ResponsePayload::Student(student))
        }

        Command::RemoveGuardian { student, parent } => {
            require_trusted(peer)?;
            let student = engine
                .remove_guardian(&student, &parent)
                .map_err(core_error)?;
            Ok(ResponsePayload::Student(student))
        }

        Command::CreateGatepass {
            student,
            destination,
            purpose,
            from_time,
            to_time,
        } => {
            let actor = require_actor(actor)?;
            let request = NewGatepass {
                student,
                destination,
                purpose,
                from_time,
                to_time,
            };
            let gatepass = engine.create(actor, request, now).map_err(core_error)?;
            Ok(ResponsePayload::Gatepass(gatepass))
        }

        Command::RedeemApproval { token, action } => {
            let action: Decision = action.parse().map_err(|e: gatepass_api::ParseEnumError| {
                ErrorInfo::new(ErrorCode::InvalidRequest, e.to_string())
            })?;
            let gatepass = engine
                .parent_decide(&token, action, now)
                .map_err(core_error)?;
            Ok(ResponsePayload::Gatepass(gatepass))
        }

        Command::InspectToken { token } => {
            let token = engine.inspect_token(&token).map_err(core_error)?;
            Ok(ResponsePayload::Token(token))
        }

        Command::WardenDecide {
            gatepass_id,
            action,
            is_override,
        } => {
            let actor = require_actor(actor)?;
            let gatepass = engine
                .warden_decide(&gatepass_id, actor, action, is_override, now)
                .map_err(core_error)?;
            Ok(ResponsePayload::Gatepass(gatepass))
        }

        Command::LogExit { gatepass_id } => {
            let actor = require_actor(actor)?;
            let gatepass = engine
                .log_exit(&gatepass_id, actor, now)
                .map_err(core_error)?;
            Ok(ResponsePayload::Gatepass(gatepass))
        }

        Command::LogEntry { gatepass_id } => {
            let actor = require_actor(actor)?;
            let gatepass = engine
                .log_entry(&gatepass_id, actor, now)
                .map_err(core_error)?;
            Ok(ResponsePayload::Gatepass(gatepass))
        }

        Command::ResendNotifications { gatepass_id } => {
            require_trusted(peer)?;
            let count = engine
                .resend_notifications(&gatepass_id, now)
                .map_err(core_error)?;
            Ok(ResponsePayload::NotificationsSent { count })
        }

        Command::SweepExpired => {
            require_trusted(peer)?;
            let count = engine.sweep_expired(now).map_err(core_error)?;
            Ok(ResponsePayload::Swept { count })
        }

        Command::GetGatepass { gatepass_id } => {
            let gatepass = engine.get_gatepass(&gatepass_id).map_err(core_error)?;
            Ok(ResponsePayload::Gatepass(gatepass))
        }

        Command::ListByStudent { student } => {
            let gatepasses = engine.list_by_student(&student).map_err(core_error)?;
            Ok(ResponsePayload::Gatepasses { gatepasses })
        }

        Command::ListByStatus { status } => {
            let gatepasses = engine.list_by_status(status).map_err(core_error)?;
            Ok(ResponsePayload::Gatepasses { gatepasses })
        }

        Command::PendingForParent { parent } => {
            let gatepasses = engine
                .pending_for_parent(&parent, now)
                .map_err(core_error)?;
            Ok(ResponsePayload::Gatepasses { gatepasses })
        }

        Command::ListStudentsOut => {
            let gatepasses = engine.list_students_out().map_err(core_error)?;
            Ok(ResponsePayload::Gatepasses { gatepasses })
        }

        Command::GetStats => {
            let stats = engine.stats().map_err(core_error)?;
            Ok(ResponsePayload::Stats(stats))
        }

        // Subscription state is tracked by the IPC server
        Command::SubscribeEvents => Ok(ResponsePayload::Subscribed { client_id }),

        Command::UnsubscribeEvents => Ok(ResponsePayload::Unsubscribed),

        Command::GetHealth => {
            let store_ok = engine.is_healthy();
            Ok(ResponsePayload::Health(HealthStatus {
                live: true,
                ready: store_ok,
                store_ok,
            }))
        }

        Command::Ping => Ok(ResponsePayload::Pong),
    }
}

fn require_actor(actor: Option<&Actor>) -> Result<&Actor, ErrorInfo> {
    actor.ok_or_else(|| {
        ErrorInfo::new(
            ErrorCode::Unauthenticated,
            "This command requires an authenticated actor",
        )
    })
}

fn require_trusted(peer: PeerInfo) -> Result<(), ErrorInfo> {
    if peer.trusted {
        Ok(())
    } else {
        Err(ErrorInfo::new(
            ErrorCode::PermissionDenied,
            "Administrative command from untrusted peer",
        ))
    }
}

fn core_error(e: CoreError) -> ErrorInfo {
    match &e {
        CoreError::Store(inner) => error!(error = %inner, "Store failure"),
        other => debug!(error = %other, "Command refused"),
    }
    ErrorInfo::new(e.code(), e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatepass_api::ResponseResult;
    use gatepass_config::Policy;
    use gatepass_core::NullNotifier;
    use gatepass_store::SqliteStore;
    use std::sync::Arc;

    fn engine() -> GatepassEngine {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        GatepassEngine::new(Policy::default(), store, Arc::new(NullNotifier))
    }

    fn error_code(response: Response) -> ErrorCode {
        match response.result {
            ResponseResult::Err(e) => e.code,
            ResponseResult::Ok(payload) => panic!("unexpected success: {:?}", payload),
        }
    }

    const TRUSTED: PeerInfo = PeerInfo {
        uid: Some(0),
        trusted: true,
    };

    const STRANGER: PeerInfo = PeerInfo {
        uid: Some(4242),
        trusted: false,
    };

    #[test]
    fn rejects_other_api_versions() {
        let mut request = Request::new(1, Command::Ping);
        request.api_version = API_VERSION + 1;

        let response = handle_request(&engine(), ClientId::new(), TRUSTED, request, Utc::now());
        assert_eq!(error_code(response), ErrorCode::InvalidRequest);
    }

    #[test]
    fn untrusted_peer_cannot_assert_actor() {
        let request = Request::new(1, Command::Ping).with_actor(Actor::warden("w-1"));
        let response = handle_request(&engine(), ClientId::new(), STRANGER, request, Utc::now());
        assert_eq!(error_code(response), ErrorCode::Unauthenticated);

        let request = Request::new(2, Command::SweepExpired);
        let response = handle_request(&engine(), ClientId::new(), STRANGER, request, Utc::now());
        assert_eq!(error_code(response), ErrorCode::PermissionDenied);
    }

    #[test]
    fn resend_needs_trusted_peer() {
        let engine = engine();
        let gatepass_id = gatepass_util::GatepassId::new();

        let request = Request::new(1, Command::ResendNotifications { gatepass_id });
        let response = handle_request(&engine, ClientId::new(), STRANGER, request, Utc::now());
        assert_eq!(error_code(response), ErrorCode::PermissionDenied);

        // Past the peer check, the unknown id is what fails
        let request = Request::new(2, Command::ResendNotifications { gatepass_id });
        let response = handle_request(&engine, ClientId::new(), TRUSTED, request, Utc::now());
        assert_eq!(error_code(response), ErrorCode::NotFound);
    }

    #[test]
    fn workflow_commands_need_actor() {
        let request = Request::new(
            1,
            Command::LogExit {
                gatepass_id: gatepass_util::GatepassId::new(),
            },
        );
        let response = handle_request(&engine(), ClientId::new(), TRUSTED, request, Utc::now());
        assert_eq!(error_code(response), ErrorCode::Unauthenticated);
    }

    #[test]
    fn unknown_callback_action_is_invalid() {
        let request = Request::new(
            1,
            Command::RedeemApproval {
                token: "whatever".into(),
                action: "maybe".into(),
            },
        );
        let response = handle_request(&engine(), ClientId::new(), STRANGER, request, Utc::now());
        assert_eq!(error_code(response), ErrorCode::InvalidRequest);
    }
}
