//! Core events emitted by the engine

use gatepass_api::{EventPayload, GatepassStatus};
use gatepass_util::{GatepassId, StudentId};

/// Events emitted by the core engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// A student submitted a request
    GatepassCreated {
        gatepass_id: GatepassId,
        student: StudentId,
    },

    /// A committed transition changed the status
    StatusChanged {
        gatepass_id: GatepassId,
        from: GatepassStatus,
        to: GatepassStatus,
    },

    /// Security logged an exit (`exit = true`) or a return
    MovementLogged { gatepass_id: GatepassId, exit: bool },

    /// A sweep expired at least one request
    RequestsExpired { count: usize },
}

impl From<CoreEvent> for EventPayload {
    fn from(event: CoreEvent) -> Self {
        match event {
            CoreEvent::GatepassCreated {
                gatepass_id,
                student,
            } => EventPayload::GatepassCreated {
                gatepass_id,
                student,
            },
            CoreEvent::StatusChanged {
                gatepass_id,
                from,
                to,
            } => EventPayload::StatusChanged {
                gatepass_id,
                from,
                to,
            },
            CoreEvent::MovementLogged { gatepass_id, exit } => {
                EventPayload::MovementLogged { gatepass_id, exit }
            }
            CoreEvent::RequestsExpired { count } => EventPayload::RequestsExpired { count },
        }
    }
}
