//! Event types for gatepassd -> client streaming

use chrono::{DateTime, Utc};
use gatepass_util::{GatepassId, StudentId};
use serde::{Deserialize, Serialize};

use crate::{GatepassStatus, API_VERSION};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: gatepass_util::now(),
            payload,
        }
    }
}

/// All possible events from the service to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A student submitted a new request
    GatepassCreated {
        gatepass_id: GatepassId,
        student: StudentId,
    },

    /// A gatepass changed status
    StatusChanged {
        gatepass_id: GatepassId,
        from: GatepassStatus,
        to: GatepassStatus,
    },

    /// Security logged a physical exit or entry
    MovementLogged {
        gatepass_id: GatepassId,
        exit: bool,
    },

    /// The expiry sweeper expired one or more requests
    RequestsExpired { count: usize },

    /// Service is shutting down
    Shutdown,
}
