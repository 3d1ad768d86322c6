//! Shared types for the gatepassd API

use chrono::{DateTime, Utc};
use gatepass_util::{ActorId, GatepassId, ParentId, StudentId, TokenId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a textual enum value is not recognised
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Gatepass lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatepassStatus {
    PendingParent,
    PendingWarden,
    Approved,
    Rejected,
    Expired,
}

impl GatepassStatus {
    pub const ALL: [GatepassStatus; 5] = [
        GatepassStatus::PendingParent,
        GatepassStatus::PendingWarden,
        GatepassStatus::Approved,
        GatepassStatus::Rejected,
        GatepassStatus::Expired,
    ];

    /// Statuses that carry a stage deadline
    pub fn is_pending(self) -> bool {
        matches!(self, GatepassStatus::PendingParent | GatepassStatus::PendingWarden)
    }

    /// Absorbing statuses: no status transition leaves them
    pub fn is_terminal(self) -> bool {
        !self.is_pending()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GatepassStatus::PendingParent => "PENDING_PARENT",
            GatepassStatus::PendingWarden => "PENDING_WARDEN",
            GatepassStatus::Approved => "APPROVED",
            GatepassStatus::Rejected => "REJECTED",
            GatepassStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for GatepassStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GatepassStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GatepassStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("status", s))
    }
}

/// A single approve/reject decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    /// Path segment used in approval links
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(Decision::Approve),
            "reject" => Ok(Decision::Reject),
            other => Err(ParseEnumError::new("decision", other)),
        }
    }
}

/// Role resolved by the identity collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Student,
    Parent,
    Warden,
    Security,
}

/// Authenticated caller of a core operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<ActorId>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn student(id: impl Into<ActorId>) -> Self {
        Self::new(id, Role::Student)
    }

    pub fn warden(id: impl Into<ActorId>) -> Self {
        Self::new(id, Role::Warden)
    }

    pub fn security(id: impl Into<ActorId>) -> Self {
        Self::new(id, Role::Security)
    }
}

/// How many guardians must approve before a request reaches the warden
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalPolicy {
    /// The first guardian approval advances the request
    #[default]
    AnyOne,
    /// Every guardian holding a token must approve
    AllRequired,
}

/// What an audit record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Created,
    ParentApproved,
    ParentRejected,
    WardenApproved,
    WardenRejected,
    Expired,
    ExitLogged,
    EntryLogged,
}

impl AuditAction {
    pub const ALL: [AuditAction; 8] = [
        AuditAction::Created,
        AuditAction::ParentApproved,
        AuditAction::ParentRejected,
        AuditAction::WardenApproved,
        AuditAction::WardenRejected,
        AuditAction::Expired,
        AuditAction::ExitLogged,
        AuditAction::EntryLogged,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Created => "CREATED",
            AuditAction::ParentApproved => "PARENT_APPROVED",
            AuditAction::ParentRejected => "PARENT_REJECTED",
            AuditAction::WardenApproved => "WARDEN_APPROVED",
            AuditAction::WardenRejected => "WARDEN_REJECTED",
            AuditAction::Expired => "EXPIRED",
            AuditAction::ExitLogged => "EXIT_LOGGED",
            AuditAction::EntryLogged => "ENTRY_LOGGED",
        }
    }

    pub fn parent(decision: Decision) -> Self {
        match decision {
            Decision::Approve => AuditAction::ParentApproved,
            Decision::Reject => AuditAction::ParentRejected,
        }
    }

    pub fn warden(decision: Decision) -> Self {
        match decision {
            Decision::Approve => AuditAction::WardenApproved,
            Decision::Reject => AuditAction::WardenRejected,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditAction::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("audit action", s))
    }
}

/// One immutable audit record attached to a gatepass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: AuditAction,
    #[serde(default)]
    pub note: String,
    /// Set when a warden decided outside the normal PENDING_WARDEN stage
    #[serde(rename = "override", default)]
    pub is_override: bool,
}

impl AuditEntry {
    pub fn new(
        timestamp: DateTime<Utc>,
        actor: impl Into<String>,
        action: AuditAction,
        note: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            actor: actor.into(),
            action,
            note: note.into(),
            is_override: false,
        }
    }

    pub fn with_override(mut self, is_override: bool) -> Self {
        self.is_override = is_override;
        self
    }
}

/// The central gatepass entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatepassRequest {
    pub id: GatepassId,
    pub student: StudentId,
    pub destination: String,
    pub purpose: String,
    pub from_time: DateTime<Utc>,
    pub to_time: DateTime<Utc>,
    pub status: GatepassStatus,
    pub created_at: DateTime<Utc>,
    /// Deadline of the current pending stage
    pub request_expires_at: Option<DateTime<Utc>>,
    pub actual_exit_time: Option<DateTime<Utc>>,
    pub actual_entry_time: Option<DateTime<Utc>>,
    pub audit: Vec<AuditEntry>,
    /// Record version, bumped on every persisted change
    pub version: u64,
}

impl GatepassRequest {
    /// Whether the current stage deadline has passed at `now`
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_pending()
            && self
                .request_expires_at
                .is_some_and(|deadline| deadline <= now)
    }

    /// Approved, exited and not yet returned
    pub fn is_out(&self) -> bool {
        self.status == GatepassStatus::Approved
            && self.actual_exit_time.is_some()
            && self.actual_entry_time.is_none()
    }
}

/// Single-use capability for one guardian decision on one gatepass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalToken {
    pub token: TokenId,
    pub gatepass: GatepassId,
    pub parent: ParentId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub action_taken: Option<Decision>,
}

impl ApprovalToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// A token is valid iff it is unused and not yet expired
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.used && !self.is_expired(now)
    }
}

/// Registered student
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    /// Identity reference from the identity collaborator
    pub user_id: ActorId,
    pub roll_no: String,
    /// Guardians in the order they were linked
    pub guardians: Vec<ParentId>,
}

/// Registered parent (guardian)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parent {
    pub id: ParentId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// Counts for dashboards
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatepassStats {
    pub pending_parent: u64,
    pub pending_warden: u64,
    pub approved: u64,
    pub rejected: u64,
    pub expired: u64,
    /// Approved, exited, not yet returned
    pub students_out: u64,
}

impl GatepassStats {
    pub fn record(&mut self, status: GatepassStatus, count: u64) {
        match status {
            GatepassStatus::PendingParent => self.pending_parent += count,
            GatepassStatus::PendingWarden => self.pending_warden += count,
            GatepassStatus::Approved => self.approved += count,
            GatepassStatus::Rejected => self.rejected += count,
            GatepassStatus::Expired => self.expired += count,
        }
    }
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub ready: bool,
    pub store_ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_screaming_snake() {
        let json = serde_json::to_string(&GatepassStatus::PendingWarden).unwrap();
        assert_eq!(json, "\"PENDING_WARDEN\"");
        assert_eq!(
            "PENDING_WARDEN".parse::<GatepassStatus>().unwrap(),
            GatepassStatus::PendingWarden
        );
        assert!("PENDING".parse::<GatepassStatus>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!GatepassStatus::PendingParent.is_terminal());
        assert!(!GatepassStatus::PendingWarden.is_terminal());
        assert!(GatepassStatus::Approved.is_terminal());
        assert!(GatepassStatus::Rejected.is_terminal());
        assert!(GatepassStatus::Expired.is_terminal());
    }

    #[test]
    fn decision_parses_link_segments() {
        assert_eq!("approve".parse::<Decision>().unwrap(), Decision::Approve);
        assert_eq!("reject".parse::<Decision>().unwrap(), Decision::Reject);

        let err = "delete".parse::<Decision>().unwrap_err();
        assert_eq!(err.to_string(), "unknown decision 'delete'");
    }

    #[test]
    fn audit_entry_override_field_name() {
        let entry = AuditEntry::new(Utc::now(), "warden-1", AuditAction::WardenApproved, "")
            .with_override(true);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["override"], true);
        assert_eq!(json["action"], "WARDEN_APPROVED");
    }

    #[test]
    fn token_validity_window() {
        let now = Utc::now();
        let mut token = ApprovalToken {
            token: TokenId::new(),
            gatepass: GatepassId::new(),
            parent: ParentId::new(),
            created_at: now,
            expires_at: now + chrono::Duration::minutes(5),
            used: false,
            used_at: None,
            action_taken: None,
        };

        assert!(token.is_valid(now));
        assert!(!token.is_valid(token.expires_at));

        token.used = true;
        assert!(!token.is_valid(now));
    }

    #[test]
    fn approval_policy_default_is_any_one() {
        assert_eq!(ApprovalPolicy::default(), ApprovalPolicy::AnyOne);
        let parsed: ApprovalPolicy = serde_json::from_str("\"ALL_REQUIRED\"").unwrap();
        assert_eq!(parsed, ApprovalPolicy::AllRequired);
    }
}
