//! Store trait definitions

use chrono::{DateTime, Utc};
use gatepass_api::{
    ApprovalToken, AuditEntry, Decision, GatepassRequest, GatepassStatus, Parent, Student,
};
use gatepass_util::{GatepassId, ParentId, StudentId, TokenId};

use crate::StoreResult;

/// Main store trait
///
/// Gatepass rows are only ever changed through [`Store::commit_transition`],
/// which checks the expected version, writes the mutable fields, appends the
/// audit entry and (optionally) consumes a token in a single transaction.
pub trait Store: Send + Sync {
    // Registry

    fn insert_parent(&self, parent: &Parent) -> StoreResult<()>;

    fn get_parent(&self, id: &ParentId) -> StoreResult<Option<Parent>>;

    /// Insert a student and its guardian links. Fails with `Duplicate` on a
    /// roll number that is already registered.
    fn insert_student(&self, student: &Student) -> StoreResult<()>;

    fn get_student(&self, id: &StudentId) -> StoreResult<Option<Student>>;

    /// Link a guardian; linking an existing guardian is a no-op
    fn add_guardian(&self, student: &StudentId, parent: &ParentId) -> StoreResult<()>;

    /// Unlink a guardian; returns whether a link was removed
    fn remove_guardian(&self, student: &StudentId, parent: &ParentId) -> StoreResult<bool>;

    // Gatepasses

    /// Insert a new gatepass together with its initial audit trail and tokens
    fn create_gatepass(
        &self,
        gatepass: &GatepassRequest,
        tokens: &[ApprovalToken],
    ) -> StoreResult<()>;

    fn get_gatepass(&self, id: &GatepassId) -> StoreResult<Option<GatepassRequest>>;

    /// Persist a state change atomically
    fn commit_transition(&self, transition: &Transition) -> StoreResult<()>;

    /// Gatepasses matching a query, newest first
    fn list_gatepasses(&self, query: &GatepassQuery) -> StoreResult<Vec<GatepassRequest>>;

    /// Ids of pending gatepasses whose stage deadline is at or before `now`
    fn list_expirable(&self, now: DateTime<Utc>) -> StoreResult<Vec<GatepassId>>;

    /// Number of gatepasses per status
    fn count_by_status(&self) -> StoreResult<Vec<(GatepassStatus, u64)>>;

    // Audit

    /// Full audit trail of one gatepass, oldest first
    fn get_audit(&self, id: &GatepassId) -> StoreResult<Vec<AuditEntry>>;

    // Tokens

    /// Insert a token. Fails with `Duplicate` if the (gatepass, parent) pair
    /// already holds one.
    fn insert_token(&self, token: &ApprovalToken) -> StoreResult<()>;

    fn get_token(&self, token: &TokenId) -> StoreResult<Option<ApprovalToken>>;

    fn find_token(
        &self,
        gatepass: &GatepassId,
        parent: &ParentId,
    ) -> StoreResult<Option<ApprovalToken>>;

    /// All tokens issued for a gatepass, in issue order
    fn tokens_for_gatepass(&self, gatepass: &GatepassId) -> StoreResult<Vec<ApprovalToken>>;

    /// Mark a token used. This is a compare-and-swap on the `used` flag:
    /// exactly one caller can succeed, later callers get `TokenAlreadyUsed`.
    fn redeem_token(&self, redemption: &TokenRedemption) -> StoreResult<()>;

    /// PENDING_PARENT gatepasses on which the parent holds a token valid at `now`
    fn pending_for_parent(
        &self,
        parent: &ParentId,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<GatepassRequest>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

/// Filter for gatepass listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatepassQuery {
    ByStudent(StudentId),
    ByStatus(GatepassStatus),
    /// Approved, exited, not yet returned
    StudentsOut,
}

/// Consumption of a token as part of (or instead of) a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRedemption {
    pub token: TokenId,
    pub action: Decision,
    pub at: DateTime<Utc>,
}

/// A single atomic change to a gatepass
#[derive(Debug, Clone)]
pub struct Transition {
    /// New values of the mutable fields. Immutable fields are ignored.
    pub gatepass: GatepassRequest,
    /// Version the change was computed from
    pub expected_version: u64,
    /// Entry appended to the audit trail
    pub audit: AuditEntry,
    /// Token consumed together with the change
    pub redeem: Option<TokenRedemption>,
}
