//! Approval state machine

use chrono::{DateTime, Utc};
use gatepass_api::{
    Actor, ApprovalPolicy, ApprovalToken, AuditAction, AuditEntry, Decision, GatepassRequest,
    GatepassStats, GatepassStatus, Parent, Role, Student,
};
use gatepass_config::{NotificationPolicy, Policy, WorkflowPolicy};
use gatepass_store::{GatepassQuery, Store, StoreError, TokenRedemption, Transition};
use gatepass_util::{stored_precision, to_chrono, ActorId, GatepassId, ParentId, StudentId};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    ApprovalLinks, CoreError, CoreEvent, CoreResult, NotificationDispatcher, TokenStore,
};

/// Actor name recorded for transitions the service makes on its own
pub const SYSTEM_ACTOR: &str = "system";

/// Fields of a new gatepass request
#[derive(Debug, Clone)]
pub struct NewGatepass {
    pub student: StudentId,
    pub destination: String,
    pub purpose: String,
    pub from_time: DateTime<Utc>,
    pub to_time: DateTime<Utc>,
}

/// A planned change, computed from the current record
pub(crate) struct Change {
    pub next: GatepassRequest,
    pub audit: AuditEntry,
    pub redeem: Option<TokenRedemption>,
}

/// The core approval engine
pub struct GatepassEngine {
    pub(crate) store: Arc<dyn Store>,
    tokens: TokenStore,
    notifier: Arc<dyn NotificationDispatcher>,
    pub(crate) workflow: WorkflowPolicy,
    notifications: NotificationPolicy,
    events: Mutex<Vec<CoreEvent>>,
}

impl GatepassEngine {
    /// Create a new engine
    pub fn new(
        policy: Policy,
        store: Arc<dyn Store>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        info!(
            approval_policy = ?policy.workflow.approval_policy,
            parent_window_secs = policy.workflow.parent_window.as_secs(),
            warden_window_secs = policy.workflow.warden_window.as_secs(),
            "Core engine initialized"
        );

        Self {
            tokens: TokenStore::new(store.clone()),
            store,
            notifier,
            workflow: policy.workflow,
            notifications: policy.notifications,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn workflow(&self) -> &WorkflowPolicy {
        &self.workflow
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Take the events produced since the last call
    pub fn drain_events(&self) -> Vec<CoreEvent> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(_) => Vec::new(),
        }
    }

    pub(crate) fn emit(&self, event: CoreEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.store.is_healthy()
    }

    // Registry

    pub fn register_parent(
        &self,
        name: &str,
        email: Option<String>,
        phone: Option<String>,
        address: Option<String>,
    ) -> CoreResult<Parent> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::Validation("parent name must not be blank".into()));
        }

        let parent = Parent {
            id: ParentId::new(),
            name: name.to_string(),
            email: non_blank(email),
            phone: non_blank(phone),
            address: non_blank(address),
        };
        self.store.insert_parent(&parent)?;

        info!(parent_id = %parent.id, name = %parent.name, "Parent registered");
        Ok(parent)
    }

    pub fn register_student(
        &self,
        user_id: ActorId,
        roll_no: &str,
        guardians: &[ParentId],
    ) -> CoreResult<Student> {
        let roll_no = roll_no.trim();
        if roll_no.is_empty() {
            return Err(CoreError::Validation("roll number must not be blank".into()));
        }
        if user_id.as_str().trim().is_empty() {
            return Err(CoreError::Validation("user id must not be blank".into()));
        }
        for parent in guardians {
            self.parent(parent)?;
        }

        let mut linked: Vec<ParentId> = Vec::with_capacity(guardians.len());
        for parent in guardians {
            if !linked.contains(parent) {
                linked.push(*parent);
            }
        }

        let student = Student {
            id: StudentId::new(),
            user_id,
            roll_no: roll_no.to_string(),
            guardians: linked,
        };

        match self.store.insert_student(&student) {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => {
                return Err(CoreError::Validation(format!(
                    "roll number {} is already registered",
                    roll_no
                )));
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            student_id = %student.id,
            roll_no = %student.roll_no,
            guardian_count = student.guardians.len(),
            "Student registered"
        );
        Ok(student)
    }

    pub fn add_guardian(&self, student: &StudentId, parent: &ParentId) -> CoreResult<Student> {
        self.student(student)?;
        self.parent(parent)?;

        self.store.add_guardian(student, parent)?;
        info!(student_id = %student, parent_id = %parent, "Guardian added");

        self.student(student)
    }

    pub fn remove_guardian(&self, student: &StudentId, parent: &ParentId) -> CoreResult<Student> {
        self.student(student)?;

        if !self.store.remove_guardian(student, parent)? {
            return Err(CoreError::NotFound(format!(
                "parent {} is not a guardian of student {}",
                parent, student
            )));
        }
        info!(student_id = %student, parent_id = %parent, "Guardian removed");

        self.student(student)
    }

    fn student(&self, id: &StudentId) -> CoreResult<Student> {
        self.store
            .get_student(id)?
            .ok_or_else(|| CoreError::NotFound(format!("student {}", id)))
    }

    fn parent(&self, id: &ParentId) -> CoreResult<Parent> {
        self.store
            .get_parent(id)?
            .ok_or_else(|| CoreError::NotFound(format!("parent {}", id)))
    }

    // Transitions

    /// Submit a new request on behalf of the acting student
    pub fn create(
        &self,
        actor: &Actor,
        request: NewGatepass,
        now: DateTime<Utc>,
    ) -> CoreResult<GatepassRequest> {
        require_role(actor, Role::Student)?;
        let now = stored_precision(now);
        let request = NewGatepass {
            from_time: stored_precision(request.from_time),
            to_time: stored_precision(request.to_time),
            ..request
        };

        let student = self.student(&request.student)?;
        if student.user_id != actor.id {
            return Err(CoreError::PermissionDenied(format!(
                "{} cannot request a gatepass for student {}",
                actor.id, student.id
            )));
        }

        self.validate_request(&request, &student, now)?;

        let gatepass = GatepassRequest {
            id: GatepassId::new(),
            student: student.id,
            destination: request.destination.trim().to_string(),
            purpose: request.purpose.trim().to_string(),
            from_time: request.from_time,
            to_time: request.to_time,
            status: GatepassStatus::PendingParent,
            created_at: now,
            request_expires_at: Some(deadline(now, self.workflow.parent_window)),
            actual_exit_time: None,
            actual_entry_time: None,
            audit: vec![AuditEntry::new(
                now,
                actor.id.as_str(),
                AuditAction::Created,
                "",
            )],
            version: 0,
        };

        let expires_at = gatepass.request_expires_at.unwrap_or(now);
        let tokens: Vec<ApprovalToken> = student
            .guardians
            .iter()
            .map(|parent| TokenStore::mint(&gatepass.id, parent, expires_at, now))
            .collect();

        self.store.create_gatepass(&gatepass, &tokens)?;

        info!(
            gatepass_id = %gatepass.id,
            student_id = %student.id,
            destination = %gatepass.destination,
            token_count = tokens.len(),
            "Gatepass created"
        );
        self.emit(CoreEvent::GatepassCreated {
            gatepass_id: gatepass.id,
            student: student.id,
        });

        for token in &tokens {
            self.send_notification(&gatepass, token);
        }

        Ok(gatepass)
    }

    fn validate_request(
        &self,
        request: &NewGatepass,
        student: &Student,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        if request.destination.trim().is_empty() {
            return Err(CoreError::Validation("destination must not be blank".into()));
        }
        if request.from_time <= now {
            return Err(CoreError::Validation(
                "leave must start in the future".into(),
            ));
        }
        if request.from_time >= request.to_time {
            return Err(CoreError::Validation(
                "leave must end after it starts".into(),
            ));
        }
        if request.to_time - request.from_time >= to_chrono(self.workflow.max_duration) {
            return Err(CoreError::Validation(format!(
                "leave must be shorter than {}",
                gatepass_util::format_duration(self.workflow.max_duration)
            )));
        }
        if student.guardians.is_empty() {
            return Err(CoreError::Validation(format!(
                "student {} has no guardian to approve the request",
                student.roll_no
            )));
        }
        Ok(())
    }

    /// Apply a guardian's decision carried by an approval token
    pub fn parent_decide(
        &self,
        raw_token: &str,
        action: Decision,
        now: DateTime<Utc>,
    ) -> CoreResult<GatepassRequest> {
        let now = stored_precision(now);
        let token = self.tokens.check(raw_token, now)?;
        let parent_name = match self.store.get_parent(&token.parent)? {
            Some(parent) => parent.name,
            None => token.parent.to_string(),
        };
        let attempted = AuditAction::parent(action);

        let gatepass = self.transition(&token.gatepass, attempted, now, |current| {
            // Re-read on every attempt so a concurrent redeemer is reported
            // as such, not as a state conflict.
            self.tokens.check(raw_token, now)?;
            require_status(current, GatepassStatus::PendingParent, attempted)?;

            let mut next = current.clone();
            match action {
                Decision::Reject => {
                    next.status = GatepassStatus::Rejected;
                    next.request_expires_at = None;
                }
                Decision::Approve if self.all_others_approved(current, &token)? => {
                    next.status = GatepassStatus::PendingWarden;
                    next.request_expires_at = Some(deadline(now, self.workflow.warden_window));
                }
                Decision::Approve => {}
            }

            Ok(Change {
                next,
                audit: AuditEntry::new(now, parent_name.as_str(), attempted, "via approval link"),
                redeem: Some(TokenRedemption {
                    token: token.token,
                    action,
                    at: now,
                }),
            })
        })?;

        debug!(
            gatepass_id = %gatepass.id,
            parent_id = %token.parent,
            action = %action,
            "Guardian decision applied"
        );
        Ok(gatepass)
    }

    /// Whether approving with `token` completes the guardian stage
    fn all_others_approved(
        &self,
        gatepass: &GatepassRequest,
        token: &ApprovalToken,
    ) -> CoreResult<bool> {
        match self.workflow.approval_policy {
            ApprovalPolicy::AnyOne => Ok(true),
            ApprovalPolicy::AllRequired => {
                let tokens = self.store.tokens_for_gatepass(&gatepass.id)?;
                Ok(tokens
                    .iter()
                    .filter(|t| t.token != token.token)
                    .all(|t| t.used && t.action_taken == Some(Decision::Approve)))
            }
        }
    }

    /// Final decision by a warden. `is_override` allows deciding from any
    /// non-terminal state.
    pub fn warden_decide(
        &self,
        id: &GatepassId,
        actor: &Actor,
        action: Decision,
        is_override: bool,
        now: DateTime<Utc>,
    ) -> CoreResult<GatepassRequest> {
        require_role(actor, Role::Warden)?;
        let now = stored_precision(now);
        let attempted = AuditAction::warden(action);

        let gatepass = self.transition(id, attempted, now, |current| {
            if current.status.is_terminal() || !is_override {
                require_status(current, GatepassStatus::PendingWarden, attempted)?;
            }

            let mut next = current.clone();
            next.status = match action {
                Decision::Approve => GatepassStatus::Approved,
                Decision::Reject => GatepassStatus::Rejected,
            };
            next.request_expires_at = None;

            Ok(Change {
                next,
                audit: AuditEntry::new(now, actor.id.as_str(), attempted, "")
                    .with_override(is_override),
                redeem: None,
            })
        })?;

        if is_override {
            warn!(
                gatepass_id = %gatepass.id,
                warden = %actor.id,
                action = %action,
                "Warden override applied"
            );
        }
        Ok(gatepass)
    }

    /// Security records the student leaving campus
    pub fn log_exit(
        &self,
        id: &GatepassId,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> CoreResult<GatepassRequest> {
        require_role(actor, Role::Security)?;
        let now = stored_precision(now);
        let attempted = AuditAction::ExitLogged;

        let gatepass = self.transition(id, attempted, now, |current| {
            require_status(current, GatepassStatus::Approved, attempted)?;
            if current.actual_exit_time.is_some() {
                return Err(invalid(current, attempted));
            }

            let mut next = current.clone();
            next.actual_exit_time = Some(now);

            Ok(Change {
                next,
                audit: AuditEntry::new(now, actor.id.as_str(), attempted, ""),
                redeem: None,
            })
        })?;

        self.emit(CoreEvent::MovementLogged {
            gatepass_id: gatepass.id,
            exit: true,
        });
        Ok(gatepass)
    }

    /// Security records the student returning
    pub fn log_entry(
        &self,
        id: &GatepassId,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> CoreResult<GatepassRequest> {
        require_role(actor, Role::Security)?;
        let now = stored_precision(now);
        let attempted = AuditAction::EntryLogged;

        let gatepass = self.transition(id, attempted, now, |current| {
            require_status(current, GatepassStatus::Approved, attempted)?;
            if current.actual_exit_time.is_none() || current.actual_entry_time.is_some() {
                return Err(invalid(current, attempted));
            }

            let mut next = current.clone();
            next.actual_entry_time = Some(now);

            Ok(Change {
                next,
                audit: AuditEntry::new(now, actor.id.as_str(), attempted, ""),
                redeem: None,
            })
        })?;

        self.emit(CoreEvent::MovementLogged {
            gatepass_id: gatepass.id,
            exit: false,
        });
        Ok(gatepass)
    }

    /// Re-notify every guardian that still holds a valid token. Returns the
    /// number of notifications sent.
    pub fn resend_notifications(&self, id: &GatepassId, now: DateTime<Utc>) -> CoreResult<usize> {
        let now = stored_precision(now);
        let gatepass = self.get_gatepass(id)?;
        if gatepass.status != GatepassStatus::PendingParent || gatepass.is_overdue(now) {
            return Err(CoreError::InvalidStateTransition {
                id: gatepass.id,
                from: gatepass.status,
                attempted: "RESEND_NOTIFICATIONS",
            });
        }

        let student = self.student(&gatepass.student)?;
        let expires_at = gatepass.request_expires_at.unwrap_or(now);

        let mut sent = 0;
        for parent in &student.guardians {
            match self.tokens.issue(&gatepass.id, parent, expires_at, now) {
                Ok(token) => {
                    if self.send_notification(&gatepass, &token) {
                        sent += 1;
                    }
                }
                Err(CoreError::DuplicateToken { .. }) => {
                    debug!(gatepass_id = %gatepass.id, parent_id = %parent, "Token spent; not resending");
                }
                Err(e) => return Err(e),
            }
        }

        info!(gatepass_id = %gatepass.id, sent, "Notifications resent");
        Ok(sent)
    }

    /// Notify one guardian. Failures are logged and otherwise ignored.
    fn send_notification(&self, gatepass: &GatepassRequest, token: &ApprovalToken) -> bool {
        let parent = match self.store.get_parent(&token.parent) {
            Ok(Some(parent)) => parent,
            Ok(None) => {
                warn!(parent_id = %token.parent, "Cannot notify unknown parent");
                return false;
            }
            Err(e) => {
                warn!(parent_id = %token.parent, error = %e, "Failed to load parent for notification");
                return false;
            }
        };

        let links = ApprovalLinks::new(&self.notifications.approval_base_url, &token.token);
        match self.notifier.notify(&parent, gatepass, &links) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    gatepass_id = %gatepass.id,
                    parent_id = %parent.id,
                    error = %e,
                    "Failed to notify guardian"
                );
                false
            }
        }
    }

    /// Run a guarded change with optimistic concurrency.
    ///
    /// `plan` sees the freshly loaded record on every attempt. An overdue
    /// pending record is expired first and the change is refused.
    pub(crate) fn transition<F>(
        &self,
        id: &GatepassId,
        attempted: AuditAction,
        now: DateTime<Utc>,
        mut plan: F,
    ) -> CoreResult<GatepassRequest>
    where
        F: FnMut(&GatepassRequest) -> CoreResult<Change>,
    {
        let now = stored_precision(now);
        let attempts = self.workflow.max_retries.max(1);

        for attempt in 1..=attempts {
            let current = self.get_gatepass(id)?;

            if current.is_overdue(now) {
                match self.try_expire(&current, now)? {
                    Some(expired) => return Err(invalid(&expired, attempted)),
                    None => continue,
                }
            }

            let change = plan(&current)?;
            match self.commit(&current, change) {
                Ok(committed) => return Ok(committed),
                Err(CoreError::Store(StoreError::VersionConflict(_))) => {
                    debug!(gatepass_id = %id, attempt, "Version conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(gatepass_id = %id, attempts, action = %attempted, "Giving up after repeated conflicts");
        Err(CoreError::Conflict(*id))
    }

    /// Move an overdue pending record to EXPIRED. Returns `None` when another
    /// writer changed the record first.
    pub(crate) fn try_expire(
        &self,
        current: &GatepassRequest,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<GatepassRequest>> {
        let mut next = current.clone();
        next.status = GatepassStatus::Expired;

        let change = Change {
            next,
            audit: AuditEntry::new(now, SYSTEM_ACTOR, AuditAction::Expired, ""),
            redeem: None,
        };

        match self.commit(current, change) {
            Ok(expired) => Ok(Some(expired)),
            Err(CoreError::Store(StoreError::VersionConflict(_))) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn commit(&self, current: &GatepassRequest, change: Change) -> CoreResult<GatepassRequest> {
        let transition = Transition {
            gatepass: change.next,
            expected_version: current.version,
            audit: change.audit,
            redeem: change.redeem,
        };

        match self.store.commit_transition(&transition) {
            Ok(()) => {}
            Err(StoreError::TokenAlreadyUsed(_)) => return Err(CoreError::TokenAlreadyUsed),
            Err(e) => return Err(e.into()),
        }

        let Transition {
            gatepass: mut next,
            audit,
            ..
        } = transition;
        next.version = current.version + 1;

        info!(
            gatepass_id = %next.id,
            from = %current.status,
            to = %next.status,
            action = %audit.action,
            actor = %audit.actor,
            "Gatepass updated"
        );
        next.audit.push(audit);

        if next.status != current.status {
            self.emit(CoreEvent::StatusChanged {
                gatepass_id: next.id,
                from: current.status,
                to: next.status,
            });
        }

        Ok(next)
    }

    // Queries

    pub fn get_gatepass(&self, id: &GatepassId) -> CoreResult<GatepassRequest> {
        self.store
            .get_gatepass(id)?
            .ok_or_else(|| CoreError::NotFound(format!("gatepass {}", id)))
    }

    pub fn list_by_student(&self, student: &StudentId) -> CoreResult<Vec<GatepassRequest>> {
        Ok(self
            .store
            .list_gatepasses(&GatepassQuery::ByStudent(*student))?)
    }

    pub fn list_by_status(&self, status: GatepassStatus) -> CoreResult<Vec<GatepassRequest>> {
        Ok(self.store.list_gatepasses(&GatepassQuery::ByStatus(status))?)
    }

    /// Requests the parent can still act on at `now`
    pub fn pending_for_parent(
        &self,
        parent: &ParentId,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<GatepassRequest>> {
        Ok(self.store.pending_for_parent(parent, now)?)
    }

    /// Approved requests whose student has left and not yet returned
    pub fn list_students_out(&self) -> CoreResult<Vec<GatepassRequest>> {
        Ok(self.store.list_gatepasses(&GatepassQuery::StudentsOut)?)
    }

    pub fn stats(&self) -> CoreResult<GatepassStats> {
        let mut stats = GatepassStats::default();
        for (status, count) in self.store.count_by_status()? {
            stats.record(status, count);
        }
        stats.students_out = self.list_students_out()?.len() as u64;
        Ok(stats)
    }

    pub fn inspect_token(&self, raw: &str) -> CoreResult<ApprovalToken> {
        self.tokens.inspect(raw)
    }
}

fn deadline(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    stored_precision(
        now.checked_add_signed(to_chrono(window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC),
    )
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn require_role(actor: &Actor, role: Role) -> CoreResult<()> {
    if actor.role == role {
        Ok(())
    } else {
        Err(CoreError::PermissionDenied(format!(
            "{} acting as {:?} cannot do this; requires {:?}",
            actor.id, actor.role, role
        )))
    }
}

fn require_status(
    gatepass: &GatepassRequest,
    status: GatepassStatus,
    attempted: AuditAction,
) -> CoreResult<()> {
    if gatepass.status == status {
        Ok(())
    } else {
        Err(invalid(gatepass, attempted))
    }
}

fn invalid(gatepass: &GatepassRequest, attempted: AuditAction) -> CoreError {
    CoreError::InvalidStateTransition {
        id: gatepass.id,
        from: gatepass.status,
        attempted: attempted.as_str(),
    }
}
