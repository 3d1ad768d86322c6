//! Notification dispatcher contract
//!
//! The core calls the dispatcher once per issued token after a gatepass is
//! created (and again on resend). Delivery is fire-and-forget: a failed
//! notification is logged and never rolls back the state change.

use gatepass_api::{Decision, GatepassRequest, Parent};
use gatepass_util::{GatepassId, ParentId, TokenId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

/// Delivery failure reported by a dispatcher
#[derive(Debug, Error)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

/// Approve/reject callback links for one token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalLinks {
    pub approve: String,
    pub reject: String,
}

impl ApprovalLinks {
    /// Build `{base}/approval/{token}/approve|reject`
    pub fn new(base_url: &str, token: &TokenId) -> Self {
        let base = base_url.trim_end_matches('/');
        let link = |decision: Decision| format!("{}/approval/{}/{}", base, token, decision);

        Self {
            approve: link(Decision::Approve),
            reject: link(Decision::Reject),
        }
    }
}

/// Sends approval requests to guardians
pub trait NotificationDispatcher: Send + Sync {
    fn notify(
        &self,
        parent: &Parent,
        gatepass: &GatepassRequest,
        links: &ApprovalLinks,
    ) -> Result<(), NotifyError>;
}

/// Writes approval links to the log. Used by the daemon when no transport is
/// wired in.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl NotificationDispatcher for LogNotifier {
    fn notify(
        &self,
        parent: &Parent,
        gatepass: &GatepassRequest,
        links: &ApprovalLinks,
    ) -> Result<(), NotifyError> {
        info!(
            parent_id = %parent.id,
            parent = %parent.name,
            email = parent.email.as_deref().unwrap_or("-"),
            gatepass_id = %gatepass.id,
            destination = %gatepass.destination,
            approve = %links.approve,
            reject = %links.reject,
            "Approval requested"
        );
        Ok(())
    }
}

/// Drops every notification
#[derive(Debug, Default)]
pub struct NullNotifier;

impl NotificationDispatcher for NullNotifier {
    fn notify(
        &self,
        _parent: &Parent,
        _gatepass: &GatepassRequest,
        _links: &ApprovalLinks,
    ) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// A notification captured by [`RecordingNotifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub parent: ParentId,
    pub gatepass: GatepassId,
    pub links: ApprovalLinks,
}

/// Records notifications for testing
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,

    /// Configure notify to fail (nothing is recorded while set)
    pub fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.fail.store(true, Ordering::SeqCst);
        notifier
    }

    /// Everything recorded so far, in send order
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl NotificationDispatcher for RecordingNotifier {
    fn notify(
        &self,
        parent: &Parent,
        gatepass: &GatepassRequest,
        links: &ApprovalLinks,
    ) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError("mail relay unreachable".into()));
        }

        let mut sent = self
            .sent
            .lock()
            .map_err(|_| NotifyError("recorder lock poisoned".into()))?;
        sent.push(SentNotification {
            parent: parent.id,
            gatepass: gatepass.id,
            links: links.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_use_base_url_and_token() {
        let token = TokenId::new();
        let links = ApprovalLinks::new("https://gate.example.edu/", &token);

        assert_eq!(
            links.approve,
            format!("https://gate.example.edu/approval/{}/approve", token)
        );
        assert_eq!(
            links.reject,
            format!("https://gate.example.edu/approval/{}/reject", token)
        );
    }
}
