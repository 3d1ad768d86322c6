//! Validated policy structures

use crate::schema::{RawConfig, RawDaemonConfig, RawNotifications, RawWorkflow};
use gatepass_api::ApprovalPolicy;
use gatepass_util::{data_dir_without_env, socket_path_without_env};
use std::path::PathBuf;
use std::time::Duration;

/// Default guardian decision window (1 hour)
pub const DEFAULT_PENDING_WINDOW: Duration = Duration::from_secs(3600);

/// Default longest leave (24 hours)
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(24 * 3600);

/// Default sweeper period
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default attempts per transition
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default base for approval links
pub const DEFAULT_APPROVAL_BASE_URL: &str = "http://localhost:8000";

/// Validated policy ready for use by the daemon and core engine
#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub daemon: DaemonConfig,
    pub workflow: WorkflowPolicy,
    pub notifications: NotificationPolicy,
}

impl Policy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            daemon: DaemonConfig::from_raw(raw.daemon),
            workflow: WorkflowPolicy::from_raw(raw.workflow),
            notifications: NotificationPolicy::from_raw(raw.notifications),
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
}

impl DaemonConfig {
    fn from_raw(raw: RawDaemonConfig) -> Self {
        Self {
            socket_path: raw.socket_path.unwrap_or_else(socket_path_without_env),
            data_dir: raw.data_dir.unwrap_or_else(data_dir_without_env),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: socket_path_without_env(),
            data_dir: data_dir_without_env(),
        }
    }
}

/// Settings that drive the approval state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowPolicy {
    pub approval_policy: ApprovalPolicy,
    /// Deadline for the guardian stage, counted from creation
    pub parent_window: Duration,
    /// Deadline for the warden stage, counted from entering PENDING_WARDEN
    pub warden_window: Duration,
    /// Longest allowed `to_time - from_time`
    pub max_duration: Duration,
    pub sweep_interval: Duration,
    /// Attempts per transition when a concurrent write wins
    pub max_retries: u32,
}

impl WorkflowPolicy {
    fn from_raw(raw: RawWorkflow) -> Self {
        let parent_window = raw
            .pending_window_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_PENDING_WINDOW);

        Self {
            approval_policy: raw.approval_policy.unwrap_or_default(),
            parent_window,
            warden_window: raw
                .warden_window_seconds
                .map(Duration::from_secs)
                .unwrap_or(parent_window),
            max_duration: raw
                .max_duration_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_MAX_DURATION),
            sweep_interval: raw
                .sweep_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SWEEP_INTERVAL),
            max_retries: raw.max_transition_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        }
    }

    pub fn with_approval_policy(mut self, approval_policy: ApprovalPolicy) -> Self {
        self.approval_policy = approval_policy;
        self
    }
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            approval_policy: ApprovalPolicy::AnyOne,
            parent_window: DEFAULT_PENDING_WINDOW,
            warden_window: DEFAULT_PENDING_WINDOW,
            max_duration: DEFAULT_MAX_DURATION,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// How approval links are built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPolicy {
    /// Base URL without a trailing slash
    pub approval_base_url: String,
}

impl NotificationPolicy {
    fn from_raw(raw: RawNotifications) -> Self {
        let base = raw
            .approval_base_url
            .unwrap_or_else(|| DEFAULT_APPROVAL_BASE_URL.to_string());

        Self {
            approval_base_url: base.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            approval_base_url: DEFAULT_APPROVAL_BASE_URL.to_string(),
        }
    }
}
