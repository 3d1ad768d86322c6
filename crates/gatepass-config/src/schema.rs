//! Raw configuration schema (as parsed from TOML)

use gatepass_api::ApprovalPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Global daemon settings
    #[serde(default)]
    pub daemon: RawDaemonConfig,

    /// Approval workflow settings
    #[serde(default)]
    pub workflow: RawWorkflow,

    /// Guardian notification settings
    #[serde(default)]
    pub notifications: RawNotifications,
}

/// Daemon-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawDaemonConfig {
    /// IPC socket path (default: $XDG_RUNTIME_DIR/gatepassd/gatepassd.sock)
    pub socket_path: Option<PathBuf>,

    /// Data directory for the store
    pub data_dir: Option<PathBuf>,
}

/// Workflow settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawWorkflow {
    /// "ANY_ONE" (default) or "ALL_REQUIRED"
    pub approval_policy: Option<ApprovalPolicy>,

    /// How long guardians have to decide, in seconds (default 3600)
    pub pending_window_seconds: Option<u64>,

    /// How long the warden has to decide, in seconds (defaults to the pending window)
    pub warden_window_seconds: Option<u64>,

    /// Longest allowed leave, in seconds (default 86400)
    pub max_duration_seconds: Option<u64>,

    /// How often the daemon sweeps expired requests, in seconds (default 60)
    pub sweep_interval_seconds: Option<u64>,

    /// Attempts per transition when a concurrent write wins (default 5)
    pub max_transition_retries: Option<u32>,
}

/// Notification settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawNotifications {
    /// Base URL that approval links are built on,
    /// e.g. `https://gate.example.edu` gives `https://gate.example.edu/approval/{token}/approve`
    pub approval_base_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_workflow_section() {
        let toml_str = r#"
            config_version = 1

            [workflow]
            approval_policy = "ALL_REQUIRED"
            max_duration_seconds = 3600
        "#;

        let config: RawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.workflow.approval_policy,
            Some(ApprovalPolicy::AllRequired)
        );
        assert_eq!(config.workflow.max_duration_seconds, Some(3600));
        assert!(config.workflow.pending_window_seconds.is_none());
    }

    #[test]
    fn reject_unknown_policy() {
        let toml_str = r#"
            config_version = 1

            [workflow]
            approval_policy = "MAJORITY"
        "#;

        assert!(toml::from_str::<RawConfig>(toml_str).is_err());
    }
}
