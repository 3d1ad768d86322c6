//! Config validation CLI tool
//!
//! Validates a gatepassd configuration file and reports any errors.

use gatepass_api::ApprovalPolicy;
use gatepass_util::{default_config_path, format_duration};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    // Path is the only argument; print usage without it
    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a gatepassd configuration file.");
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    // Check file exists
    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    // Parse, validate and summarize the effective policy
    match gatepass_config::load_config(&config_path) {
        Ok(policy) => {
            let workflow = &policy.workflow;
            let approval = match workflow.approval_policy {
                ApprovalPolicy::AnyOne => "any one guardian",
                ApprovalPolicy::AllRequired => "all guardians",
            };

            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", gatepass_config::CURRENT_CONFIG_VERSION);
            println!("  Approval: {}", approval);
            println!("  Guardian window: {}", format_duration(workflow.parent_window));
            println!("  Warden window: {}", format_duration(workflow.warden_window));
            println!("  Max leave: {}", format_duration(workflow.max_duration));
            println!("  Sweep every: {}", format_duration(workflow.sweep_interval));
            println!("  Approval links: {}/approval/...", policy.notifications.approval_base_url);

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                gatepass_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                gatepass_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                gatepass_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                gatepass_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        gatepass_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
