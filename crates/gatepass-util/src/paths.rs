//! Default paths for gatepassd components
//!
//! Paths are user-writable by default (no root required):
//! - Socket: `$XDG_RUNTIME_DIR/gatepassd/gatepassd.sock` or `/tmp/gatepassd-$USER/gatepassd.sock`
//! - Data: `$XDG_DATA_HOME/gatepassd` or `~/.local/share/gatepassd`
//! - Config: `$XDG_CONFIG_HOME/gatepass/config.toml` or `~/.config/gatepass/config.toml`

use std::path::PathBuf;

/// Environment variable for overriding the socket path
pub const GATEPASS_SOCKET_ENV: &str = "GATEPASS_SOCKET";

/// Environment variable for overriding the data directory
pub const GATEPASS_DATA_DIR_ENV: &str = "GATEPASS_DATA_DIR";

const SOCKET_FILENAME: &str = "gatepassd.sock";

const APP_DIR: &str = "gatepassd";

const CONFIG_DIR: &str = "gatepass";

/// Get the default socket path.
///
/// Order of precedence:
/// 1. `$GATEPASS_SOCKET` environment variable (if set)
/// 2. `$XDG_RUNTIME_DIR/gatepassd/gatepassd.sock` (if XDG_RUNTIME_DIR is set)
/// 3. `/tmp/gatepassd-$USER/gatepassd.sock` (fallback)
pub fn default_socket_path() -> PathBuf {
    // Environment override wins
    if let Ok(path) = std::env::var(GATEPASS_SOCKET_ENV) {
        return PathBuf::from(path);
    }

    socket_path_without_env()
}

/// Get the socket path without checking the GATEPASS_SOCKET env var.
/// Used for config defaults where the env var is checked separately.
pub fn socket_path_without_env() -> PathBuf {
    // Per-user runtime dir, cleared on logout
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    // No runtime dir: a per-user directory under /tmp
    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$GATEPASS_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/gatepassd` (if XDG_DATA_HOME is set)
/// 3. `~/.local/share/gatepassd` (fallback)
pub fn default_data_dir() -> PathBuf {
    // Environment override wins
    if let Ok(path) = std::env::var(GATEPASS_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking the GATEPASS_DATA_DIR env var.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    // Last resort; data will not survive a reboot
    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

/// Get the default configuration file path.
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(CONFIG_DIR).join("config.toml");
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(CONFIG_DIR)
            .join("config.toml");
    }

    // System-wide config
    PathBuf::from("/etc").join(CONFIG_DIR).join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_contains_gatepassd() {
        let path = socket_path_without_env();
        assert!(path.to_string_lossy().contains("gatepassd"));
        assert!(path.to_string_lossy().ends_with(".sock"));
    }

    #[test]
    fn data_dir_contains_gatepassd() {
        let path = data_dir_without_env();
        assert!(path.to_string_lossy().contains("gatepassd"));
    }

    #[test]
    fn config_path_is_toml() {
        let path = default_config_path();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("toml"));
    }
}
