//! Configuration management for filedock.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/filedock/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths::Root;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_upload_size must be greater than 0, got {0}")]
    InvalidMaxUploadSize(u64),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("auth.data_dir must not be inside files.root: {0}")]
    AuthDirInsideRoot(String),

    #[error("files.root must not be empty")]
    EmptyRoot,
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Default upload limit: 20 MiB.
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 20 * 1024 * 1024;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Process-level settings.
    pub daemon: DaemonConfig,

    /// Served file tree.
    pub files: FilesConfig,

    /// Users, permissions and sessions.
    pub auth: AuthConfig,
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    pub log_file: Option<PathBuf>,
}

/// Served file tree settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilesConfig {
    /// Directory exposed through the file API.
    pub root: PathBuf,

    /// Only allow content writes to `.md` files.
    pub markdown_only_writes: bool,

    /// Maximum upload size in bytes.
    pub max_upload_size: u64,
}

/// Authentication and authorization settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// Directory holding `.permissions` and `user.json`.
    pub data_dir: PathBuf,

    /// Check every path against the permission table.
    pub require_permissions: bool,

    /// Require a valid session token on every operation.
    pub require_session: bool,

    /// Idle timeout for sessions in seconds (0 = never expire).
    pub session_idle_timeout: u64,

    /// Detect same-mtime edits of `user.json` by content hash.
    pub verify_content_hash: bool,

    /// Abort startup if the default admin account cannot be persisted.
    pub fatal_bootstrap_errors: bool,

    /// Issue random session tokens instead of the username.
    pub random_tokens: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data"),
            markdown_only_writes: true,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./.user"),
            require_permissions: true,
            require_session: true,
            session_idle_timeout: 0,
            verify_content_hash: false,
            fatal_bootstrap_errors: false,
            random_tokens: false,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filedock")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Empty values are ignored. Supported variables:
    /// - FILEDOCK_ROOT: Override the served directory (`DATA_DIR` is
    ///   accepted as a fallback)
    /// - FILEDOCK_AUTH_DIR: Override the auth data directory
    /// - FILEDOCK_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        let root = non_empty_env("FILEDOCK_ROOT").or_else(|| non_empty_env("DATA_DIR"));
        if let Some(root) = root {
            tracing::info!("Overriding files.root from environment: {}", root);
            self.files.root = PathBuf::from(root);
        }

        if let Some(dir) = non_empty_env("FILEDOCK_AUTH_DIR") {
            tracing::info!("Overriding auth.data_dir from environment: {}", dir);
            self.auth.data_dir = PathBuf::from(dir);
        }

        if let Some(level) = non_empty_env("FILEDOCK_LOG_LEVEL") {
            tracing::info!("Overriding log_level from environment: {}", level);
            self.daemon.log_level = level;
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.files.max_upload_size == 0 {
            return Err(ConfigError::InvalidMaxUploadSize(self.files.max_upload_size));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        if self.files.root.as_os_str().is_empty() {
            return Err(ConfigError::EmptyRoot);
        }

        // The credential files must not be reachable through the file API.
        if let (Ok(root), Ok(auth_dir)) = (Root::new(&self.files.root), Root::new(&self.auth.data_dir)) {
            if root.contains(auth_dir.as_path()) {
                return Err(ConfigError::AuthDirInsideRoot(
                    self.auth.data_dir.display().to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        std::env::remove_var("FILEDOCK_ROOT");
        std::env::remove_var("DATA_DIR");
        std::env::remove_var("FILEDOCK_AUTH_DIR");
        std::env::remove_var("FILEDOCK_LOG_LEVEL");
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.daemon.log_level, "info");
        assert!(config.daemon.log_file.is_none());
        assert_eq!(config.files.root, PathBuf::from("./data"));
        assert!(config.files.markdown_only_writes);
        assert_eq!(config.files.max_upload_size, 20 * 1024 * 1024);
        assert_eq!(config.auth.data_dir, PathBuf::from("./.user"));
        assert!(config.auth.require_permissions);
        assert!(config.auth.require_session);
        assert_eq!(config.auth.session_idle_timeout, 0);
        assert!(!config.auth.verify_content_hash);
        assert!(!config.auth.fatal_bootstrap_errors);
        assert!(!config.auth.random_tokens);
    }

    #[test]
    fn test_from_toml_empty() {
        // Empty TOML should use all defaults
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[files]
root = "/srv/notes"

[auth]
require_permissions = false
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.files.root, PathBuf::from("/srv/notes"));
        assert!(!config.auth.require_permissions);
        // Other values should be defaults
        assert!(config.auth.require_session);
        assert_eq!(config.daemon.log_level, "info");
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[daemon]
log_level = "trace"
log_file = "/var/log/filedock.log"

[files]
root = "/srv/notes"
markdown_only_writes = false
max_upload_size = 1048576

[auth]
data_dir = "/var/lib/filedock"
require_permissions = false
require_session = false
session_idle_timeout = 900
verify_content_hash = true
fatal_bootstrap_errors = true
random_tokens = true
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.daemon.log_level, "trace");
        assert_eq!(
            config.daemon.log_file,
            Some(PathBuf::from("/var/log/filedock.log"))
        );
        assert_eq!(config.files.root, PathBuf::from("/srv/notes"));
        assert!(!config.files.markdown_only_writes);
        assert_eq!(config.files.max_upload_size, 1048576);
        assert_eq!(config.auth.data_dir, PathBuf::from("/var/lib/filedock"));
        assert!(!config.auth.require_permissions);
        assert!(!config.auth.require_session);
        assert_eq!(config.auth.session_idle_timeout, 900);
        assert!(config.auth.verify_content_hash);
        assert!(config.auth.fatal_bootstrap_errors);
        assert!(config.auth.random_tokens);
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let toml = r#"
[files
root = "/srv"
"#;
        let err = Config::from_toml(toml).unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[files]
max_upload_size = "big"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_roundtrip() {
        let mut original = Config::default();
        original.daemon.log_file = Some(PathBuf::from("/tmp/filedock.log"));
        original.auth.session_idle_timeout = 60;
        original.auth.random_tokens = true;

        let toml = original.to_toml().unwrap();
        assert!(toml.contains("[daemon]"));
        assert!(toml.contains("[files]"));
        assert!(toml.contains("[auth]"));

        let loaded = Config::from_toml(&toml).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(temp_dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.files.root = PathBuf::from("/srv/notes");
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "this is not [valid").unwrap();

        let err = format!("{:#}", Config::load(&path).unwrap_err());
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let toml = r#"
[files]
root = "/srv"
shiny_new_option = true
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.files.root, PathBuf::from("/srv"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("filedock/config.toml"));
    }

    #[test]
    #[serial]
    fn test_env_override_root() {
        clear_env();
        std::env::set_var("FILEDOCK_ROOT", "/srv/env-root");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.files.root, PathBuf::from("/srv/env-root"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_legacy_data_dir() {
        clear_env();
        std::env::set_var("DATA_DIR", "/srv/legacy");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.files.root, PathBuf::from("/srv/legacy"));

        // The new name wins over the legacy one.
        std::env::set_var("FILEDOCK_ROOT", "/srv/new");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.files.root, PathBuf::from("/srv/new"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_auth_dir_and_log_level() {
        clear_env();
        std::env::set_var("FILEDOCK_AUTH_DIR", "/var/lib/filedock");
        std::env::set_var("FILEDOCK_LOG_LEVEL", "debug");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.auth.data_dir, PathBuf::from("/var/lib/filedock"));
        assert_eq!(config.daemon.log_level, "debug");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        clear_env();
        std::env::set_var("FILEDOCK_ROOT", "");
        std::env::set_var("FILEDOCK_LOG_LEVEL", "");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config, Config::default());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_unset_does_not_override() {
        clear_env();

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_validate_default_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_max_upload_size_zero() {
        let mut config = Config::default();
        config.files.max_upload_size = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidMaxUploadSize(0))
        );
    }

    #[test]
    fn test_validate_log_levels() {
        let mut config = Config::default();
        for level in ["trace", "debug", "info", "warn", "error", "DEBUG"] {
            config.daemon.log_level = level.to_string();
            assert!(config.validate().is_ok(), "level {} should be valid", level);
        }

        config.daemon.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    fn test_validate_empty_root() {
        let mut config = Config::default();
        config.files.root = PathBuf::new();
        assert_eq!(config.validate(), Err(ConfigError::EmptyRoot));
    }

    #[test]
    fn test_validate_auth_dir_inside_root() {
        let mut config = Config::default();
        config.files.root = PathBuf::from("/srv/notes");
        config.auth.data_dir = PathBuf::from("/srv/notes/.user");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AuthDirInsideRoot(_))
        ));

        config.auth.data_dir = PathBuf::from("/srv/notes/sub/../.user");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AuthDirInsideRoot(_))
        ));

        config.auth.data_dir = PathBuf::from("/srv/notes-auth");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_auth_dir_equal_to_root() {
        let mut config = Config::default();
        config.files.root = PathBuf::from("/srv/notes");
        config.auth.data_dir = PathBuf::from("/srv/notes");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AuthDirInsideRoot(_))
        ));
    }
}
