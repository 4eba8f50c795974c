//! The single authorization gate in front of every file operation.
//!
//! [`AccessController::authorize`] runs three checks in a fixed order:
//!
//! 1. containment of the path inside the root
//! 2. the permission table, on the normalised relative path
//! 3. the session token
//!
//! The path is always contained before anything else evaluates it.

use std::fmt;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::auth::{
    AuthOutcome, PermissionStore, RandomTokens, SessionStore, TokenIssuer, UserStore,
    UsernameTokens,
};
use crate::config::Config;
use crate::error::AccessError;
use crate::paths::{self, ResolvedPath, Root};

/// Kind of operation being authorized. Used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileOperation {
    Read,
    List,
    Write,
    Create,
    Delete,
    Upload,
}

impl FileOperation {
    /// Returns true for operations that change the filesystem.
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            FileOperation::Write
                | FileOperation::Create
                | FileOperation::Delete
                | FileOperation::Upload
        )
    }
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileOperation::Read => "read",
            FileOperation::List => "list",
            FileOperation::Write => "write",
            FileOperation::Create => "create",
            FileOperation::Delete => "delete",
            FileOperation::Upload => "upload",
        };
        f.write_str(name)
    }
}

/// Which of the optional checks a deployment enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPolicy {
    pub require_permissions: bool,
    pub require_session: bool,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            require_permissions: true,
            require_session: true,
        }
    }
}

/// Composes the path resolver with the three stores.
pub struct AccessController {
    root: Root,
    permissions: Arc<PermissionStore>,
    users: Arc<UserStore>,
    sessions: Arc<SessionStore>,
    policy: AccessPolicy,
}

impl AccessController {
    /// Builds a controller from already-loaded stores.
    ///
    /// The user store should carry `sessions` as its invalidator, otherwise
    /// external edits to the user file will not drop live sessions.
    pub fn new(
        root: Root,
        permissions: Arc<PermissionStore>,
        users: Arc<UserStore>,
        sessions: Arc<SessionStore>,
        policy: AccessPolicy,
    ) -> Self {
        Self {
            root,
            permissions,
            users,
            sessions,
            policy,
        }
    }

    /// Creates directories, loads the stores and wires them together.
    ///
    /// If the user store is empty the default admin account is created.
    /// Persisting it may fail without aborting startup unless
    /// `auth.fatal_bootstrap_errors` is set.
    pub fn open(config: &Config) -> Result<Self> {
        let root = Root::new(&config.files.root).with_context(|| {
            format!("Failed to resolve root: {}", config.files.root.display())
        })?;
        fs::create_dir_all(root.as_path())
            .with_context(|| format!("Failed to create root directory: {}", root))?;

        let data_dir = &config.auth.data_dir;
        fs::create_dir_all(data_dir).with_context(|| {
            format!("Failed to create auth data directory: {}", data_dir.display())
        })?;

        let permissions = Arc::new(PermissionStore::in_dir(data_dir));
        permissions.load()?;

        let issuer: Box<dyn TokenIssuer> = if config.auth.random_tokens {
            Box::new(RandomTokens)
        } else {
            Box::new(UsernameTokens)
        };
        let sessions = Arc::new(
            SessionStore::with_issuer(issuer)
                .with_idle_timeout(Duration::from_secs(config.auth.session_idle_timeout)),
        );

        let users = Arc::new(
            UserStore::in_dir(data_dir)
                .with_content_hash(config.auth.verify_content_hash)
                .with_session_invalidator(sessions.clone()),
        );
        users.load()?;

        match users.bootstrap_default_admin() {
            Ok(_) => {}
            Err(e) if config.auth.fatal_bootstrap_errors => {
                return Err(e.context("Failed to persist default admin account"));
            }
            Err(e) => {
                tracing::error!(
                    "Failed to persist default admin account, logins are refused until the user file exists: {:#}",
                    e
                );
            }
        }

        let policy = AccessPolicy {
            require_permissions: config.auth.require_permissions,
            require_session: config.auth.require_session,
        };

        tracing::info!(
            root = %root,
            require_permissions = policy.require_permissions,
            require_session = policy.require_session,
            "Access controller ready"
        );

        Ok(Self::new(root, permissions, users, sessions, policy))
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    pub fn policy(&self) -> AccessPolicy {
        self.policy
    }

    pub fn permissions(&self) -> &Arc<PermissionStore> {
        &self.permissions
    }

    pub fn users(&self) -> &Arc<UserStore> {
        &self.users
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Authenticates and opens a session, returning its token.
    ///
    /// An attempt consumed by a user file reload is reported as
    /// `Unauthorized` like any other failure.
    pub fn login(&self, username: &str, password: &str) -> Result<String, AccessError> {
        match self.users.authenticate_outcome(username, password)? {
            AuthOutcome::Granted => {
                let token = self.sessions.create_session(username)?;
                tracing::info!(username = %username, "Login succeeded");
                Ok(token)
            }
            AuthOutcome::Denied => {
                tracing::warn!(username = %username, "Login failed");
                Err(AccessError::Unauthorized("invalid credentials".to_string()))
            }
            AuthOutcome::Reloaded => Err(AccessError::Unauthorized(
                "user store changed, please log in again".to_string(),
            )),
            AuthOutcome::Unavailable => Err(AccessError::Unauthorized(
                "user store unavailable".to_string(),
            )),
        }
    }

    /// Ends a session. Returns true if the token was live.
    pub fn logout(&self, token: &str) -> Result<bool, AccessError> {
        Ok(self.sessions.remove(token)?)
    }

    /// Decides whether the holder of `token` may perform `op` on `rel_path`.
    ///
    /// Returns the contained path on success. Only lexical containment is
    /// proven here; callers touching the filesystem follow up with
    /// [`paths::verify_physical`].
    pub fn authorize(
        &self,
        token: Option<&str>,
        rel_path: &str,
        op: FileOperation,
    ) -> Result<ResolvedPath, AccessError> {
        let resolved = match paths::resolve(&self.root, rel_path) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(op = %op, path = %rel_path, "Rejected path outside root");
                return Err(e);
            }
        };

        if self.policy.require_permissions && !self.permissions.has(resolved.relative())? {
            tracing::warn!(
                op = %op,
                mutation = op.is_mutation(),
                path = %resolved.relative(),
                principal = token.unwrap_or("-"),
                "Permission denied"
            );
            return Err(AccessError::Forbidden(resolved.relative().to_string()));
        }

        if self.policy.require_session {
            let valid = match token {
                Some(token) => self.sessions.validate_and_touch(token)?,
                None => false,
            };
            if !valid {
                tracing::warn!(
                    op = %op,
                    path = %resolved.relative(),
                    "Missing or invalid session"
                );
                return Err(AccessError::Unauthorized(
                    "missing or invalid session".to_string(),
                ));
            }
        }

        if op.is_mutation() {
            tracing::info!(op = %op, path = %resolved.relative(), "Authorized change");
        } else {
            tracing::debug!(op = %op, path = %resolved.relative(), "Authorized");
        }
        Ok(resolved)
    }
}
