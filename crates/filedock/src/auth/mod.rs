//! Authentication and authorization stores.
//!
//! Three independent stores, each guarding its state with exactly one
//! reader/writer lock:
//!
//! - [`PermissionStore`]: allowed path prefixes, persisted to `.permissions`
//! - [`UserStore`]: username/password records, persisted to `user.json`
//! - [`SessionStore`]: in-memory session tokens
//!
//! No store ever calls into another while holding its own lock. The user
//! store's session invalidation runs after its lock is released.
//!
//! # Security
//!
//! The defaults keep the on-disk formats of existing deployments: passwords
//! are stored and compared in plaintext, and session tokens equal the
//! username. Both sit behind small traits ([`CredentialVerifier`],
//! [`TokenIssuer`]) so hardened variants can be swapped in.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub mod permissions;
pub mod sessions;
pub mod users;

pub use permissions::{default_permissions_path, PermissionStore, PERMISSIONS_FILE_NAME};
pub use sessions::{
    RandomTokens, Session, SessionInvalidator, SessionStore, TokenIssuer, UsernameTokens,
};
pub use users::{
    default_users_path, AuthOutcome, CredentialVerifier, PlaintextVerifier, User,
    UserStore, DEFAULT_ADMIN_PASSWORD, DEFAULT_ADMIN_USERNAME, USERS_FILE_NAME,
};

/// Writes `contents` to `path` via a sibling temp file and a rename.
///
/// Readers of `path` see either the old or the new contents, never a
/// truncated file. Creates parent directories if needed.
pub(crate) fn write_atomic(path: &Path, contents: &str, what: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {} directory: {}", what, parent.display()))?;
    }

    let mut temp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    fs::write(&temp_path, contents)
        .with_context(|| format!("Failed to write temp {}: {}", what, temp_path.display()))?;

    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename temp {} {} to {}",
            what,
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}
