//! File-backed user credential store.
//!
//! The backing file is a JSON array of `{"username", "password"}` records,
//! written with two-space indentation. Out-of-band edits to the file are
//! picked up on the next authentication attempt; see
//! [`UserStore::authenticate_outcome`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::sessions::SessionInvalidator;
use super::write_atomic;

/// File name of the user table inside the auth data directory.
pub const USERS_FILE_NAME: &str = "user.json";

/// Username of the account created when the store starts empty.
pub const DEFAULT_ADMIN_USERNAME: &str = "admin";

/// Password of the account created when the store starts empty.
///
/// Well known. Operators must change it after first start.
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin";

/// A stored user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub password: String,
}

impl User {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Compares a supplied credential against the stored one.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, stored: &str, supplied: &str) -> bool;
}

/// Exact string equality against a plaintext stored password.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextVerifier;

impl CredentialVerifier for PlaintextVerifier {
    fn verify(&self, stored: &str, supplied: &str) -> bool {
        stored == supplied
    }
}

/// Steps of one reconciliation with the backing file.
///
/// `Fresh` → `StaleDetected` → `Reloading` → `Fresh`. Every pass through
/// `StaleDetected` fails the authentication attempt that observed it. The
/// whole walk runs under the store's write lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReloadState {
    /// In-memory users match the last-seen file.
    Fresh,
    /// The file changed since it was last seen.
    StaleDetected,
    /// Re-reading the file.
    Reloading,
}

/// Result of an authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Credentials matched.
    Granted,
    /// Unknown user or wrong password.
    Denied,
    /// The attempt detected an external edit and was consumed by the
    /// reload. Every session was invalidated; the caller must retry.
    Reloaded,
    /// The backing file is missing or cannot be inspected. Every session
    /// was invalidated and logins are refused until the file is back.
    Unavailable,
}

/// What a reconciliation found.
enum Reconciled {
    Unchanged,
    Reloaded,
    Unavailable,
}

impl AuthOutcome {
    pub fn is_granted(self) -> bool {
        self == AuthOutcome::Granted
    }
}

/// What the store last knew about its backing file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    /// Hex SHA-256 of the contents, only tracked with content hashing on.
    digest: Option<String>,
}

struct Inner {
    users: HashMap<String, User>,
    seen: Fingerprint,
}

/// Thread-safe user store backed by `user.json`.
pub struct UserStore {
    path: PathBuf,
    inner: RwLock<Inner>,
    verifier: Box<dyn CredentialVerifier>,
    verify_content_hash: bool,
    invalidator: Option<Arc<dyn SessionInvalidator>>,
}

impl UserStore {
    /// Creates an empty store that persists to `path`.
    ///
    /// This does not read the file; call `load()` for that.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            inner: RwLock::new(Inner {
                users: HashMap::new(),
                seen: Fingerprint::default(),
            }),
            verifier: Box::new(PlaintextVerifier),
            verify_content_hash: false,
            invalidator: None,
        }
    }

    /// Creates a store backed by `user.json` inside `data_dir`.
    pub fn in_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        Self::new(data_dir.as_ref().join(USERS_FILE_NAME))
    }

    /// Replaces the credential comparison.
    pub fn with_verifier(mut self, verifier: Box<dyn CredentialVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Also treats a same-mtime file with different contents as modified.
    pub fn with_content_hash(mut self, enabled: bool) -> Self {
        self.verify_content_hash = enabled;
        self
    }

    /// Registers the sessions to drop when an external edit is detected.
    pub fn with_session_invalidator(mut self, invalidator: Arc<dyn SessionInvalidator>) -> Self {
        self.invalidator = Some(invalidator);
        self
    }

    /// Returns the path to the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads users from the backing file, replacing the in-memory map.
    ///
    /// A missing file leaves the store empty. Later records win over
    /// earlier ones with the same username.
    pub fn load(&self) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on user store"))?;

        if !self.path.exists() {
            tracing::debug!("User file not found at {:?}, starting empty", self.path);
            inner.users.clear();
            inner.seen = Fingerprint::default();
            return Ok(());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read user file: {}", self.path.display()))?;
        let users = parse_users(&contents, &self.path)?;

        inner.seen = self.fingerprint_of(&contents)?;
        inner.users = users;

        tracing::info!("Loaded {} users from {:?}", inner.users.len(), self.path);
        Ok(())
    }

    /// Writes every user to the backing file.
    pub fn save(&self) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on user store"))?;
        self.save_locked(&mut inner)
    }

    /// Inserts or overwrites a user and persists.
    pub fn add_user(&self, username: &str, password: &str) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on user store"))?;

        inner
            .users
            .insert(username.to_string(), User::new(username, password));
        tracing::info!(username = %username, "Stored user");
        self.save_locked(&mut inner)
    }

    /// Inserts a new user and persists. Fails if the username is taken.
    pub fn create_user(&self, username: &str, password: &str) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on user store"))?;

        if inner.users.contains_key(username) {
            anyhow::bail!("User already exists: {}", username);
        }
        inner
            .users
            .insert(username.to_string(), User::new(username, password));
        tracing::info!(username = %username, "Created user");
        self.save_locked(&mut inner)
    }

    /// Replaces an existing user's password and persists. Fails if the user
    /// does not exist.
    pub fn change_password(&self, username: &str, password: &str) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on user store"))?;

        let user = inner
            .users
            .get_mut(username)
            .ok_or_else(|| anyhow::anyhow!("User not found: {}", username))?;
        user.password = password.to_string();
        tracing::info!(username = %username, "Changed password");
        self.save_locked(&mut inner)
    }

    /// Removes a user and persists. Returns the removed record, if any.
    pub fn remove_user(&self, username: &str) -> Result<Option<User>> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on user store"))?;

        let removed = inner.users.remove(username);
        if removed.is_some() {
            tracing::info!(username = %username, "Removed user");
        }
        self.save_locked(&mut inner)?;
        Ok(removed)
    }

    /// Returns a copy of one user.
    pub fn get_user(&self, username: &str) -> Result<Option<User>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on user store"))?;
        Ok(inner.users.get(username).cloned())
    }

    /// Returns every user, sorted by username.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on user store"))?;

        let mut users: Vec<User> = inner.users.values().cloned().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    pub fn len(&self) -> Result<usize> {
        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on user store"))?;
        Ok(inner.users.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Creates the default admin account if the store is empty.
    ///
    /// Returns true if the account was created. The account stays in memory
    /// even if persisting it fails; the error is returned so the caller can
    /// decide whether that is fatal.
    pub fn bootstrap_default_admin(&self) -> Result<bool> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on user store"))?;

        if !inner.users.is_empty() {
            return Ok(false);
        }

        inner.users.insert(
            DEFAULT_ADMIN_USERNAME.to_string(),
            User::new(DEFAULT_ADMIN_USERNAME, DEFAULT_ADMIN_PASSWORD),
        );
        tracing::warn!(
            username = DEFAULT_ADMIN_USERNAME,
            "User store was empty, created default admin account with the default password"
        );
        self.save_locked(&mut inner)?;
        Ok(true)
    }

    /// Checks a credential. See [`authenticate_outcome`](Self::authenticate_outcome).
    pub fn authenticate(&self, username: &str, password: &str) -> Result<bool> {
        Ok(self.authenticate_outcome(username, password)?.is_granted())
    }

    /// Checks a credential after reconciling with the backing file.
    ///
    /// If the file was modified out of band since it was last seen, the
    /// users are reloaded, every session is invalidated and the attempt
    /// returns [`AuthOutcome::Reloaded`] whatever the credential. If the
    /// file is missing or cannot be inspected, every session is invalidated
    /// and the attempt returns [`AuthOutcome::Unavailable`]. Otherwise the
    /// password is compared for the named user.
    pub fn authenticate_outcome(&self, username: &str, password: &str) -> Result<AuthOutcome> {
        // The write lock is released before touching the session store.
        match self.reconcile()? {
            Reconciled::Unchanged => {}
            Reconciled::Reloaded => {
                self.invalidate_sessions();
                tracing::warn!(
                    username = %username,
                    "User file changed on disk, sessions invalidated and attempt rejected"
                );
                return Ok(AuthOutcome::Reloaded);
            }
            Reconciled::Unavailable => {
                self.invalidate_sessions();
                tracing::warn!(
                    username = %username,
                    "User file unavailable, sessions invalidated and attempt rejected"
                );
                return Ok(AuthOutcome::Unavailable);
            }
        }

        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on user store"))?;

        let granted = inner
            .users
            .get(username)
            .is_some_and(|user| self.verifier.verify(&user.password, password));

        Ok(if granted {
            AuthOutcome::Granted
        } else {
            AuthOutcome::Denied
        })
    }

    fn invalidate_sessions(&self) {
        if let Some(invalidator) = &self.invalidator {
            invalidator.invalidate_all();
        }
    }

    /// Runs the reload state machine to completion under the write lock.
    fn reconcile(&self) -> Result<Reconciled> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on user store"))?;

        let mut state = ReloadState::Fresh;
        let mut current = Fingerprint::default();
        loop {
            match state {
                ReloadState::Fresh => match self.current_fingerprint() {
                    Ok(fp) if self.is_newer(&fp, &inner.seen) => {
                        current = fp;
                        state = ReloadState::StaleDetected;
                    }
                    Ok(_) => return Ok(Reconciled::Unchanged),
                    Err(e) => {
                        tracing::warn!("Cannot inspect user file: {:#}", e);
                        // Whatever comes back is treated as an edit.
                        inner.seen = Fingerprint::default();
                        return Ok(Reconciled::Unavailable);
                    }
                },
                ReloadState::StaleDetected => {
                    tracing::info!(
                        "External modification of {:?} detected, reloading users",
                        self.path
                    );
                    state = ReloadState::Reloading;
                }
                ReloadState::Reloading => {
                    inner.seen = current;

                    match fs::read_to_string(&self.path)
                        .with_context(|| {
                            format!("Failed to read user file: {}", self.path.display())
                        })
                        .and_then(|contents| parse_users(&contents, &self.path))
                    {
                        Ok(users) => {
                            inner.users = users;
                            tracing::info!(
                                "Reloaded {} users from {:?}",
                                inner.users.len(),
                                self.path
                            );
                        }
                        Err(e) => {
                            tracing::error!(
                                "Failed to reload users, keeping previous set: {:#}",
                                e
                            );
                        }
                    }
                    return Ok(Reconciled::Reloaded);
                }
            }
        }
    }

    fn is_newer(&self, current: &Fingerprint, seen: &Fingerprint) -> bool {
        let newer_mtime = match (current.modified, seen.modified) {
            (Some(now), Some(before)) => now > before,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if newer_mtime {
            return true;
        }
        self.verify_content_hash
            && current.modified == seen.modified
            && current.digest != seen.digest
    }

    /// Reads the backing file's fingerprint. Fails if the file is missing.
    fn current_fingerprint(&self) -> Result<Fingerprint> {
        let metadata = fs::metadata(&self.path)
            .with_context(|| format!("Failed to stat user file: {}", self.path.display()))?;

        let digest = if self.verify_content_hash {
            let contents = fs::read(&self.path)
                .with_context(|| format!("Failed to read user file: {}", self.path.display()))?;
            Some(hex::encode(Sha256::digest(&contents)))
        } else {
            None
        };

        Ok(Fingerprint {
            modified: metadata.modified().ok(),
            digest,
        })
    }

    fn fingerprint_of(&self, contents: &str) -> Result<Fingerprint> {
        let metadata = fs::metadata(&self.path)
            .with_context(|| format!("Failed to stat user file: {}", self.path.display()))?;
        Ok(Fingerprint {
            modified: metadata.modified().ok(),
            digest: self
                .verify_content_hash
                .then(|| hex::encode(Sha256::digest(contents.as_bytes()))),
        })
    }

    /// Writes the map to disk and records the result as seen, so our own
    /// write is not taken for an external edit. Called with the write lock
    /// held.
    fn save_locked(&self, inner: &mut Inner) -> Result<()> {
        let mut users: Vec<&User> = inner.users.values().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));

        let mut contents =
            serde_json::to_string_pretty(&users).context("Failed to serialize users")?;
        contents.push('\n');

        write_atomic(&self.path, &contents, "user file")?;
        inner.seen = self.fingerprint_of(&contents)?;

        tracing::debug!("Saved {} users to {:?}", users.len(), self.path);
        Ok(())
    }
}

fn parse_users(contents: &str, path: &Path) -> Result<HashMap<String, User>> {
    let records: Vec<User> = serde_json::from_str(contents)
        .with_context(|| format!("Failed to parse user file: {}", path.display()))?;

    let mut users = HashMap::with_capacity(records.len());
    for user in records {
        users.insert(user.username.clone(), user);
    }
    Ok(users)
}

/// Returns the default users path inside `data_dir`.
pub fn default_users_path<P: AsRef<Path>>(data_dir: P) -> PathBuf {
    data_dir.as_ref().join(USERS_FILE_NAME)
}
