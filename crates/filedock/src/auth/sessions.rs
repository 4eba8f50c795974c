//! In-memory session tracking.
//!
//! Sessions are never persisted; a restart drops them all.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant, SystemTime};

use anyhow::Result;

/// Produces the token handed to a client after a successful login.
pub trait TokenIssuer: Send + Sync {
    /// Returns a token for `username`.
    fn issue(&self, username: &str) -> String;
}

/// Uses the username itself as the token.
///
/// Anyone who knows a logged-in username can present it as a token. Kept as
/// the default for compatibility with existing clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct UsernameTokens;

impl TokenIssuer for UsernameTokens {
    fn issue(&self, username: &str) -> String {
        username.to_string()
    }
}

/// Issues an unguessable random token per login.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomTokens;

impl TokenIssuer for RandomTokens {
    fn issue(&self, _username: &str) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

/// Receives a "drop every session" signal from another store.
///
/// The user store calls this after detecting an out-of-band edit to its
/// backing file.
pub trait SessionInvalidator: Send + Sync {
    /// Drops every live session.
    fn invalidate_all(&self);
}

/// An active session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque token presented by the client.
    pub token: String,
    /// Authenticated username.
    pub username: String,
    /// Wall-clock creation time.
    pub created_at: SystemTime,
    /// Last time the token was validated.
    pub last_activity: Instant,
}

impl Session {
    fn new(token: String, username: String) -> Self {
        Self {
            token,
            username,
            created_at: SystemTime::now(),
            last_activity: Instant::now(),
        }
    }

    /// Wall-clock time since the session was created. Zero if the clock
    /// went backwards.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed().unwrap_or_default()
    }

    fn is_expired(&self, idle_timeout: Option<Duration>, now: Instant) -> bool {
        match idle_timeout {
            Some(timeout) => now.duration_since(self.last_activity) > timeout,
            None => false,
        }
    }
}

/// Thread-safe token → session map.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    issuer: Box<dyn TokenIssuer>,
    /// Sessions idle longer than this are rejected and removed.
    /// `None` keeps sessions until logout or invalidation.
    idle_timeout: Option<Duration>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Creates an empty store issuing username tokens with no idle timeout.
    pub fn new() -> Self {
        Self::with_issuer(Box::new(UsernameTokens))
    }

    /// Creates an empty store using the given token issuer.
    pub fn with_issuer(issuer: Box<dyn TokenIssuer>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            issuer,
            idle_timeout: None,
        }
    }

    /// Sets the idle timeout. A zero duration disables it.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Returns the configured idle timeout.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Creates a session for `username` and returns its token.
    ///
    /// With [`UsernameTokens`] this replaces any earlier session for the
    /// same user.
    pub fn create_session(&self, username: &str) -> Result<String> {
        let token = self.issuer.issue(username);

        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on session store"))?;

        sessions.insert(
            token.clone(),
            Session::new(token.clone(), username.to_string()),
        );
        tracing::debug!(username = %username, "Created session");
        Ok(token)
    }

    /// Returns true if `token` names a live session and refreshes its
    /// last-activity time.
    ///
    /// An expired session is removed and reported as invalid.
    pub fn validate_and_touch(&self, token: &str) -> Result<bool> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on session store"))?;

        let now = Instant::now();
        let expired = match sessions.get_mut(token) {
            None => return Ok(false),
            Some(session) if session.is_expired(self.idle_timeout, now) => true,
            Some(session) => {
                session.last_activity = now;
                false
            }
        };

        if expired {
            if let Some(session) = sessions.remove(token) {
                tracing::info!(
                    username = %session.username,
                    age_secs = session.age().as_secs(),
                    "Session expired"
                );
            }
            return Ok(false);
        }
        Ok(true)
    }

    /// Returns the username bound to `token`, without touching it.
    pub fn username_for(&self, token: &str) -> Result<Option<String>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on session store"))?;

        Ok(sessions.get(token).map(|s| s.username.clone()))
    }

    /// Returns a copy of the session for `token`.
    pub fn get(&self, token: &str) -> Result<Option<Session>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on session store"))?;

        Ok(sessions.get(token).cloned())
    }

    /// Removes one session. Returns true if it existed.
    pub fn remove(&self, token: &str) -> Result<bool> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on session store"))?;

        match sessions.remove(token) {
            Some(session) => {
                tracing::debug!(username = %session.username, "Removed session");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drops every session.
    pub fn clear_all(&self) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on session store"))?;

        let count = sessions.len();
        sessions.clear();
        tracing::info!("Cleared {} sessions", count);
        Ok(())
    }

    /// Removes sessions past the idle timeout and returns their usernames.
    pub fn cleanup_expired(&self) -> Result<Vec<String>> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on session store"))?;

        let now = Instant::now();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.is_expired(self.idle_timeout, now))
            .map(|(token, _)| token.clone())
            .collect();

        let mut usernames = Vec::with_capacity(expired.len());
        for token in expired {
            if let Some(session) = sessions.remove(&token) {
                usernames.push(session.username);
            }
        }

        if !usernames.is_empty() {
            tracing::info!("Removed {} idle sessions", usernames.len());
        }
        Ok(usernames)
    }

    /// Returns the number of live sessions.
    pub fn len(&self) -> Result<usize> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on session store"))?;
        Ok(sessions.len())
    }

    /// Returns true if there are no sessions.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl SessionInvalidator for SessionStore {
    fn invalidate_all(&self) {
        if let Err(e) = self.clear_all() {
            tracing::error!("Failed to invalidate sessions: {:#}", e);
        }
    }
}
