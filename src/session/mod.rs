//! Browser session state and the session store contract
//!
//! The session store is the single source of truth for per-browser state.
//! Every request starts with a store lookup keyed by the cookie-carried
//! session ID; nothing is held in process memory tied to a connection.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

/// Per-browser session state.
///
/// `state` and `original_url` exist only between the redirect to the
/// provider and the handled callback; a session in a steady state has both
/// unset. An access token is always paired with an expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque identifier carried in the session cookie
    pub id: String,

    /// Current access token, present only after login or refresh
    #[serde(default)]
    pub access_token: Option<String>,

    /// Refresh token; outlives its paired access token until rotated
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Access token expiry; absent means "never validated", not "expired"
    #[serde(default)]
    pub access_token_expiry: Option<DateTime<Utc>>,

    /// Single-use anti-forgery value for an in-flight login flow
    #[serde(default)]
    pub state: Option<String>,

    /// URL the caller was trying to reach when redirected to login;
    /// consumed on successful callback
    #[serde(default)]
    pub original_url: Option<String>,

    /// Creation time; drives server-side TTL eviction
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Create an empty anonymous session with a fresh ID
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            access_token: None,
            refresh_token: None,
            access_token_expiry: None,
            state: None,
            original_url: None,
            created_at: Utc::now(),
        }
    }

    /// Drop all tokens, keeping the session ID
    pub fn clear_tokens(&mut self) {
        self.access_token = None;
        self.refresh_token = None;
        self.access_token_expiry = None;
    }

    /// Drop in-flight login-flow state
    pub fn clear_flow(&mut self) {
        self.state = None;
        self.original_url = None;
    }

    /// Install a token set produced by a code exchange or refresh.
    ///
    /// A refresh response without a rotated refresh token keeps the
    /// existing one.
    pub fn apply_tokens(&mut self, tokens: crate::oidc::TokenSet) {
        self.access_token = Some(tokens.access_token);
        if tokens.refresh_token.is_some() {
            self.refresh_token = tokens.refresh_token;
        }
        // Invariant: access token always carries an expiry. A provider that
        // omits expires_in gets a token we re-validate on the next request.
        self.access_token_expiry = Some(tokens.expires_at.unwrap_or_else(Utc::now));
    }

    /// Whether a login flow is in flight for this session
    #[must_use]
    pub fn awaiting_callback(&self) -> bool {
        self.state.is_some()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// A session together with the store version that produced it
#[derive(Debug, Clone)]
pub struct VersionedSession {
    /// The session value
    pub session: Session,
    /// Store version for compare-and-swap writes
    pub version: u64,
}

/// Session persistence contract.
///
/// `put` is a compare-and-swap keyed by version so that two concurrent
/// requests for the same session never clobber each other's writes: the
/// loser gets [`crate::Error::SessionConflict`] and re-reads.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session by ID
    async fn get(&self, id: &str) -> Result<Option<VersionedSession>>;

    /// Write a session, enforcing version agreement.
    ///
    /// `expected_version` of `None` means create-only (the key must not
    /// exist). Returns the new version on success.
    async fn put(&self, session: Session, expected_version: Option<u64>) -> Result<u64>;

    /// Delete a session; deleting an unknown ID is not an error
    async fn delete(&self, id: &str) -> Result<()>;

    /// Remove sessions past their server-side TTL, returning the removed
    /// IDs so callers can release per-session resources.
    ///
    /// Stores whose backend expires entries natively keep the no-op
    /// default.
    async fn purge_expired(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}
