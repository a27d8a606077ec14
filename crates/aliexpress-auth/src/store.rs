//! In-memory OAuth token store
//!
//! Holds the single access/refresh token pair for the process. Reads and
//! writes go through a tokio `RwLock` so each `get`/`set` is atomic. A
//! separate `Mutex<()>` serializes refreshes: the caller that detects an
//! expired token takes the guard, re-reads the pair, and only calls the
//! provider if nobody rotated the token while it waited.
//!
//! Nothing is persisted; a restart means re-running the authorization flow.

use std::time::{SystemTime, UNIX_EPOCH};

use common::Secret;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::debug;

/// Current unix time in milliseconds.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Access/refresh token state held by the proxy.
///
/// `expires_at` is an absolute unix timestamp in milliseconds, computed from
/// the provider's `expires_in` delta when it sends one.
#[derive(Debug, Clone, Default)]
pub struct TokenPair {
    access_token: Option<Secret<String>>,
    refresh_token: Option<Secret<String>>,
    expires_at: Option<u64>,
}

impl TokenPair {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: Option<u64>,
    ) -> Self {
        Self {
            access_token: Some(Secret::new(access_token.into())),
            refresh_token: refresh_token.map(Secret::new),
            expires_at,
        }
    }

    /// Access token, if one is set and non-blank.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token
            .as_ref()
            .filter(|s| !s.is_blank())
            .map(|s| s.expose().as_str())
    }

    /// Refresh token, if one is set and non-blank.
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token
            .as_ref()
            .filter(|s| !s.is_blank())
            .map(|s| s.expose().as_str())
    }

    pub fn expires_at(&self) -> Option<u64> {
        self.expires_at
    }

    /// Whether the access token expires within `margin_millis` of `now_millis`.
    /// Pairs without a known expiry never report as expiring.
    pub fn expires_within(&self, now_millis: u64, margin_millis: u64) -> bool {
        match self.expires_at {
            Some(expires) => expires <= now_millis.saturating_add(margin_millis),
            None => false,
        }
    }

    /// Keep `previous`'s refresh token when the provider did not rotate it.
    pub fn inherit_refresh_token(mut self, previous: &TokenPair) -> Self {
        if self.refresh_token().is_none() {
            self.refresh_token = previous.refresh_token.clone();
        }
        self
    }
}

/// Process-wide token holder, shared as `Arc<TokenStore>`.
#[derive(Debug, Default)]
pub struct TokenStore {
    state: RwLock<TokenPair>,
    refresh_lock: Mutex<()>,
}

impl TokenStore {
    /// Empty store; `has_access_token()` is false until the first exchange.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current pair.
    pub async fn get(&self) -> TokenPair {
        self.state.read().await.clone()
    }

    /// Replace the current pair.
    pub async fn set(&self, pair: TokenPair) {
        let mut state = self.state.write().await;
        debug!(
            has_refresh_token = pair.refresh_token().is_some(),
            expires_at = pair.expires_at(),
            "token pair updated"
        );
        *state = pair;
    }

    pub async fn has_access_token(&self) -> bool {
        self.state.read().await.access_token().is_some()
    }

    /// Acquire the refresh guard. Hold it across the read-refresh-write
    /// sequence so only one refresh is in flight per process.
    pub async fn refresh_guard(&self) -> MutexGuard<'_, ()> {
        self.refresh_lock.lock().await
    }
}
