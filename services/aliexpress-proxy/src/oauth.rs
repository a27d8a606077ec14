//! Authorization-code flow endpoints
//!
//! - GET /oauth/authorize: issue a fresh `state`, return the provider URL
//! - GET /oauth/callback: validate `state`, exchange `code`, store the pair
//!
//! Issued states live in memory for `STATE_EXPIRY`. A callback without a
//! `state` is accepted, since the provider console allows completing the flow
//! by hand; a supplied but unknown or expired one is rejected.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aliexpress_auth::{Credentials, OAuthClient, TokenStore, generate_state};
use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiFailure;
use crate::metrics;

/// Maximum age of an issued state before the callback rejects it.
const STATE_EXPIRY: Duration = Duration::from_secs(600);

/// Upper bound on outstanding states; the oldest is evicted beyond it.
const MAX_PENDING_STATES: usize = 1024;

/// Authorization flow shared by the OAuth routes and the 401 responses of
/// the proxy routes.
pub struct OAuthFlow {
    client: OAuthClient,
    credentials: Arc<Credentials>,
    store: Arc<TokenStore>,
    redirect_uri: String,
    scope: String,
    pending: Mutex<HashMap<String, Instant>>,
}

impl OAuthFlow {
    pub fn new(
        client: OAuthClient,
        credentials: Arc<Credentials>,
        store: Arc<TokenStore>,
        redirect_uri: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            client,
            credentials,
            store,
            redirect_uri: redirect_uri.into(),
            scope: scope.into(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Issue a new state and return the authorization URL carrying it.
    pub async fn authorization_url(&self) -> String {
        let state = generate_state();
        let url = self.client.build_authorization_url(
            &self.credentials,
            &self.redirect_uri,
            &state,
            &self.scope,
        );

        let mut pending = self.pending.lock().await;
        // Lazy cleanup while holding the lock
        pending.retain(|_, issued| issued.elapsed() < STATE_EXPIRY);
        if pending.len() >= MAX_PENDING_STATES
            && let Some(oldest) = pending
                .iter()
                .min_by_key(|(_, issued)| **issued)
                .map(|(state, _)| state.clone())
        {
            pending.remove(&oldest);
        }
        pending.insert(state, Instant::now());

        url
    }

    /// Consume a state issued by `authorization_url`.
    ///
    /// Returns false when it was never issued, was already used or expired.
    async fn take_state(&self, state: &str) -> bool {
        let issued = self.pending.lock().await.remove(state);
        matches!(issued, Some(at) if at.elapsed() < STATE_EXPIRY)
    }

    /// Validate the callback, exchange the code and store the new pair.
    pub async fn complete(&self, code: &str, state: Option<&str>) -> Result<(), ApiFailure> {
        if let Some(state) = state
            && !self.take_state(state).await
        {
            metrics::record_oauth_step("callback", "invalid_state");
            return Err(ApiFailure::Validation(
                "unknown or expired state, restart the authorization flow".into(),
            ));
        }

        let pair = match self
            .client
            .exchange_code(&self.credentials, &self.redirect_uri, code)
            .await
        {
            Ok(pair) => pair,
            Err(e) => {
                metrics::record_oauth_step("callback", "exchange_failed");
                return Err(ApiFailure::Exchange(e));
            }
        };

        self.store.set(pair).await;
        metrics::record_oauth_step("callback", "success");
        info!("authorization complete, token pair stored");
        Ok(())
    }
}

/// GET /oauth/authorize
pub async fn authorize(State(state): State<AppState>) -> Json<Value> {
    if !state.credentials.app_key_configured() {
        warn!("authorization URL requested without an app key configured");
    }
    let auth_url = state.oauth.authorization_url().await;
    metrics::record_oauth_step("authorize", "issued");
    info!("authorization flow started");

    Json(json!({
        "success": true,
        "auth_url": auth_url,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
}

/// GET /oauth/callback
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<Value>, ApiFailure> {
    let code = query
        .code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            metrics::record_oauth_step("callback", "missing_code");
            ApiFailure::Validation("authorization code missing".into())
        })?;
    let supplied_state = query.state.as_deref().filter(|s| !s.is_empty());

    state.oauth.complete(code, supplied_state).await?;

    Ok(Json(json!({
        "success": true,
        "message": "authorization complete, access token stored",
    })))
}
