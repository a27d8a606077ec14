//! OAuth authorization-code exchange and refresh
//!
//! Handles the provider's token endpoint interactions:
//! 1. Authorization code exchange (completes the browser flow)
//! 2. Refresh-token renewal (after the RPC endpoint reports expiry)
//!
//! Both POST a form to `Endpoints::token` with different grant types. No
//! retries happen here; the retry policy belongs to the caller.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use serde::{Deserialize, Deserializer};
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::constants::Endpoints;
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::store::{TokenPair, unix_millis};

/// Token endpoint response for both exchange and refresh.
///
/// The provider sends more fields (`user_id`, `account`, `sp`...) which are
/// ignored. `expires_in` is a delta in seconds and arrives either as a number
/// or as a numeric string.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default, deserialize_with = "lenient_secs")]
    pub expires_in: Option<u64>,
}

impl TokenResponse {
    /// Convert into a stored pair, anchoring `expires_in` at `now_millis`.
    pub fn into_pair(self, now_millis: u64) -> TokenPair {
        let expires_at = self
            .expires_in
            .map(|secs| now_millis.saturating_add(secs.saturating_mul(1000)));
        let refresh = self.refresh_token.filter(|t| !t.trim().is_empty());
        TokenPair::new(self.access_token, refresh, expires_at)
    }
}

fn lenient_secs<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Generate an opaque `state` value for the authorization request.
///
/// 32 random bytes encoded as URL-safe base64 without padding.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Client for the provider's authorization and token endpoints.
///
/// The `reqwest::Client` is expected to carry a bounded timeout.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    endpoints: Endpoints,
}

impl OAuthClient {
    pub fn new(http: reqwest::Client, endpoints: Endpoints) -> Self {
        Self { http, endpoints }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Build the browser-facing authorization URL.
    ///
    /// Carries `response_type=code`, `client_id`, `redirect_uri`, `state` and
    /// `scope`; an empty scope is left out.
    pub fn build_authorization_url(
        &self,
        credentials: &Credentials,
        redirect_uri: &str,
        state: &str,
        scope: &str,
    ) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", credentials.app_key())
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", state);
        if !scope.trim().is_empty() {
            query.append_pair("scope", scope);
        }
        format!("{}?{}", self.endpoints.authorize, query.finish())
    }

    /// Exchange an authorization code for a token pair.
    pub async fn exchange_code(
        &self,
        credentials: &Credentials,
        redirect_uri: &str,
        code: &str,
    ) -> Result<TokenPair> {
        let pair = self
            .request_token(
                "authorization_code",
                &[
                    ("grant_type", "authorization_code"),
                    ("client_id", credentials.app_key()),
                    ("client_secret", credentials.app_secret()),
                    ("code", code),
                    ("redirect_uri", redirect_uri),
                ],
            )
            .await?;
        info!(
            has_refresh_token = pair.refresh_token().is_some(),
            "authorization code exchanged"
        );
        Ok(pair)
    }

    /// Renew the access token with a refresh token.
    ///
    /// A blank refresh token fails with `MissingRefreshToken` before any
    /// network call.
    pub async fn refresh(&self, credentials: &Credentials, refresh_token: &str) -> Result<TokenPair> {
        if refresh_token.trim().is_empty() {
            return Err(Error::MissingRefreshToken);
        }

        let pair = self
            .request_token(
                "refresh_token",
                &[
                    ("grant_type", "refresh_token"),
                    ("client_id", credentials.app_key()),
                    ("client_secret", credentials.app_secret()),
                    ("refresh_token", refresh_token),
                ],
            )
            .await?;
        info!(
            rotated_refresh_token = pair.refresh_token().is_some(),
            "access token refreshed"
        );
        Ok(pair)
    }

    async fn request_token(&self, grant: &str, form: &[(&str, &str)]) -> Result<TokenPair> {
        debug!(grant, endpoint = %self.endpoints.token, "calling token endpoint");

        let response = self
            .http
            .post(&self.endpoints.token)
            .form(form)
            .send()
            .await
            .map_err(|e| {
                warn!(grant, error = %e, "token endpoint request failed");
                Error::Transport(format!("{grant} request failed: {e}"))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if !status.is_success() {
            warn!(grant, status = status.as_u16(), "token endpoint rejected request");
            return Err(Error::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = match serde_json::from_str(&body) {
            Ok(t) => t,
            Err(e) => {
                return Err(Error::InvalidResponse {
                    reason: e.to_string(),
                    body,
                });
            }
        };
        if token.access_token.trim().is_empty() {
            return Err(Error::InvalidResponse {
                reason: "empty access_token".into(),
                body,
            });
        }

        Ok(token.into_pair(unix_millis()))
    }
}
