//! Authenticated access to the AliExpress RPC endpoint
//!
//! Defines the `SignedApiClient` trait that decouples route handlers from the
//! authentication mode. `SignedModeClient` signs every call with the app
//! secret; `OAuthModeClient` attaches the stored bearer token and owns the
//! refresh-and-retry-once policy. One of them is selected at startup and
//! shared as `Arc<dyn SignedApiClient>`.

pub mod oauth;
pub mod signed;

#[cfg(test)]
mod mock;

pub use oauth::OAuthModeClient;
pub use signed::SignedModeClient;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// RPC parameters, ordered by key.
pub type Params = BTreeMap<String, String>;

/// Protocol fields the clients own. Caller parameters with these keys are
/// overwritten before sending.
pub const RESERVED_PARAMS: &[&str] = &[
    "access_token",
    "app_key",
    "format",
    "method",
    "sign",
    "sign_method",
    "timestamp",
    "v",
];

/// Whether `key` is a protocol field owned by the clients.
pub fn is_reserved(key: &str) -> bool {
    RESERVED_PARAMS.contains(&key)
}

/// Which credential the deployment authenticates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Shared app secret, per-request signature
    #[default]
    Signed,
    /// Authorization-code bearer token with refresh
    #[serde(alias = "oauth2")]
    OAuth,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Signed => "signed",
            AuthMode::OAuth => "oauth",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "signed" | "secret" => Ok(AuthMode::Signed),
            "oauth" | "oauth2" => Ok(AuthMode::OAuth),
            other => Err(format!("unknown auth mode '{other}'")),
        }
    }
}

/// Errors from provider RPC calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    #[error("provider returned {status}: {body}")]
    ProviderStatus { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("not authenticated with the provider, authorization required")]
    Unauthenticated,
}

impl ApiError {
    /// Label for logs and the `provider_calls_total` metric.
    pub fn label(&self) -> &'static str {
        match self {
            ApiError::Unreachable(_) => "unreachable",
            ApiError::ProviderStatus { .. } => "provider_status",
            ApiError::MalformedResponse(_) => "malformed",
            ApiError::Unauthenticated => "unauthenticated",
        }
    }
}

/// Result alias for provider calls.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Decoded JSON body returned by the RPC endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse(serde_json::Value);

impl ProviderResponse {
    pub fn new(body: serde_json::Value) -> Self {
        Self(body)
    }

    pub fn body(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_body(self) -> serde_json::Value {
        self.0
    }

    /// Locate the `result` payload for `method`.
    ///
    /// Accepts a top-level `result` as well as the provider's usual envelope,
    /// `{"<method with '.' as '_'>_response": {"result": ...}}`, including the
    /// `resp_result.result` nesting some RPCs use.
    pub fn result(&self, method: &str) -> Option<&serde_json::Value> {
        if let Some(result) = self.0.get("result") {
            return Some(result);
        }
        let envelope = self.0.get(format!("{}_response", method.replace('.', "_")))?;
        envelope.get("result").or_else(|| {
            envelope
                .get("resp_result")
                .and_then(|resp| resp.get("result"))
        })
    }

    /// Provider-reported error message carried in a 200 response, if any.
    pub fn error_message(&self) -> Option<String> {
        let error = self.0.get("error_response")?;
        let msg = error
            .get("sub_msg")
            .or_else(|| error.get("msg"))
            .and_then(|m| m.as_str())
            .unwrap_or("unknown provider error");
        let code = error.get("code").map(|c| match c {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        Some(match code {
            Some(code) => format!("{code}: {msg}"),
            None => msg.to_string(),
        })
    }
}

/// Abstraction over the two authentication modes.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn SignedApiClient>`).
pub trait SignedApiClient: Send + Sync {
    /// Mode this client authenticates with.
    fn mode(&self) -> AuthMode;

    /// Invoke provider RPC `method` with caller `params`.
    fn call<'a>(
        &'a self,
        method: &'a str,
        params: Params,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderResponse>> + Send + 'a>>;
}

/// Raw outcome of one form POST.
pub(crate) struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// POST `params` as a form to `url`.
pub(crate) async fn post_form(
    http: &reqwest::Client,
    url: &str,
    params: &Params,
) -> Result<RawResponse> {
    let response = http
        .post(url)
        .form(params)
        .send()
        .await
        .map_err(|e| ApiError::Unreachable(e.to_string()))?;
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| ApiError::Unreachable(format!("reading response body: {e}")))?;
    Ok(RawResponse { status, body })
}

/// Parse a 200 body into a `ProviderResponse`.
pub(crate) fn decode(body: &str) -> Result<ProviderResponse> {
    serde_json::from_str(body)
        .map(ProviderResponse::new)
        .map_err(|e| ApiError::MalformedResponse(format!("{e}: {}", truncate(body, 200))))
}

/// Unix seconds as the provider's `timestamp` parameter.
pub(crate) fn unix_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .to_string()
}

/// Count a finished call by RPC method and outcome.
pub(crate) fn record_call(method: &str, result: &Result<ProviderResponse>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(e) => {
            warn!(method, error = %e, "provider call failed");
            e.label()
        }
    };
    metrics::counter!(
        "provider_calls_total",
        "method" => method.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
