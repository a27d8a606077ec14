//! Route-level failures and their JSON envelope
//!
//! Every failure renders as `{"success": false, "error": <message>, ...}` with
//! variant-specific extras, so no handler error escapes unformatted.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use provider::ApiError;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ApiFailure {
    /// Bad or missing request input, rejected before any provider call
    #[error("{0}")]
    Validation(String),

    #[error("not authenticated with AliExpress, authorization required")]
    Unauthenticated { auth_url: String },

    #[error("{0}")]
    Provider(ApiError),

    /// The provider answered 200 but without the expected `result`
    #[error("{message}")]
    UnexpectedPayload { message: String, response: Value },

    #[error("token exchange failed: {0}")]
    Exchange(#[from] aliexpress_auth::Error),
}

impl ApiFailure {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiFailure::Validation(_) => StatusCode::BAD_REQUEST,
            ApiFailure::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            ApiFailure::Provider(_)
            | ApiFailure::UnexpectedPayload { .. }
            | ApiFailure::Exchange(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, status = status.as_u16(), "request failed");
        }

        let mut body = json!({
            "success": false,
            "error": self.to_string(),
        });
        match self {
            ApiFailure::Unauthenticated { auth_url } => {
                body["auth_url"] = Value::String(auth_url);
            }
            ApiFailure::Provider(ApiError::ProviderStatus {
                status: provider_status,
                body: provider_body,
            }) => {
                body["provider_status"] = json!(provider_status);
                body["provider_body"] = Value::String(provider_body);
            }
            ApiFailure::UnexpectedPayload { response, .. } => {
                body["response"] = response;
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}
