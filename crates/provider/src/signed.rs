//! Signed mode: shared-secret signature on every call.
//!
//! No user token is involved. Each call carries the app key, a fresh
//! timestamp and a `sign` computed over every other parameter.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use aliexpress_auth::{API_VERSION, Credentials, Endpoints, RESPONSE_FORMAT, SignMethod};
use tracing::{debug, instrument};

use crate::{
    ApiError, AuthMode, Params, ProviderResponse, Result, SignedApiClient, decode, post_form,
    record_call, unix_timestamp,
};

/// Client for deployments configured with an app secret.
pub struct SignedModeClient {
    http: reqwest::Client,
    sync_url: String,
    credentials: Arc<Credentials>,
    sign_method: SignMethod,
}

impl SignedModeClient {
    pub fn new(
        http: reqwest::Client,
        endpoints: &Endpoints,
        credentials: Arc<Credentials>,
        sign_method: SignMethod,
    ) -> Self {
        Self {
            http,
            sync_url: endpoints.sync.clone(),
            credentials,
            sign_method,
        }
    }

    /// Assemble the full parameter set for `method`, including `sign`.
    ///
    /// Protocol fields are written over caller parameters, so a caller can
    /// neither pick another RPC nor advertise a different sign method. `sign`
    /// is always recomputed so exactly one signature is sent. A caller
    /// `tracking_id` takes precedence over the configured one.
    pub fn signed_params(&self, method: &str, params: Params, timestamp: &str) -> Params {
        let mut all = params;
        all.remove("sign");
        all.remove("access_token");
        all.insert("app_key".into(), self.credentials.app_key().to_string());
        all.insert("method".into(), method.to_string());
        all.insert("timestamp".into(), timestamp.to_string());
        all.insert("format".into(), RESPONSE_FORMAT.into());
        all.insert("v".into(), API_VERSION.into());
        all.insert("sign_method".into(), self.sign_method.as_str().into());
        if self.credentials.tracking_id_configured() {
            all.entry("tracking_id".into())
                .or_insert_with(|| self.credentials.tracking_id().to_string());
        }

        let sign = aliexpress_auth::sign_with(
            self.sign_method,
            all.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            self.credentials.app_secret(),
        );
        all.insert("sign".into(), sign);
        all
    }

    #[instrument(skip_all, fields(method = %method))]
    async fn call_inner(&self, method: &str, params: Params) -> Result<ProviderResponse> {
        let form = self.signed_params(method, params, &unix_timestamp());
        debug!(params = form.len(), "sending signed call");

        let raw = post_form(&self.http, &self.sync_url, &form).await?;
        if raw.status != 200 {
            return Err(ApiError::ProviderStatus {
                status: raw.status,
                body: raw.body,
            });
        }
        decode(&raw.body)
    }
}

impl SignedApiClient for SignedModeClient {
    fn mode(&self) -> AuthMode {
        AuthMode::Signed
    }

    fn call<'a>(
        &'a self,
        method: &'a str,
        params: Params,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderResponse>> + Send + 'a>> {
        Box::pin(async move {
            let result = self.call_inner(method, params).await;
            record_call(method, &result);
            result
        })
    }
}
