//! OAuth mode: bearer access token with refresh-and-retry-once.
//!
//! Per call:
//! - no stored access token: fail fast with `Unauthenticated`, no network
//! - token near expiry: refresh first (this uses up the single refresh); if
//!   that fails while the token is still valid, send it anyway
//! - provider answers 401: refresh once, store the new pair, retry once
//! - refresh fails or the retried call fails in any way: `Unauthenticated`
//!
//! Refreshes are single-flight through `TokenStore::refresh_guard()`. A caller
//! that waited on the guard re-reads the store and reuses the token another
//! caller already rotated instead of refreshing again.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use aliexpress_auth::{
    API_VERSION, Credentials, Endpoints, OAuthClient, RESPONSE_FORMAT, TokenStore, unix_millis,
};
use tracing::{debug, info, instrument, warn};

use crate::{
    ApiError, AuthMode, Params, ProviderResponse, Result, SignedApiClient, decode, post_form,
    record_call, unix_timestamp,
};

/// Refresh ahead of the provider when the token expires within this window.
const EXPIRY_MARGIN_MILLIS: u64 = 60_000;

/// Outcome of a single send.
enum Attempt {
    Done(ProviderResponse),
    Expired,
}

/// Client for deployments authorized through the OAuth code flow.
pub struct OAuthModeClient {
    http: reqwest::Client,
    sync_url: String,
    credentials: Arc<Credentials>,
    store: Arc<TokenStore>,
    oauth: OAuthClient,
}

impl OAuthModeClient {
    pub fn new(
        http: reqwest::Client,
        endpoints: &Endpoints,
        credentials: Arc<Credentials>,
        store: Arc<TokenStore>,
    ) -> Self {
        let oauth = OAuthClient::new(http.clone(), endpoints.clone());
        Self {
            http,
            sync_url: endpoints.sync.clone(),
            credentials,
            store,
            oauth,
        }
    }

    /// Parameter set for `method` authorized by `access_token`.
    ///
    /// Protocol fields and the token are written over caller parameters. A
    /// caller `tracking_id` takes precedence over the configured one.
    pub fn bearer_params(
        &self,
        method: &str,
        params: &Params,
        access_token: &str,
        timestamp: &str,
    ) -> Params {
        let mut all = params.clone();
        all.remove("sign");
        all.remove("sign_method");
        all.remove("app_key");
        all.insert("method".into(), method.to_string());
        all.insert("format".into(), RESPONSE_FORMAT.into());
        all.insert("v".into(), API_VERSION.into());
        all.insert("timestamp".into(), timestamp.to_string());
        if self.credentials.tracking_id_configured() {
            all.entry("tracking_id".into())
                .or_insert_with(|| self.credentials.tracking_id().to_string());
        }
        all.insert("access_token".into(), access_token.to_string());
        all
    }

    #[instrument(skip_all, fields(method = %method))]
    async fn call_inner(&self, method: &str, params: Params) -> Result<ProviderResponse> {
        let pair = self.store.get().await;
        let Some(mut access) = pair.access_token().map(str::to_owned) else {
            debug!("no access token stored, authorization required");
            return Err(ApiError::Unauthenticated);
        };

        let mut refreshed = false;
        if pair.expires_within(unix_millis(), EXPIRY_MARGIN_MILLIS) {
            info!("access token at or near expiry, refreshing before call");
            match self.refresh_after_expiry(&access).await {
                Ok(fresh) => access = fresh,
                // Still valid: send it and let the provider decide
                Err(e) if !pair.expires_within(unix_millis(), 0) => {
                    warn!(error = %e, "refresh ahead of expiry failed, sending current token");
                }
                Err(e) => return Err(e),
            }
            refreshed = true;
        }

        match self.attempt(method, &params, &access).await? {
            Attempt::Done(response) => return Ok(response),
            Attempt::Expired if refreshed => {
                warn!("provider rejected a freshly refreshed token");
                return Err(ApiError::Unauthenticated);
            }
            Attempt::Expired => {
                info!("provider reported token expiry, refreshing");
            }
        }

        let access = self.refresh_after_expiry(&access).await?;
        match self.attempt(method, &params, &access).await {
            Ok(Attempt::Done(response)) => Ok(response),
            Ok(Attempt::Expired) => {
                warn!("retry after refresh rejected, authorization required");
                Err(ApiError::Unauthenticated)
            }
            Err(e) => {
                warn!(error = %e, "retry after refresh failed, authorization required");
                Err(ApiError::Unauthenticated)
            }
        }
    }

    /// One POST to the sync endpoint with `access_token`.
    async fn attempt(&self, method: &str, params: &Params, access_token: &str) -> Result<Attempt> {
        let form = self.bearer_params(method, params, access_token, &unix_timestamp());
        let raw = post_form(&self.http, &self.sync_url, &form).await?;
        match raw.status {
            200 => decode(&raw.body).map(Attempt::Done),
            401 => Ok(Attempt::Expired),
            status => Err(ApiError::ProviderStatus {
                status,
                body: raw.body,
            }),
        }
    }

    /// Refresh the pair whose access token `stale` was rejected.
    ///
    /// Returns the access token to retry with.
    async fn refresh_after_expiry(&self, stale: &str) -> Result<String> {
        let _guard = self.store.refresh_guard().await;

        let current = self.store.get().await;
        if let Some(latest) = current.access_token()
            && latest != stale
        {
            debug!("token already rotated by a concurrent refresh");
            return Ok(latest.to_owned());
        }

        let refresh_token = current.refresh_token().unwrap_or_default();
        match self.oauth.refresh(&self.credentials, refresh_token).await {
            Ok(pair) => {
                let pair = pair.inherit_refresh_token(&current);
                let access = pair
                    .access_token()
                    .map(str::to_owned)
                    .ok_or(ApiError::Unauthenticated)?;
                self.store.set(pair).await;
                metrics::counter!("provider_token_refresh_total", "outcome" => "success")
                    .increment(1);
                Ok(access)
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed, manual re-authorization required");
                metrics::counter!("provider_token_refresh_total", "outcome" => "failure")
                    .increment(1);
                Err(ApiError::Unauthenticated)
            }
        }
    }
}

impl SignedApiClient for OAuthModeClient {
    fn mode(&self) -> AuthMode {
        AuthMode::OAuth
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
