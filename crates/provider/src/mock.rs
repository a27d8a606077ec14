//! Mock AliExpress gateway for client tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aliexpress_auth::{Credentials, Endpoints};
use axum::Form;
use axum::extract::State;
use axum::http::StatusCode;
use common::Secret;
use tokio::net::TcpListener;

pub type FormFields = HashMap<String, String>;
type Responder = Arc<dyn Fn(&FormFields) -> (StatusCode, String) + Send + Sync>;
type Seen = Arc<Mutex<Vec<FormFields>>>;

#[derive(Clone)]
struct MockState {
    sync: Responder,
    token: Responder,
    sync_forms: Seen,
    token_forms: Seen,
}

/// Running mock gateway; records every form posted to `/sync` and
/// `/oauth/token`.
pub struct MockProvider {
    pub endpoints: Endpoints,
    sync_forms: Seen,
    token_forms: Seen,
}

impl MockProvider {
    pub async fn start<S, T>(sync: S, token: T) -> Self
    where
        S: Fn(&FormFields) -> (StatusCode, String) + Send + Sync + 'static,
        T: Fn(&FormFields) -> (StatusCode, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let state = MockState {
            sync: Arc::new(sync),
            token: Arc::new(token),
            sync_forms: Arc::new(Mutex::new(Vec::new())),
            token_forms: Arc::new(Mutex::new(Vec::new())),
        };
        let sync_forms = state.sync_forms.clone();
        let token_forms = state.token_forms.clone();

        let app = axum::Router::new()
            .route("/sync", axum::routing::post(sync_handler))
            .route("/oauth/token", axum::routing::post(token_handler))
            .with_state(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            endpoints: Endpoints::from_base(&base),
            sync_forms,
            token_forms,
        }
    }

    pub fn sync_calls(&self) -> Vec<FormFields> {
        self.sync_forms.lock().unwrap().clone()
    }

    pub fn token_calls(&self) -> Vec<FormFields> {
        self.token_forms.lock().unwrap().clone()
    }
}

async fn sync_handler(
    State(state): State<MockState>,
    Form(form): Form<FormFields>,
) -> (StatusCode, String) {
    let response = (state.sync)(&form);
    state.sync_forms.lock().unwrap().push(form);
    response
}

async fn token_handler(
    State(state): State<MockState>,
    Form(form): Form<FormFields>,
) -> (StatusCode, String) {
    // Slow enough that concurrent callers overlap on the refresh
    tokio::time::sleep(Duration::from_millis(50)).await;
    let response = (state.token)(&form);
    state.token_forms.lock().unwrap().push(form);
    response
}

pub fn ok(body: &str) -> (StatusCode, String) {
    (StatusCode::OK, body.to_string())
}

pub fn status(code: StatusCode) -> (StatusCode, String) {
    (code, format!(r#"{{"error":"{}"}}"#, code.as_u16()))
}

pub fn test_credentials() -> Arc<Credentials> {
    Arc::new(Credentials::new(
        "517616",
        Secret::from("app-secret"),
        "tracking-1",
    ))
}

pub fn test_http() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}
