//! AliExpress open platform endpoints

/// Production gateway for the Singapore region
pub const DEFAULT_BASE_URL: &str = "https://api-sg.aliexpress.com";

/// Browser-facing authorization page, relative to the base URL
pub const AUTHORIZE_PATH: &str = "/oauth/authorize";

/// Code exchange and refresh endpoint, relative to the base URL
pub const TOKEN_PATH: &str = "/oauth/token";

/// Business RPC endpoint; the RPC is selected by the `method` form field
pub const SYNC_PATH: &str = "/sync";

/// Protocol version sent with every RPC call
pub const API_VERSION: &str = "2.0";

/// Response format requested from the provider
pub const RESPONSE_FORMAT: &str = "json";

/// Fully-qualified provider endpoints derived from a single base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub authorize: String,
    pub token: String,
    pub sync: String,
}

impl Endpoints {
    pub fn from_base(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            authorize: format!("{base}{AUTHORIZE_PATH}"),
            token: format!("{base}{TOKEN_PATH}"),
            sync: format!("{base}{SYNC_PATH}"),
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::from_base(DEFAULT_BASE_URL)
    }
}
