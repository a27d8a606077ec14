//! AliExpress credential lifecycle and request signing
//!
//! Provides the shared-secret request signer, the in-memory token store, and
//! the OAuth client that talks to the provider's token endpoint. The crate has
//! no dependency on the proxy binary and can be tested on its own.
//!
//! Credential flow (OAuth mode):
//! 1. Route layer calls `oauth::generate_state()` and
//!    `OAuthClient::build_authorization_url()`
//! 2. User authorizes in the browser, provider redirects with `code`
//! 3. `OAuthClient::exchange_code()` turns the code into a `TokenPair`
//! 4. The pair is stored via `TokenStore::set()`
//! 5. On a provider 401, `OAuthClient::refresh()` renews the pair under
//!    `TokenStore::refresh_guard()`
//!
//! Signed mode skips all of the above and signs every call with
//! `sign::sign_with()`.

pub mod constants;
pub mod credentials;
pub mod error;
pub mod oauth;
pub mod sign;
pub mod store;

pub use constants::*;
pub use credentials::Credentials;
pub use error::{Error, Result};
pub use oauth::{OAuthClient, TokenResponse, generate_state};
pub use sign::{SignMethod, sign, sign_with};
pub use store::{TokenPair, TokenStore, unix_millis};
