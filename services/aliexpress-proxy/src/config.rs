//! Configuration types and loading
//!
//! Precedence: env vars > config file > defaults. The app secret is read from
//! ALIEXPRESS_APP_SECRET or `app_secret_file`, never from the TOML itself.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use aliexpress_auth::{Credentials, DEFAULT_BASE_URL, SignMethod};
use common::Secret;
use provider::AuthMode;
use serde::Deserialize;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_PATH: &str = "aliexpress-proxy.toml";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
}

/// Inbound HTTP settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            max_connections: 1000,
        }
    }
}

/// AliExpress open platform settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub auth_mode: AuthMode,
    pub sign_method: SignMethod,
    pub app_key: String,
    #[serde(skip)]
    pub app_secret: Option<Secret<String>>,
    /// Path to a file holding the app secret (alternative to ALIEXPRESS_APP_SECRET)
    pub app_secret_file: Option<PathBuf>,
    pub tracking_id: String,
    pub redirect_uri: String,
    pub scope: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 10,
            auth_mode: AuthMode::default(),
            sign_method: SignMethod::default(),
            app_key: String::new(),
            app_secret: None,
            app_secret_file: None,
            tracking_id: String::new(),
            redirect_uri: "http://localhost:5000/oauth/callback".to_string(),
            scope: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then overlay
    /// environment variables and validate.
    ///
    /// `None` means no file: defaults plus environment.
    pub fn load(path: Option<&Path>) -> common::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)?;
                toml::from_str(&contents)?
            }
            None => Config::default(),
        };

        config.apply_env()?;
        config.resolve_app_secret()?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file from the CLI arg or CONFIG_PATH env var.
    ///
    /// An explicitly named file is always returned, so a missing one fails in
    /// `load`. The default file is only returned when it exists.
    pub fn resolve_path(cli_path: Option<&str>) -> Option<PathBuf> {
        if let Some(p) = cli_path {
            return Some(PathBuf::from(p));
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return Some(PathBuf::from(p));
        }
        let default = PathBuf::from(DEFAULT_CONFIG_PATH);
        default.exists().then_some(default)
    }

    /// Credentials shared by the signer, the OAuth client and health checks.
    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.provider.app_key.clone(),
            self.provider.app_secret.clone().unwrap_or_default(),
            self.provider.tracking_id.clone(),
        )
    }

    fn apply_env(&mut self) -> common::Result<()> {
        if let Ok(key) = std::env::var("ALIEXPRESS_APP_KEY") {
            self.provider.app_key = key.trim().to_owned();
        }
        if let Ok(id) = std::env::var("ALIEXPRESS_TRACKING_ID") {
            self.provider.tracking_id = id.trim().to_owned();
        }
        if let Ok(uri) = std::env::var("ALIEXPRESS_REDIRECT_URI") {
            self.provider.redirect_uri = uri.trim().to_owned();
        }
        if let Ok(mode) = std::env::var("ALIEXPRESS_AUTH_MODE") {
            self.provider.auth_mode = AuthMode::from_str(&mode).map_err(|reason| {
                common::Error::Env {
                    var: "ALIEXPRESS_AUTH_MODE".into(),
                    reason,
                }
            })?;
        }
        if let Ok(method) = std::env::var("ALIEXPRESS_SIGN_METHOD") {
            self.provider.sign_method = SignMethod::from_str(&method).map_err(|reason| {
                common::Error::Env {
                    var: "ALIEXPRESS_SIGN_METHOD".into(),
                    reason,
                }
            })?;
        }
        if let Ok(port) = std::env::var("PORT") {
            let port = port.trim().parse::<u16>().map_err(|e| common::Error::Env {
                var: "PORT".into(),
                reason: e.to_string(),
            })?;
            self.server.listen_addr.set_port(port);
        }
        Ok(())
    }

    /// Env var takes precedence over `app_secret_file`.
    fn resolve_app_secret(&mut self) -> common::Result<()> {
        if let Ok(secret) = std::env::var("ALIEXPRESS_APP_SECRET") {
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                self.provider.app_secret = Some(Secret::new(secret));
                return Ok(());
            }
        }
        if let Some(ref secret_file) = self.provider.app_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read app_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                self.provider.app_secret = Some(Secret::new(secret));
            }
        }
        Ok(())
    }

    fn validate(&self) -> common::Result<()> {
        if !self.provider.base_url.starts_with("http://")
            && !self.provider.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.provider.base_url
            )));
        }

        if self.provider.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that read or mutate process environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_VARS: &[&str] = &[
        "ALIEXPRESS_APP_KEY",
        "ALIEXPRESS_APP_SECRET",
        "ALIEXPRESS_TRACKING_ID",
        "ALIEXPRESS_REDIRECT_URI",
        "ALIEXPRESS_AUTH_MODE",
        "ALIEXPRESS_SIGN_METHOD",
        "PORT",
        "CONFIG_PATH",
    ];

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    /// SAFETY: Callers must hold ENV_MUTEX.
    unsafe fn clear_env() {
        for key in ENV_VARS {
            unsafe { std::env::remove_var(key) };
        }
    }

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("aliexpress-proxy.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn valid_toml() -> &'static str {
        r#"
[server]
listen_addr = "127.0.0.1:8080"

[provider]
base_url = "https://api-sg.aliexpress.com"
auth_mode = "oauth"
sign_method = "hmac-sha256"
app_key = "517616"
tracking_id = "loja"
redirect_uri = "https://shop.example.com/oauth/callback"
"#
    }

    #[test]
    fn test_load_valid_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_env() };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), valid_toml());

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.listen_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.provider.timeout_secs, 10);
        assert_eq!(config.provider.auth_mode, AuthMode::OAuth);
        assert_eq!(config.provider.sign_method, SignMethod::HmacSha256);
        assert_eq!(config.provider.app_key, "517616");
        assert_eq!(config.provider.tracking_id, "loja");
        assert!(config.provider.app_secret.is_none());
        assert!(config.provider.scope.is_empty());
    }

    #[test]
    fn test_defaults_without_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_env() };

        let config = Config::load(None).unwrap();
        assert_eq!(config.server.listen_addr.to_string(), "0.0.0.0:5000");
        assert_eq!(config.provider.base_url, "https://api-sg.aliexpress.com");
        assert_eq!(config.provider.auth_mode, AuthMode::Signed);
        assert_eq!(config.provider.sign_method, SignMethod::Md5);

        let credentials = config.credentials();
        assert!(!credentials.app_key_configured());
        assert!(!credentials.app_secret_configured());
        assert!(!credentials.tracking_id_configured());
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let result = Config::load(Some(Path::new("/nonexistent/path/config.toml")));
        assert!(matches!(result, Err(common::Error::Io(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "not valid {{{{ toml");
        assert!(matches!(
            Config::load(Some(&path)),
            Err(common::Error::Toml(_))
        ));
    }

    #[test]
    fn test_unknown_auth_mode_in_toml_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "[provider]\nauth_mode = \"bearer\"\n");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_env() };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), valid_toml());

        unsafe {
            set_env("ALIEXPRESS_APP_KEY", "999");
            set_env("ALIEXPRESS_APP_SECRET", "from-env");
            set_env("ALIEXPRESS_TRACKING_ID", "env-tracking");
            set_env("ALIEXPRESS_REDIRECT_URI", "https://env.example.com/cb");
            set_env("ALIEXPRESS_AUTH_MODE", "signed");
            set_env("PORT", "7000");
        }
        let config = Config::load(Some(&path)).unwrap();
        unsafe { clear_env() };

        assert_eq!(config.provider.app_key, "999");
        assert_eq!(
            config.provider.app_secret.as_ref().unwrap().expose(),
            "from-env"
        );
        assert_eq!(config.provider.tracking_id, "env-tracking");
        assert_eq!(config.provider.redirect_uri, "https://env.example.com/cb");
        assert_eq!(config.provider.auth_mode, AuthMode::Signed);
        assert_eq!(config.server.listen_addr.to_string(), "127.0.0.1:7000");
    }

    #[test]
    fn test_invalid_env_values_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_env() };

        unsafe { set_env("ALIEXPRESS_AUTH_MODE", "bearer") };
        let err = Config::load(None).unwrap_err();
        assert!(err.to_string().contains("ALIEXPRESS_AUTH_MODE"), "got: {err}");
        unsafe { clear_env() };

        unsafe { set_env("PORT", "not-a-port") };
        let err = Config::load(None).unwrap_err();
        assert!(err.to_string().contains("PORT"), "got: {err}");
        unsafe { clear_env() };
    }

    #[test]
    fn test_app_secret_from_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_env() };
        let dir = tempfile::tempdir().unwrap();
        let secret_path = dir.path().join("app_secret");
        std::fs::write(&secret_path, "file-secret\n").unwrap();
        let path = write_config(
            dir.path(),
            &format!(
                "[provider]\napp_secret_file = \"{}\"\n",
                secret_path.display()
            ),
        );

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(
            config.provider.app_secret.as_ref().unwrap().expose(),
            "file-secret"
        );
    }

    #[test]
    fn test_env_secret_takes_precedence_over_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_env() };
        let dir = tempfile::tempdir().unwrap();
        let secret_path = dir.path().join("app_secret");
        std::fs::write(&secret_path, "file-secret").unwrap();
        let path = write_config(
            dir.path(),
            &format!(
                "[provider]\napp_secret_file = \"{}\"\n",
                secret_path.display()
            ),
        );

        unsafe { set_env("ALIEXPRESS_APP_SECRET", "env-secret") };
        let config = Config::load(Some(&path)).unwrap();
        unsafe { clear_env() };

        assert_eq!(
            config.provider.app_secret.as_ref().unwrap().expose(),
            "env-secret"
        );
    }

    #[test]
    fn test_missing_secret_file_is_config_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_env() };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            "[provider]\napp_secret_file = \"/nonexistent/app_secret\"\n",
        );

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("app_secret_file"), "got: {err}");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_env() };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "[provider]\nbase_url = \"ftp://example.com\"\n");

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("base_url"), "got: {err}");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_env() };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "[provider]\ntimeout_secs = 0\n");

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("timeout_secs"), "got: {err}");
    }

    #[test]
    fn test_zero_max_connections_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_env() };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "[server]\nmax_connections = 0\n");

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("max_connections"), "got: {err}");
    }

    #[test]
    fn test_resolve_path_prefers_cli_then_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_env() };

        unsafe { set_env("CONFIG_PATH", "/etc/from-env.toml") };
        assert_eq!(
            Config::resolve_path(Some("/etc/from-cli.toml")),
            Some(PathBuf::from("/etc/from-cli.toml"))
        );
        assert_eq!(
            Config::resolve_path(None),
            Some(PathBuf::from("/etc/from-env.toml"))
        );
        unsafe { clear_env() };
    }

    #[test]
    fn test_resolve_path_skips_absent_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_env() };

        // Tests run from the crate directory, which ships no config file
        assert_eq!(Config::resolve_path(None), None);
    }
}
