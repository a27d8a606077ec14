//! Application credentials issued by the AliExpress open platform

use common::Secret;

/// App key, app secret and affiliate tracking id.
///
/// Built once at startup and shared read-only. Any field may be empty when
/// the deployment has not configured it; the health endpoint reports that
/// through the `*_configured` accessors instead of failing startup.
#[derive(Debug, Clone)]
pub struct Credentials {
    app_key: String,
    app_secret: Secret<String>,
    tracking_id: String,
}

impl Credentials {
    pub fn new(
        app_key: impl Into<String>,
        app_secret: Secret<String>,
        tracking_id: impl Into<String>,
    ) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret,
            tracking_id: tracking_id.into(),
        }
    }

    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    pub fn app_secret(&self) -> &str {
        self.app_secret.expose()
    }

    pub fn tracking_id(&self) -> &str {
        &self.tracking_id
    }

    pub fn app_key_configured(&self) -> bool {
        !self.app_key.trim().is_empty()
    }

    pub fn app_secret_configured(&self) -> bool {
        !self.app_secret.is_blank()
    }

    pub fn tracking_id_configured(&self) -> bool {
        !self.tracking_id.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_flags_reflect_presence() {
        let creds = Credentials::new("517616", Secret::from(""), "tracking");
        assert!(creds.app_key_configured());
        assert!(!creds.app_secret_configured());
        assert!(creds.tracking_id_configured());
    }

    #[test]
    fn debug_output_hides_app_secret() {
        let creds = Credentials::new("517616", Secret::from("super-secret"), "");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("super-secret"), "got: {debug}");
        assert!(debug.contains("517616"));
    }
}
