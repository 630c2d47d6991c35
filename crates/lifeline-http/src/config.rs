//! HTTP configuration.

use std::time::Duration;

use lifeline_session::LoginKind;

/// Paths of the credential endpoints, relative to the base URL.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub user_login: String,
    pub admin_login: String,
    pub refresh: String,
    pub user_profile: String,
    pub admin_profile: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            user_login: "/api/users/login".into(),
            admin_login: "/api/admin/login".into(),
            refresh: "/api/users/refresh".into(),
            user_profile: "/api/users/me".into(),
            admin_profile: "/api/admin/me".into(),
        }
    }
}

impl Endpoints {
    pub fn login(&self, kind: LoginKind) -> &str {
        match kind {
            LoginKind::User => &self.user_login,
            LoginKind::Admin => &self.admin_login,
        }
    }

    pub fn profile(&self, kind: LoginKind) -> &str {
        match kind {
            LoginKind::User => &self.user_profile,
            LoginKind::Admin => &self.admin_profile,
        }
    }
}

/// Configuration for the request layer.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Scheme, host and optional prefix every path is joined onto.
    pub base_url: String,

    /// Timeout of a request that does not set its own.
    ///
    /// Default: 60 seconds.
    pub default_timeout: Duration,

    /// Factor applied to a request's timeout before its network retry.
    ///
    /// Default: 1.5.
    pub retry_timeout_multiplier: f64,

    /// Pause before the network retry.
    ///
    /// Default: 1 second.
    pub network_retry_delay: Duration,

    /// Distinct failure notices shown at once. Default: 3.
    pub notice_capacity: usize,

    /// How long a failure notice stays on screen. Default: 3 seconds.
    pub notice_ttl: Duration,

    pub endpoints: Endpoints,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".into(),
            default_timeout: Duration::from_secs(60),
            retry_timeout_multiplier: 1.5,
            network_retry_delay: Duration::from_secs(1),
            notice_capacity: 3,
            notice_ttl: Duration::from_secs(3),
            endpoints: Endpoints::default(),
        }
    }
}

impl HttpConfig {
    /// A config pointing at `base_url` with default settings.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Joins `path` onto the base URL. Absolute URLs pass through.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    /// The timeout a retried request gets.
    pub fn widened_timeout(&self, timeout: Duration) -> Duration {
        if self.retry_timeout_multiplier.is_nan() || self.retry_timeout_multiplier < 1.0 {
            return timeout;
        }
        timeout.mul_f64(self.retry_timeout_multiplier)
    }
}
