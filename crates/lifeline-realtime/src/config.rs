//! Realtime channel configuration.

use std::time::Duration;

use rand::Rng;

// ---------------------------------------------------------------------------
// ReconnectPolicy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff between automatic reconnect attempts.
///
/// The delay before retry `k` (the k-th consecutive failure) is
/// `min(base_delay * growth_factor^k, delay_cap)`, plus up to `jitter`.
/// After `max_attempts` failures no further retry is scheduled.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Default: 1 second.
    pub base_delay: Duration,
    /// Default: 1.5.
    pub growth_factor: f64,
    /// Default: 10 seconds.
    pub delay_cap: Duration,
    /// Default: 5.
    pub max_attempts: u32,
    /// Random extra delay (0..=jitter) to spread clients that lost the
    /// server at the same moment. Default: none.
    pub jitter: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            growth_factor: 1.5,
            delay_cap: Duration::from_millis(10_000),
            max_attempts: 5,
            jitter: Duration::ZERO,
        }
    }
}

impl ReconnectPolicy {
    /// Clamps out-of-range values so the policy is safe to use.
    ///
    /// - `growth_factor` below 1.0 (or NaN) becomes 1.0
    /// - `delay_cap` below `base_delay` is raised to `base_delay`
    pub fn validated(mut self) -> Self {
        if self.growth_factor.is_nan() || self.growth_factor < 1.0 {
            tracing::warn!(growth = self.growth_factor, "growth_factor below 1.0, clamping");
            self.growth_factor = 1.0;
        }
        if self.delay_cap < self.base_delay {
            tracing::warn!(
                cap = ?self.delay_cap,
                base = ?self.base_delay,
                "delay_cap below base_delay, raising"
            );
            self.delay_cap = self.base_delay;
        }
        self
    }

    /// Delay before the retry that follows failure number `attempt`,
    /// without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay.as_secs_f64() * self.growth_factor.powi(exponent);
        let capped = raw.min(self.delay_cap.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// [`backoff`](Self::backoff) plus random jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.backoff(attempt);
        }
        let extra = rand::rng().random_range(0..=jitter_ms);
        self.backoff(attempt) + Duration::from_millis(extra)
    }

    /// Whether failure number `attempt` may still be retried.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

// ---------------------------------------------------------------------------
// RealtimeConfig
// ---------------------------------------------------------------------------

/// Configuration for the realtime connection manager.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Endpoints tried in order on every connect attempt; the first that
    /// answers wins. List the preferred transport first.
    pub endpoints: Vec<String>,

    /// Budget for one endpoint to complete its handshake.
    ///
    /// Default: 15 seconds.
    pub connect_timeout: Duration,

    /// Whether lost connections and failed dials are retried
    /// automatically.
    ///
    /// Default: `true`.
    pub reconnection: bool,

    pub policy: ReconnectPolicy,

    /// Query parameters appended to every endpoint. Values are sent as
    /// given, so they must already be URL-safe.
    pub query: Vec<(String, String)>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            connect_timeout: Duration::from_secs(15),
            reconnection: true,
            policy: ReconnectPolicy::default(),
            query: Vec::new(),
        }
    }
}

impl RealtimeConfig {
    /// A config with a single endpoint and default settings.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoints: vec![endpoint.into()],
            ..Default::default()
        }
    }

    /// Adds a fallback endpoint, tried after the ones already listed.
    pub fn fallback(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    /// The URLs to dial, in order, with the query string applied.
    pub fn dial_targets(&self) -> Vec<String> {
        if self.query.is_empty() {
            return self.endpoints.clone();
        }
        let query = self
            .query
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        self.endpoints
            .iter()
            .map(|endpoint| {
                let separator = if endpoint.contains('?') { '&' } else { '?' };
                format!("{endpoint}{separator}{query}")
            })
            .collect()
    }
}
