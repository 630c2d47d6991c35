//! Facade configuration and builder.

use std::path::PathBuf;
use std::sync::Arc;

use lifeline_http::{HttpAuthApi, HttpConfig, RequestRetryCoordinator};
use lifeline_protocol::JsonCodec;
use lifeline_realtime::{RealtimeConfig, RealtimeConnectionManager};
use lifeline_session::{SessionConfig, TokenLifecycleManager};
use lifeline_transport::{Dialer, WebSocketDialer};

use crate::store::StoreConfig;
use crate::{LifelineError, SessionFacade};

/// Everything the facade needs, grouped by component.
#[derive(Debug, Clone, Default)]
pub struct LifelineConfig {
    pub session: SessionConfig,
    pub realtime: RealtimeConfig,
    pub http: HttpConfig,
    pub store: StoreConfig,
}

/// Builder for [`SessionFacade`].
///
/// # Example
///
/// ```rust,no_run
/// use lifeline::prelude::*;
///
/// # async fn run() -> Result<(), LifelineError> {
/// let facade = SessionFacade::builder()
///     .base_url("https://market.example.com")
///     .realtime_endpoint("wss://market.example.com/socket")
///     .file_store("/var/lib/market/session.json")
///     .build()?;
/// facade.restore().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct LifelineBuilder {
    config: LifelineConfig,
    client: Option<reqwest::Client>,
}

impl LifelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from a complete configuration.
    pub fn with_config(config: LifelineConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    /// Sets the REST base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.http.base_url = url.into();
        self
    }

    /// Adds a realtime endpoint. Endpoints are tried in the order added.
    pub fn realtime_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.realtime.endpoints.push(url.into());
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    pub fn realtime_config(mut self, config: RealtimeConfig) -> Self {
        self.config.realtime = config;
        self
    }

    pub fn http_config(mut self, config: HttpConfig) -> Self {
        self.config.http = config;
        self
    }

    /// Keeps the credential in memory only.
    pub fn memory_store(mut self) -> Self {
        self.config.store = StoreConfig::Memory;
        self
    }

    /// Persists the credential to a JSON file.
    pub fn file_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store = StoreConfig::File(path.into());
        self
    }

    /// Shares an existing reqwest client (and its connection pool).
    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Builds the facade with the WebSocket dialer.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    /// A store that cannot be opened, or an HTTP client that cannot be
    /// built.
    pub fn build(self) -> Result<SessionFacade, LifelineError> {
        self.build_with_dialer(WebSocketDialer::new())
    }

    /// Builds the facade over any dialer.
    pub fn build_with_dialer<D: Dialer>(self, dialer: D) -> Result<SessionFacade, LifelineError> {
        let LifelineConfig {
            session,
            realtime,
            http,
            store,
        } = self.config;

        let client = match self.client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .build()
                .map_err(|e| lifeline_http::HttpError::InvalidRequest(format!("http client: {e}")))?,
        };

        let store = store.open()?;
        let api = HttpAuthApi::new(client.clone(), http.clone());
        let tokens = Arc::new(TokenLifecycleManager::new(api, store, session));
        let channel = RealtimeConnectionManager::spawn(dialer, JsonCodec, realtime);
        let requests = RequestRetryCoordinator::with_client(client, tokens.clone(), http);

        Ok(SessionFacade::assemble(tokens, channel, requests))
    }
}
