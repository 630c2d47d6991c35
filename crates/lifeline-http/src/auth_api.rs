//! The credential endpoints over reqwest.
//!
//! These calls bypass [`RequestRetryCoordinator`](crate::RequestRetryCoordinator):
//! the coordinator's 401 path calls into the lifecycle manager, which calls
//! `refresh` here, and a refresh must never trigger another refresh.

use lifeline_protocol::{ErrorBody, LoginRequest, ProfileDocument, TokenResponse};
use lifeline_session::{AuthApi, AuthApiError, LoginKind};

use crate::HttpConfig;

/// [`AuthApi`] backed by the server's REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpAuthApi {
    client: reqwest::Client,
    config: HttpConfig,
}

impl HttpAuthApi {
    pub fn new(client: reqwest::Client, config: HttpConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    async fn execute(&self, builder: reqwest::RequestBuilder) -> Result<Vec<u8>, AuthApiError> {
        let response = builder
            .timeout(self.config.default_timeout)
            .send()
            .await
            .map_err(|e| AuthApiError::Unavailable(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| AuthApiError::Unavailable(e.to_string()))?
            .to_vec();
        match status {
            200..=299 => Ok(body),
            400 | 401 | 403 => Err(AuthApiError::Rejected {
                status,
                message: ErrorBody::message_from(&body),
            }),
            404 => Err(AuthApiError::NotFound),
            other => Err(AuthApiError::Unavailable(format!(
                "status {other}: {}",
                ErrorBody::message_from(&body).unwrap_or_default()
            ))),
        }
    }
}

impl AuthApi for HttpAuthApi {
    async fn login(
        &self,
        kind: LoginKind,
        request: &LoginRequest,
    ) -> Result<TokenResponse, AuthApiError> {
        let url = self.config.url(self.config.endpoints.login(kind));
        tracing::debug!(?kind, email = %request.email, "calling login endpoint");
        let body = self.execute(self.client.post(url).json(request)).await?;
        Ok(TokenResponse::parse(&body)?)
    }

    async fn refresh(&self, bearer: &str) -> Result<TokenResponse, AuthApiError> {
        let url = self.config.url(&self.config.endpoints.refresh);
        tracing::debug!("calling refresh endpoint");
        let body = self.execute(self.client.post(url).bearer_auth(bearer)).await?;
        Ok(TokenResponse::parse(&body)?)
    }

    async fn profile(
        &self,
        kind: LoginKind,
        bearer: &str,
    ) -> Result<ProfileDocument, AuthApiError> {
        let url = self.config.url(self.config.endpoints.profile(kind));
        let body = self.execute(self.client.get(url).bearer_auth(bearer)).await?;
        Ok(ProfileDocument::parse(&body)?)
    }
}
