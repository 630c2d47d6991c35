//! The request retry coordinator.
//!
//! ```text
//! send(request)
//!   │  stamp bearer (if any)
//!   ▼
//! dispatch ──2xx──→ Ok(ApiResponse)
//!   │ 401 ──first time, had credential──→ check_and_refresh ──ok──→ dispatch again
//!   │     └─otherwise / refresh failed──→ Err(SessionExpired)
//!   │ 4xx/5xx ─────────────────────────→ Err(Status)        (never retried)
//!   │ network ──first time, transient──→ widen timeout, wait, dispatch again
//!   │         └─otherwise──────────────→ Err(Network)
//! ```
//!
//! Each recovery is recorded on the request's [`RetryMarker`], so a
//! request costs at most one refresh and one network resend.

use std::sync::{Mutex, MutexGuard};

use lifeline_protocol::ErrorBody;
use lifeline_session::CredentialAuthority;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;

use crate::notice::SESSION_EXPIRED_NOTICE;
use crate::request::RetryMarker;
use crate::{
    ApiRequest, ApiResponse, FailureNotificationWindow, HttpConfig, HttpError,
    NetworkNotice, user_message,
};

/// Capacity of the notice broadcast buffer.
const NOTICE_BUFFER: usize = 16;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// What one dispatch produced.
enum Attempt {
    Response(reqwest::Response),
    Failed(reqwest::Error),
}

/// Sends requests with the current credential and recovers each one from
/// a single authentication failure and a single network blip.
///
/// Generic over the [`CredentialAuthority`] so the coordinator never owns
/// the credential: it reads the bearer just before each dispatch and asks
/// the authority for a refresh on 401.
pub struct RequestRetryCoordinator<A> {
    client: reqwest::Client,
    config: HttpConfig,
    authority: A,
    window: Mutex<FailureNotificationWindow>,
    notices: broadcast::Sender<String>,
}

impl<A: CredentialAuthority> RequestRetryCoordinator<A> {
    /// Builds a coordinator with its own reqwest client.
    ///
    /// # Errors
    /// [`HttpError::InvalidRequest`] if the client cannot be constructed
    /// (TLS backend initialisation failed).
    pub fn new(authority: A, config: HttpConfig) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| HttpError::InvalidRequest(format!("http client: {e}")))?;
        Ok(Self::with_client(client, authority, config))
    }

    /// Builds a coordinator around an existing client, sharing its
    /// connection pool.
    pub fn with_client(client: reqwest::Client, authority: A, config: HttpConfig) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_BUFFER);
        let window = FailureNotificationWindow::new(config.notice_capacity, config.notice_ttl);
        Self {
            client,
            config,
            authority,
            window: Mutex::new(window),
            notices,
        }
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    pub fn authority(&self) -> &A {
        &self.authority
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Subscribes to user-facing failure notices. Duplicates of a notice
    /// that is still showing are not delivered.
    pub fn notices(&self) -> broadcast::Receiver<String> {
        self.notices.subscribe()
    }

    /// The notices currently showing.
    pub fn active_notices(&self) -> Vec<String> {
        lock(&self.window).active()
    }

    fn notify(&self, message: &str) {
        if lock(&self.window).offer(message) {
            let _ = self.notices.send(message.to_string());
        } else {
            tracing::debug!(message, "notice suppressed");
        }
    }

    /// Sends `request`, recovering from one 401 and one transient network
    /// failure.
    ///
    /// # Errors
    /// - [`HttpError::SessionExpired`] when the credential was rejected and
    ///   could not be refreshed, or there was none
    /// - [`HttpError::Status`] for any other non-success status
    /// - [`HttpError::Network`] when no response arrived, after the resend
    ///   if the failure was transient
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, HttpError> {
        loop {
            let bearer = self.authority.bearer();
            let response = match self.dispatch(&request, bearer.as_deref()).await? {
                Attempt::Response(response) => response,
                Attempt::Failed(error) => {
                    let notice = NetworkNotice::classify(&error);
                    self.notify(notice.message());
                    if notice.is_transient() && !request.marker.network_retried {
                        self.prepare_network_retry(&mut request, notice);
                        tokio::time::sleep(self.config.network_retry_delay).await;
                        continue;
                    }
                    tracing::warn!(
                        method = %request.method(),
                        path = request.path(),
                        %notice,
                        error = %error,
                        "request failed without a response"
                    );
                    self.notify(NetworkNotice::NoResponse.message());
                    return Err(HttpError::Network {
                        notice,
                        source: error,
                    });
                }
            };

            let status = response.status().as_u16();
            if status == 401 {
                if self.recover_unauthorized(&mut request, bearer.is_some()).await {
                    continue;
                }
                self.notify(SESSION_EXPIRED_NOTICE);
                return Err(HttpError::SessionExpired);
            }

            let body = match response.bytes().await {
                Ok(body) => body.to_vec(),
                Err(error) => {
                    let notice = NetworkNotice::classify(&error);
                    self.notify(notice.message());
                    return Err(HttpError::Network {
                        notice,
                        source: error,
                    });
                }
            };

            if (200..300).contains(&status) {
                tracing::debug!(method = %request.method(), path = request.path(), status, "request succeeded");
                return Ok(ApiResponse::new(status, body));
            }

            let server_message = ErrorBody::message_from(&body);
            let message = user_message(status, server_message.as_deref());
            tracing::debug!(method = %request.method(), path = request.path(), status, %message, "request rejected");
            self.notify(&message);
            return Err(HttpError::Status { status, message });
        }
    }

    /// [`send`](Self::send) and decode the JSON body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, HttpError> {
        self.send(request).await?.json()
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<Attempt, HttpError> {
        let timeout = request
            .timeout_override()
            .unwrap_or(self.config.default_timeout);
        let url = self.config.url(request.path());
        tracing::debug!(
            method = %request.method(),
            path = request.path(),
            ?timeout,
            authenticated = bearer.is_some(),
            "dispatching request"
        );
        let builder = request.build(&self.client, url, timeout, bearer)?;
        Ok(match builder.send().await {
            Ok(response) => Attempt::Response(response),
            Err(error) if error.is_builder() => {
                return Err(HttpError::InvalidRequest(error.to_string()));
            }
            Err(error) => Attempt::Failed(error),
        })
    }

    fn prepare_network_retry(&self, request: &mut ApiRequest, notice: NetworkNotice) {
        let current = request
            .timeout_override()
            .unwrap_or(self.config.default_timeout);
        let widened = self.config.widened_timeout(current);
        request.marker = RetryMarker {
            network_retried: true,
            ..request.marker
        };
        request.set_timeout(widened);
        tracing::warn!(
            method = %request.method(),
            path = request.path(),
            %notice,
            timeout = ?widened,
            delay = ?self.config.network_retry_delay,
            "transient network failure, retrying once"
        );
    }

    /// Spends the request's one refresh. Returns whether to resend.
    async fn recover_unauthorized(&self, request: &mut ApiRequest, had_credential: bool) -> bool {
        if !had_credential {
            tracing::debug!(path = request.path(), "401 without a credential");
            return false;
        }
        if request.marker.auth_retried {
            tracing::warn!(path = request.path(), "401 after refresh, giving up");
            return false;
        }
        request.marker = RetryMarker {
            auth_retried: true,
            ..request.marker
        };
        match self.authority.check_and_refresh().await {
            Ok(freshness) => {
                tracing::info!(path = request.path(), ?freshness, "credential checked after 401, resending");
                true
            }
            Err(error) => {
                tracing::warn!(path = request.path(), %error, "credential refresh after 401 failed");
                false
            }
        }
    }
}
