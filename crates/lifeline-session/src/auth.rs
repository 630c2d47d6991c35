//! The credential endpoints, as seen by the lifecycle manager.
//!
//! The manager never talks HTTP itself. It calls an [`AuthApi`], which the
//! `lifeline-http` crate implements over reqwest and tests implement with an
//! in-memory fake.

use std::future::Future;
use std::sync::Arc;

use lifeline_protocol::{LoginRequest, ProfileDocument, TokenResponse};

use crate::{AuthApiError, LoginKind};

/// Issuing, refresh and profile endpoints.
///
/// Implementations map transport and status failures onto
/// [`AuthApiError`]: a rejected login or refresh is
/// [`AuthApiError::Rejected`], a missing endpoint is
/// [`AuthApiError::NotFound`], anything network-shaped is
/// [`AuthApiError::Unavailable`].
///
/// ```rust
/// use lifeline_protocol::{LoginRequest, ProfileDocument, TokenResponse};
/// use lifeline_session::{AuthApi, AuthApiError, LoginKind};
///
/// /// Rejects everyone. Handy for exercising the failure paths.
/// struct Closed;
///
/// impl AuthApi for Closed {
///     async fn login(
///         &self,
///         _kind: LoginKind,
///         _request: &LoginRequest,
///     ) -> Result<TokenResponse, AuthApiError> {
///         Err(AuthApiError::Rejected { status: 401, message: None })
///     }
///
///     async fn refresh(&self, _bearer: &str) -> Result<TokenResponse, AuthApiError> {
///         Err(AuthApiError::Rejected { status: 401, message: None })
///     }
///
///     async fn profile(
///         &self,
///         _kind: LoginKind,
///         _bearer: &str,
///     ) -> Result<ProfileDocument, AuthApiError> {
///         Err(AuthApiError::NotFound)
///     }
/// }
/// ```
pub trait AuthApi: Send + Sync + 'static {
    /// Exchanges an email/password pair for a token at the endpoint that
    /// matches `kind`.
    fn login(
        &self,
        kind: LoginKind,
        request: &LoginRequest,
    ) -> impl Future<Output = Result<TokenResponse, AuthApiError>> + Send;

    /// Exchanges the current bearer token for a fresh one.
    fn refresh(
        &self,
        bearer: &str,
    ) -> impl Future<Output = Result<TokenResponse, AuthApiError>> + Send;

    /// Fetches the extended profile of the token's subject.
    fn profile(
        &self,
        kind: LoginKind,
        bearer: &str,
    ) -> impl Future<Output = Result<ProfileDocument, AuthApiError>> + Send;
}

impl<T: AuthApi> AuthApi for Arc<T> {
    fn login(
        &self,
        kind: LoginKind,
        request: &LoginRequest,
    ) -> impl Future<Output = Result<TokenResponse, AuthApiError>> + Send {
        (**self).login(kind, request)
    }

    fn refresh(
        &self,
        bearer: &str,
    ) -> impl Future<Output = Result<TokenResponse, AuthApiError>> + Send {
        (**self).refresh(bearer)
    }

    fn profile(
        &self,
        kind: LoginKind,
        bearer: &str,
    ) -> impl Future<Output = Result<ProfileDocument, AuthApiError>> + Send {
        (**self).profile(kind, bearer)
    }
}
