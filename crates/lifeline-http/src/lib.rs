//! The request layer for Lifeline.
//!
//! - **Coordinator** ([`RequestRetryCoordinator`]): stamps the current
//!   bearer onto every call; on a 401 asks the session layer for one
//!   refresh and resends; on a transient network failure waits, widens the
//!   timeout and resends once.
//! - **Requests** ([`ApiRequest`], [`ApiResponse`]): resendable request
//!   descriptions, since a reqwest builder is spent on first use.
//! - **Notices** ([`FailureNotificationWindow`], [`user_message`],
//!   [`NetworkNotice`]): the user-facing text of failures, with duplicates
//!   suppressed while they are still showing.
//! - **Credential endpoints** ([`HttpAuthApi`]): the
//!   [`AuthApi`](lifeline_session::AuthApi) the lifecycle manager calls.

mod auth_api;
mod config;
mod coordinator;
mod error;
mod notice;
mod request;

pub use auth_api::HttpAuthApi;
pub use config::{Endpoints, HttpConfig};
pub use coordinator::RequestRetryCoordinator;
pub use error::HttpError;
pub use notice::{
    FailureNotificationWindow, NetworkNotice, SESSION_EXPIRED_NOTICE, user_message,
};
pub use request::{ApiRequest, ApiResponse, FormPart, MultipartForm, RequestBody, RetryMarker};
pub use reqwest::Method;
