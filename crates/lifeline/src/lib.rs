//! # Lifeline
//!
//! The client side of an authenticated session: a bearer token that is
//! refreshed before it expires, a realtime channel that stays connected
//! and authenticated with it, and HTTP requests that recover from a
//! rejected token or a network blip exactly once.
//!
//! Applications talk to a single [`SessionFacade`]; the component crates
//! are re-exported for callers that need to reach below it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lifeline::prelude::*;
//!
//! # async fn run() -> Result<(), LifelineError> {
//! let facade = SessionFacade::builder()
//!     .base_url("http://127.0.0.1:8000")
//!     .realtime_endpoint("ws://127.0.0.1:8000/socket")
//!     .build()?;
//!
//! let outcome = facade.login("ana@example.com", "secret").await?;
//! println!("hello, {}", outcome.session.display_name);
//!
//! let favorites: Vec<serde_json::Value> =
//!     facade.send_json(ApiRequest::get("/api/users/favorites")).await?;
//! # let _ = favorites;
//! facade.logout();
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod facade;
mod store;

pub use config::{LifelineBuilder, LifelineConfig};
pub use error::LifelineError;
pub use facade::{AuthState, SessionFacade, Tokens};
pub use store::{LifelineStore, StoreConfig};

pub use lifeline_http as http;
pub use lifeline_protocol as protocol;
pub use lifeline_realtime as realtime;
pub use lifeline_session as session;
pub use lifeline_transport as transport;

/// The types most applications need.
pub mod prelude {
    pub use crate::{AuthState, LifelineBuilder, LifelineConfig, LifelineError, SessionFacade};
    pub use lifeline_http::{ApiRequest, ApiResponse, HttpConfig, HttpError, MultipartForm};
    pub use lifeline_protocol::{EventKind, MessageId, ServerEvent, UserId};
    pub use lifeline_realtime::{
        ConnectionPhase, ConnectionStatus, LifecycleEvent, RealtimeConfig, ReconnectPolicy,
    };
    pub use lifeline_session::{
        EndReason, LoginKind, LoginOutcome, LoginWarning, Role, Session, SessionConfig,
        SessionEvent,
    };
}
