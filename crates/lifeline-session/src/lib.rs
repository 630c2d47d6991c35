//! Credential lifecycle for Lifeline.
//!
//! This crate owns the one piece of process-wide state everything else
//! depends on: the bearer token.
//!
//! 1. **Credential** ([`Credential`], [`Claims`]): a token with its decoded
//!    subject and expiry. Only constructed by parsing, so it is always
//!    well-formed.
//! 2. **Session** ([`Session`], [`Role`]): the identity presented to the
//!    application, derived from the credential and an optional profile.
//! 3. **Storage** ([`CredentialStore`], [`MemoryStore`], [`FileStore`]):
//!    where the token survives a restart.
//! 4. **Lifecycle** ([`TokenLifecycleManager`]): login, refresh, expiry,
//!    logout, and the fan-out of each change to [`CredentialListener`]s.
//!
//! # How it fits in the stack
//!
//! ```text
//! Facade (above)      ← login/logout, owns the manager
//!     ↕
//! Session (this crate) ──→ listeners: realtime re-authenticates
//!     ↕                ──→ authority: HTTP stamps + refreshes on 401
//! Protocol (below)    ← TokenResponse, ProfileDocument, UserId
//! ```

mod auth;
mod credential;
mod error;
mod manager;
mod notify;
mod session;
mod store;

pub use auth::AuthApi;
pub use credential::{unix_now, Claims, Credential};
pub use error::{AuthApiError, SessionError, StoreError};
pub use manager::{
    CredentialAuthority, Freshness, LoginOutcome, LoginWarning,
    TokenLifecycleManager,
};
pub use notify::{CredentialEvent, CredentialListener, EndReason, SessionEvent};
pub use session::{LoginKind, Role, Session, SessionConfig};
pub use store::{CredentialStore, FileStore, MemoryStore, SESSION_KEY, TOKEN_KEY};
