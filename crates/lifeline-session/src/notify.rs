//! Fan-out of credential changes.
//!
//! Two audiences:
//!
//! - **Consumers that must act** (the realtime channel re-authenticating)
//!   register a [`CredentialListener`]. Listeners are called synchronously,
//!   before the operation that changed the credential returns.
//! - **Observers** (a presentation layer) subscribe to the broadcast stream
//!   of [`SessionEvent`]s and may lag or miss events without affecting
//!   correctness.

use std::sync::Arc;

use lifeline_protocol::UserId;

use crate::{Credential, LoginKind};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The user (or the application on their behalf) logged out.
    Logout,
    /// The token was found past its expiry, or the server stopped
    /// accepting it.
    Expired,
    /// The token was inside the refresh window and the refresh failed.
    RefreshFailed,
}

/// A change to the credential, delivered to every [`CredentialListener`].
#[derive(Debug, Clone)]
pub enum CredentialEvent {
    /// A new session began (login, admin login, restore).
    Established {
        credential: Arc<Credential>,
        kind: LoginKind,
    },
    /// The token of the running session was replaced by a refreshed one.
    Refreshed {
        credential: Arc<Credential>,
        kind: LoginKind,
    },
    /// The session is gone.
    Ended(EndReason),
}

/// Something that must react to credential changes before the change is
/// reported as complete.
///
/// Implementations must not block: enqueue work and return.
pub trait CredentialListener: Send + Sync + 'static {
    fn on_credential_event(&self, event: &CredentialEvent);
}

/// Observable lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { user_id: UserId, kind: LoginKind },
    Restored { user_id: UserId },
    Refreshed { user_id: UserId, expires_at: u64 },
    ProfileUpdated { user_id: UserId },
    Ended(EndReason),
}
