//! The realtime channel for Lifeline.
//!
//! Keeps one persistent, server-pushed connection open and authenticated:
//!
//! - **State machine** ([`ConnectionPhase`], [`ConnectionState`]): a closed
//!   transition table; `Authenticated` implies `Connected`.
//! - **Backoff** ([`ReconnectPolicy`]): bounded exponential delays between
//!   automatic reconnects, with an attempt cap.
//! - **Dispatch** ([`EventBus`], [`Subscription`]): per-kind handlers for
//!   inbound [`ServerEvent`](lifeline_protocol::ServerEvent)s.
//! - **Manager** ([`RealtimeConnectionManager`]): the actor handle. It
//!   implements [`CredentialListener`](lifeline_session::CredentialListener),
//!   so registering it with the token lifecycle manager is all it takes for
//!   logins, refreshes and logouts to reach the channel.

mod bus;
mod config;
mod error;
mod manager;
mod state;

pub use bus::{EventBus, Subscription};
pub use config::{RealtimeConfig, ReconnectPolicy};
pub use error::RealtimeError;
pub use manager::{DisconnectReason, LifecycleEvent, RealtimeConnectionManager};
pub use state::{ConnectionPhase, ConnectionState, ConnectionStatus};
