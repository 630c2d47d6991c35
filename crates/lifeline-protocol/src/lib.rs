//! Wire protocol for Lifeline.
//!
//! This crate defines every payload that crosses an external boundary:
//!
//! - **Realtime events** ([`ClientEvent`], [`ServerEvent`], [`EventKind`]):
//!   the frames exchanged over the persistent channel.
//! - **REST schemas** ([`TokenResponse`], [`ProfileDocument`], [`ErrorBody`],
//!   [`LoginRequest`]): the bodies of the issuing, refresh and profile
//!   endpoints.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how events become bytes.
//! - **Errors** ([`ProtocolError`]): malformed or unexpected payloads.
//!
//! Nothing in the rest of the workspace reads a raw JSON value: every
//! payload goes through one of these types first, and a payload that does
//! not fit is a [`ProtocolError`], never a panic at use time.
//!
//! ```text
//! Transport (bytes) → Protocol (ServerEvent) → Realtime (state machine)
//! HTTP body (bytes) → Protocol (TokenResponse) → Session (Credential)
//! ```

mod codec;
mod error;
mod events;
mod rest;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use events::{
    ChatMessage, ClientEvent, EventKind, ItemRef, MessageId, ServerEvent,
    UserId,
};
pub use rest::{ErrorBody, LoginRequest, ProfileDocument, TokenResponse};
