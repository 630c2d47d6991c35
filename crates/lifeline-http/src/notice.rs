//! User-facing failure text and duplicate suppression.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Shown when a 401 ends the session.
pub const SESSION_EXPIRED_NOTICE: &str = "session expired, please log in again";

// ---------------------------------------------------------------------------
// NetworkNotice
// ---------------------------------------------------------------------------

/// What kind of network failure a request ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkNotice {
    /// The request exceeded its timeout.
    TimedOut,
    /// The connection could not be established.
    Disconnected,
    /// The connection broke while the request was in flight.
    Unstable,
    /// Anything else that left us without a response.
    NoResponse,
}

impl NetworkNotice {
    /// Classifies a reqwest failure.
    pub fn classify(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::TimedOut
        } else if error.is_connect() {
            Self::Disconnected
        } else if error.is_request() {
            Self::Unstable
        } else {
            Self::NoResponse
        }
    }

    /// Failures a single retry might get past.
    pub fn is_transient(self) -> bool {
        !matches!(self, Self::NoResponse)
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::TimedOut => "request timed out",
            Self::Disconnected => "network disconnected",
            Self::Unstable => "network unstable",
            Self::NoResponse => "server did not respond",
        }
    }
}

impl fmt::Display for NetworkNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

// ---------------------------------------------------------------------------
// Status messages
// ---------------------------------------------------------------------------

/// The user-facing message for a failed response.
///
/// A message supplied by the server always wins; otherwise the text is
/// derived from the status alone.
pub fn user_message(status: u16, server_message: Option<&str>) -> String {
    if let Some(message) = server_message.map(str::trim).filter(|m| !m.is_empty()) {
        return message.to_string();
    }
    match status {
        401 => SESSION_EXPIRED_NOTICE.to_string(),
        403 => "permission denied".to_string(),
        404 => "the requested resource does not exist".to_string(),
        500 => "internal server error, please try again later".to_string(),
        other => format!("request failed ({other})"),
    }
}

// ---------------------------------------------------------------------------
// FailureNotificationWindow
// ---------------------------------------------------------------------------

/// The set of failure messages currently on screen.
///
/// Holds at most `capacity` distinct messages, each for `ttl` after it was
/// admitted. A message already on screen is dropped, and so is any message
/// offered while the window is full. Expiry is evaluated lazily on every
/// call.
#[derive(Debug)]
pub struct FailureNotificationWindow {
    capacity: usize,
    ttl: Duration,
    entries: VecDeque<(String, Instant)>,
}

impl FailureNotificationWindow {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Admits `message` if it is not already showing and there is room.
    /// Returns whether it was admitted.
    pub fn offer(&mut self, message: &str) -> bool {
        self.expire();
        if self.entries.iter().any(|(m, _)| m == message) {
            return false;
        }
        if self.entries.len() >= self.capacity {
            return false;
        }
        self.entries.push_back((message.to_string(), Instant::now()));
        true
    }

    /// The messages currently showing, oldest first.
    pub fn active(&mut self) -> Vec<String> {
        self.expire();
        self.entries.iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn len(&mut self) -> usize {
        self.expire();
        self.entries.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    fn expire(&mut self) {
        let now = Instant::now();
        // Entries are admitted in time order, so expired ones sit at the front.
        while let Some((_, admitted)) = self.entries.front() {
            if now.duration_since(*admitted) < self.ttl {
                break;
            }
            self.entries.pop_front();
        }
    }
}
