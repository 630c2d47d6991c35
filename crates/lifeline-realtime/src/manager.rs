//! The realtime connection manager: an actor that owns the channel.
//!
//! One Tokio task owns the [`ConnectionState`], the open connection, the
//! held token and the reconnect timer. Everything else talks to it through
//! a [`RealtimeConnectionManager`] handle, which enqueues commands and
//! reads the published [`ConnectionStatus`].
//!
//! ```text
//!  handle ──Command──→ ┌───────────────┐ ──frames──→ Connection
//!                      │ ConnectionActor│
//!  dial task ─Dialed─→ │  (select loop) │ ──dispatch──→ EventBus handlers
//!  reader ──Frame/Closed→└───────────────┘ ──publish──→ watch / broadcast
//! ```
//!
//! Dial and read tasks tag what they report with the connection epoch at
//! spawn time. Any report whose epoch is not the current one belongs to a
//! connection that was torn down in the meantime and is dropped.

use std::sync::Arc;
use std::time::Duration;

use lifeline_protocol::{ClientEvent, Codec, EventKind, MessageId, ServerEvent, UserId};
use lifeline_session::{CredentialEvent, CredentialListener, LoginKind};
use lifeline_transport::{Connection, Dialer, TransportError};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::{
    ConnectionPhase, ConnectionState, ConnectionStatus, EventBus, RealtimeConfig,
    RealtimeError, Subscription,
};

/// Capacity of the [`LifecycleEvent`] broadcast buffer.
const LIFECYCLE_BUFFER: usize = 64;

// ---------------------------------------------------------------------------
// Public events
// ---------------------------------------------------------------------------

/// Why the channel went to `Disconnected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` (or logout) was called.
    Explicit,
    /// The server closed the connection.
    ServerClosed,
    /// The connection broke.
    TransportError(String),
}

/// Observable transitions of the channel, for a presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Connecting { attempt: u32 },
    Connected { endpoint: String },
    Authenticated { user_id: UserId, username: String },
    AuthenticationFailed { message: String },
    Disconnected { reason: DisconnectReason },
    ConnectFailed { attempt: u32, error: String },
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Automatic reconnection stopped; only an explicit connect resumes.
    GaveUp { attempts: u32 },
}

// ---------------------------------------------------------------------------
// Actor messages
// ---------------------------------------------------------------------------

enum Command {
    Connect,
    /// Hold this token and authenticate with it, connecting first if needed.
    Authenticate(String),
    /// Swap the held token for a refreshed one without reconnecting.
    Reauthenticate(String),
    Disconnect,
    Reset,
    /// Write an event. With a reply channel, the caller learns whether it
    /// actually reached the connection.
    Send {
        event: ClientEvent,
        reply: Option<oneshot::Sender<Result<(), RealtimeError>>>,
    },
}

enum Internal<C> {
    Dialed {
        epoch: u64,
        result: Result<(C, String), RealtimeError>,
    },
    Frame {
        epoch: u64,
        data: Vec<u8>,
    },
    Closed {
        epoch: u64,
        error: Option<TransportError>,
    },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to the connection actor. Cheap to clone.
///
/// The actor stops once every handle is dropped.
#[derive(Clone)]
pub struct RealtimeConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    bus: EventBus,
}

impl RealtimeConnectionManager {
    /// Spawns the connection actor. Must be called inside a Tokio runtime.
    ///
    /// Nothing is dialed until [`connect`](Self::connect) or
    /// [`authenticate`](Self::authenticate).
    pub fn spawn<D, K>(dialer: D, codec: K, mut config: RealtimeConfig) -> Self
    where
        D: Dialer,
        K: Codec,
    {
        config.policy = config.policy.validated();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_BUFFER);
        let bus = EventBus::new();

        let actor = ConnectionActor {
            dialer: Arc::new(dialer),
            codec,
            config,
            state: ConnectionState::default(),
            status: status_tx,
            lifecycle: lifecycle.clone(),
            bus: bus.clone(),
            commands: commands_rx,
            internal_tx,
            internal_rx,
            epoch: 0,
            connection: None,
            endpoint: None,
            dial_task: None,
            reader_task: None,
            token: None,
            identity: None,
            reconnect_at: None,
        };
        tokio::spawn(actor.run());

        Self {
            commands: commands_tx,
            status: status_rx,
            lifecycle,
            bus,
        }
    }

    fn command(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Opens the channel. A no-op while connecting, connected or
    /// authenticated.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Authenticates with `token`, connecting first if needed. The phase
    /// becomes `Authenticated` only when the server acknowledges.
    pub fn authenticate(&self, token: impl Into<String>) {
        self.command(Command::Authenticate(token.into()));
    }

    /// Re-sends authentication with a refreshed token over the open
    /// connection. Ignored when no token is held (for example after an
    /// explicit disconnect).
    pub fn reauthenticate(&self, token: impl Into<String>) {
        self.command(Command::Reauthenticate(token.into()));
    }

    /// Closes the channel, cancels any pending reconnect and forgets the
    /// token. Stays disconnected until `connect`/`authenticate`.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Drops the connection, clears the failure count and, if a token is
    /// held, reconnects after the base delay.
    pub fn reset(&self) {
        self.command(Command::Reset);
    }

    fn send_when_authenticated(&self, event: ClientEvent) -> bool {
        if !self.status.borrow().phase.is_authenticated() {
            tracing::debug!(event = event.name(), "dropping outbound event, not authenticated");
            return false;
        }
        self.command(Command::Send { event, reply: None })
    }

    /// Sends an event and waits for the actor's verdict.
    ///
    /// Unlike the `bool` senders, which only report that the event was
    /// queued, this resolves once the frame has been written, so an event
    /// lost to a connection that closed in the meantime is reported.
    ///
    /// # Errors
    /// [`RealtimeError::NotAuthenticated`] if the actor is not
    /// authenticated when it takes the event, a transport or encoding
    /// failure, or [`RealtimeError::Closed`] if the actor has stopped.
    pub async fn deliver(&self, event: ClientEvent) -> Result<(), RealtimeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if !self.command(Command::Send {
            event,
            reply: Some(reply_tx),
        }) {
            return Err(RealtimeError::Closed);
        }
        reply_rx.await.map_err(|_| RealtimeError::Closed)?
    }

    /// Queues a chat message. Returns `false` (and sends nothing) unless
    /// the channel is authenticated. `true` only means the event was
    /// queued; use [`deliver`](Self::deliver) to learn whether it was
    /// written.
    pub fn send_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: impl Into<String>,
        item_id: Option<String>,
    ) -> bool {
        self.send_when_authenticated(ClientEvent::SendMessage {
            sender_id,
            receiver_id,
            content: content.into(),
            item_id,
        })
    }

    /// Tells `receiver_id` that `sender_id` is typing. Returns `false`
    /// unless authenticated.
    pub fn notify_typing(&self, sender_id: UserId, receiver_id: UserId) -> bool {
        self.send_when_authenticated(ClientEvent::Typing {
            sender_id,
            receiver_id,
        })
    }

    /// Marks a message read. Returns `false` unless authenticated.
    pub fn mark_read(&self, message_id: MessageId) -> bool {
        self.send_when_authenticated(ClientEvent::MarkRead { message_id })
    }

    /// Registers a handler for one kind of inbound event.
    pub fn on(
        &self,
        kind: EventKind,
        handler: impl Fn(&ServerEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.bus.on(kind, handler)
    }

    /// Current status snapshot.
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.status.borrow().phase
    }

    /// A receiver that sees every status change.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Subscribes to lifecycle events.
    pub fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    /// Waits until the channel reaches `phase`.
    ///
    /// # Errors
    /// [`RealtimeError::Closed`] if the actor stops first.
    pub async fn wait_for_phase(&self, phase: ConnectionPhase) -> Result<(), RealtimeError> {
        let mut status = self.status.clone();
        status
            .wait_for(|s| s.phase == phase)
            .await
            .map(|_| ())
            .map_err(|_| RealtimeError::Closed)
    }
}

impl CredentialListener for RealtimeConnectionManager {
    fn on_credential_event(&self, event: &CredentialEvent) {
        match event {
            CredentialEvent::Established {
                credential,
                kind: LoginKind::User,
            } => self.authenticate(credential.bearer()),
            CredentialEvent::Refreshed {
                credential,
                kind: LoginKind::User,
            } => self.reauthenticate(credential.bearer()),
            // Admin sessions do not use the realtime channel.
            CredentialEvent::Established { .. } | CredentialEvent::Refreshed { .. } => {}
            CredentialEvent::Ended(_) => self.disconnect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct ConnectionActor<D: Dialer, K> {
    dialer: Arc<D>,
    codec: K,
    config: RealtimeConfig,
    state: ConnectionState,
    status: watch::Sender<ConnectionStatus>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    bus: EventBus,
    commands: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal<D::Connection>>,
    internal_rx: mpsc::UnboundedReceiver<Internal<D::Connection>>,
    /// Bumped whenever the current connection (or dial) is abandoned.
    epoch: u64,
    connection: Option<Arc<D::Connection>>,
    endpoint: Option<String>,
    dial_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
    token: Option<String>,
    /// Identity acknowledged by the server while authenticated.
    identity: Option<(UserId, String)>,
    reconnect_at: Option<Instant>,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl<D: Dialer, K: Codec> ConnectionActor<D, K> {
    async fn run(mut self) {
        tracing::debug!(endpoints = ?self.config.endpoints, "realtime actor started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(internal) = self.internal_rx.recv() => {
                    self.handle_internal(internal).await;
                }
                () = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    tracing::info!(attempt = self.state.attempts, "reconnecting");
                    self.start_dial();
                }
            }
        }

        self.teardown();
        tracing::debug!("realtime actor stopped");
    }

    // -- publishing --------------------------------------------------------

    fn publish_status(&self) {
        let (user_id, username) = match &self.identity {
            Some((id, name)) => (Some(id.clone()), Some(name.clone())),
            None => (None, None),
        };
        self.status.send_replace(ConnectionStatus {
            phase: self.state.phase,
            attempts: self.state.attempts,
            last_error: self.state.last_error.clone(),
            endpoint: self.endpoint.clone(),
            user_id,
            username,
        });
    }

    fn emit(&self, event: LifecycleEvent) {
        let _ = self.lifecycle.send(event);
    }

    fn enter(&mut self, phase: ConnectionPhase) -> bool {
        let moved = self.state.advance(phase);
        if moved {
            self.publish_status();
        }
        moved
    }

    // -- commands ----------------------------------------------------------

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.explicit_connect(),
            Command::Authenticate(token) => {
                self.token = Some(token);
                if self.state.phase.is_connected() {
                    self.send_authenticate().await;
                } else {
                    self.explicit_connect();
                }
            }
            Command::Reauthenticate(token) => {
                if self.token.is_none() {
                    tracing::debug!("refreshed token ignored, channel not in use");
                    return;
                }
                self.token = Some(token);
                if self.state.phase.is_connected() {
                    self.send_authenticate().await;
                }
            }
            Command::Disconnect => {
                self.token = None;
                self.drop_connection();
                self.reconnect_at = None;
                if self.state.phase != ConnectionPhase::Disconnected {
                    self.enter(ConnectionPhase::Disconnected);
                    tracing::info!("realtime channel disconnected");
                    self.emit(LifecycleEvent::Disconnected {
                        reason: DisconnectReason::Explicit,
                    });
                }
            }
            Command::Reset => {
                self.drop_connection();
                self.reconnect_at = None;
                self.enter(ConnectionPhase::Disconnected);
                self.state.record_success();
                self.publish_status();
                if self.token.is_some() {
                    self.schedule_reconnect(self.config.policy.base_delay);
                }
            }
            Command::Send { event, reply } => {
                let result = if self.state.phase.is_authenticated() {
                    self.send_event(&event).await
                } else {
                    tracing::debug!(event = event.name(), "dropping outbound event, not authenticated");
                    Err(RealtimeError::NotAuthenticated)
                };
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
        }
    }

    /// Connect requested by a caller: cancels a pending retry and dials
    /// now. After a terminal failure the attempt count starts over.
    fn explicit_connect(&mut self) {
        match self.state.phase {
            ConnectionPhase::Connecting
            | ConnectionPhase::Connected
            | ConnectionPhase::Authenticated => {}
            ConnectionPhase::Disconnected | ConnectionPhase::Errored => {
                if !self.config.policy.allows_retry(self.state.attempts) {
                    self.state.record_success();
                }
                self.reconnect_at = None;
                self.start_dial();
            }
        }
    }

    // -- dialing -----------------------------------------------------------

    fn start_dial(&mut self) {
        if !self.enter(ConnectionPhase::Connecting) {
            return;
        }
        self.epoch += 1;
        let epoch = self.epoch;
        self.emit(LifecycleEvent::Connecting {
            attempt: self.state.attempts,
        });

        let dialer = self.dialer.clone();
        let targets = self.config.dial_targets();
        let timeout = self.config.connect_timeout;
        let tx = self.internal_tx.clone();

        self.dial_task = Some(tokio::spawn(async move {
            let mut last_error = RealtimeError::NoEndpoints;
            for endpoint in targets {
                match tokio::time::timeout(timeout, dialer.dial(&endpoint)).await {
                    Ok(Ok(connection)) => {
                        let _ = tx.send(Internal::Dialed {
                            epoch,
                            result: Ok((connection, endpoint)),
                        });
                        return;
                    }
                    Ok(Err(e)) => {
                        tracing::debug!(%endpoint, error = %e, "endpoint refused");
                        last_error = e.into();
                    }
                    Err(_) => {
                        tracing::debug!(%endpoint, ?timeout, "endpoint timed out");
                        last_error = RealtimeError::ConnectTimeout(timeout);
                    }
                }
            }
            let _ = tx.send(Internal::Dialed {
                epoch,
                result: Err(last_error),
            });
        }));
    }

    fn schedule_reconnect(&mut self, delay: Duration) {
        self.reconnect_at = Some(Instant::now() + delay);
        tracing::info!(attempt = self.state.attempts, ?delay, "reconnect scheduled");
        self.emit(LifecycleEvent::ReconnectScheduled {
            attempt: self.state.attempts,
            delay,
        });
    }

    fn on_dial_failed(&mut self, error: RealtimeError) {
        let attempt = self.state.record_failure(error.to_string());
        self.enter(ConnectionPhase::Errored);
        tracing::warn!(attempt, error = %error, "realtime connect failed");
        self.emit(LifecycleEvent::ConnectFailed {
            attempt,
            error: error.to_string(),
        });

        if !self.config.reconnection {
            return;
        }
        if self.config.policy.allows_retry(attempt) {
            let delay = self.config.policy.delay_for(attempt);
            self.schedule_reconnect(delay);
        } else {
            let gave_up = RealtimeError::AttemptsExhausted { attempts: attempt };
            tracing::error!(attempts = attempt, "{gave_up}");
            self.state.last_error = Some(gave_up.to_string());
            self.publish_status();
            self.emit(LifecycleEvent::GaveUp { attempts: attempt });
        }
    }

    async fn on_dialed(&mut self, connection: D::Connection, endpoint: String) {
        let connection = Arc::new(connection);
        self.state.record_success();
        self.connection = Some(connection.clone());
        self.endpoint = Some(endpoint.clone());
        self.enter(ConnectionPhase::Connected);
        tracing::info!(%endpoint, conn = %connection.id(), "realtime channel connected");
        self.emit(LifecycleEvent::Connected { endpoint });

        let tx = self.internal_tx.clone();
        let epoch = self.epoch;
        self.reader_task = Some(tokio::spawn(async move {
            loop {
                match connection.recv().await {
                    Ok(Some(data)) => {
                        if tx.send(Internal::Frame { epoch, data }).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        let _ = tx.send(Internal::Closed { epoch, error: None });
                        break;
                    }
                    Err(e) => {
                        let _ = tx.send(Internal::Closed {
                            epoch,
                            error: Some(e),
                        });
                        break;
                    }
                }
            }
        }));

        if self.token.is_some() {
            self.send_authenticate().await;
        }
    }

    // -- connection I/O ----------------------------------------------------

    async fn send_authenticate(&mut self) {
        let Some(token) = self.token.clone() else {
            return;
        };
        if let Err(e) = self.send_event(&ClientEvent::Authenticate { token }).await {
            tracing::debug!(error = %e, "authenticate not sent");
        }
    }

    async fn send_event(&mut self, event: &ClientEvent) -> Result<(), RealtimeError> {
        let Some(connection) = self.connection.clone() else {
            return Err(RealtimeError::NotAuthenticated);
        };
        let frame = self.codec.encode_event(event).map_err(|e| {
            tracing::warn!(event = event.name(), error = %e, "failed to encode event");
            RealtimeError::from(e)
        })?;
        tracing::debug!(event = event.name(), "sending event");
        if let Err(e) = connection.send(&frame).await {
            tracing::warn!(event = event.name(), error = %e, "send failed, dropping connection");
            let reason = e.to_string();
            self.on_closed(Some(e));
            return Err(RealtimeError::SendFailed(reason));
        }
        Ok(())
    }

    fn drop_connection(&mut self) {
        self.epoch += 1;
        if let Some(task) = self.dial_task.take() {
            task.abort();
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        self.identity = None;
        self.endpoint = None;
        if let Some(connection) = self.connection.take() {
            tokio::spawn(async move {
                let _ = connection.close().await;
            });
        }
    }

    fn on_closed(&mut self, error: Option<TransportError>) {
        self.drop_connection();
        let reason = match error {
            Some(e) => DisconnectReason::TransportError(e.to_string()),
            None => DisconnectReason::ServerClosed,
        };
        self.enter(ConnectionPhase::Disconnected);
        tracing::warn!(?reason, "realtime channel lost");
        self.emit(LifecycleEvent::Disconnected { reason });

        if self.config.reconnection {
            self.schedule_reconnect(self.config.policy.base_delay);
        }
    }

    // -- internal events ---------------------------------------------------

    async fn handle_internal(&mut self, internal: Internal<D::Connection>) {
        match internal {
            Internal::Dialed { epoch, result } if epoch == self.epoch => {
                self.dial_task = None;
                match result {
                    Ok((connection, endpoint)) => self.on_dialed(connection, endpoint).await,
                    Err(error) => self.on_dial_failed(error),
                }
            }
            Internal::Dialed {
                result: Ok((connection, _)),
                ..
            } => {
                // A connect that finished after it was abandoned.
                tokio::spawn(async move {
                    let _ = connection.close().await;
                });
            }
            Internal::Frame { epoch, data } if epoch == self.epoch => self.on_frame(&data),
            Internal::Closed { epoch, error } if epoch == self.epoch => self.on_closed(error),
            _ => tracing::trace!("stale connection report dropped"),
        }
    }

    fn on_frame(&mut self, data: &[u8]) {
        let event = match self.codec.decode_event(data) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable frame");
                return;
            }
        };
        tracing::debug!(event = %event.kind(), "received event");

        match &event {
            ServerEvent::Authenticated { user_id, username } => {
                if self.enter(ConnectionPhase::Authenticated) {
                    self.identity = Some((user_id.clone(), username.clone()));
                    self.publish_status();
                    tracing::info!(%user_id, "realtime channel authenticated");
                    self.emit(LifecycleEvent::Authenticated {
                        user_id: user_id.clone(),
                        username: username.clone(),
                    });
                }
            }
            ServerEvent::AuthenticationError { message } => {
                self.identity = None;
                self.state.last_error = Some(message.clone());
                if self.state.phase.is_authenticated() {
                    self.enter(ConnectionPhase::Connected);
                } else {
                    self.publish_status();
                }
                tracing::warn!(%message, "realtime authentication rejected");
                self.emit(LifecycleEvent::AuthenticationFailed {
                    message: message.clone(),
                });
            }
            ServerEvent::Error { message } => {
                tracing::warn!(%message, "server reported an error");
                self.state.last_error = Some(message.clone());
                self.publish_status();
            }
            _ => {}
        }

        self.bus.dispatch(&event);
    }

    fn teardown(&mut self) {
        self.drop_connection();
        self.reconnect_at = None;
    }
}
