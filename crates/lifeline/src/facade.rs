//! The one surface the application talks to.

use std::sync::{Arc, Weak};

use lifeline_http::{
    ApiRequest, ApiResponse, HttpAuthApi, RequestRetryCoordinator,
};
use lifeline_protocol::{ClientEvent, EventKind, LoginRequest, MessageId, ServerEvent, UserId};
use lifeline_realtime::{
    ConnectionStatus, LifecycleEvent, RealtimeConnectionManager, RealtimeError, Subscription,
};
use lifeline_session::{
    LoginKind, LoginOutcome, Session, SessionEvent, TokenLifecycleManager,
};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;

use crate::store::LifelineStore;
use crate::{LifelineBuilder, LifelineError};

/// The token manager as the facade configures it.
pub type Tokens = TokenLifecycleManager<HttpAuthApi, LifelineStore>;

/// Snapshot of authentication and channel state.
#[derive(Debug, Clone)]
pub struct AuthState {
    pub session: Option<Session>,
    pub authenticated: bool,
    pub kind: Option<LoginKind>,
    pub connection: ConnectionStatus,
}

impl AuthState {
    pub fn is_admin(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_admin)
    }
}

/// Login, logout and authenticated traffic, with the three components
/// behind it wired in the right order.
///
/// - the realtime channel is a listener of the token manager, so every
///   login, refresh and logout reaches it before the call returns
/// - requests go through the retry coordinator, which reads the token
///   manager's credential and asks it for refreshes
/// - a request that ends in [`lifeline_http::HttpError::SessionExpired`]
///   and a `session_expired` push from the server end the session here;
///   no other component forces a logout
pub struct SessionFacade {
    tokens: Arc<Tokens>,
    channel: RealtimeConnectionManager,
    requests: RequestRetryCoordinator<Arc<Tokens>>,
    _takeover: Subscription,
}

impl SessionFacade {
    pub fn builder() -> LifelineBuilder {
        LifelineBuilder::new()
    }

    pub(crate) fn assemble(
        tokens: Arc<Tokens>,
        channel: RealtimeConnectionManager,
        requests: RequestRetryCoordinator<Arc<Tokens>>,
    ) -> Self {
        tokens.add_listener(Arc::new(channel.clone()));

        // Weak, so the channel's handler does not keep the token manager
        // (which holds the channel as a listener) alive.
        let weak: Weak<Tokens> = Arc::downgrade(&tokens);
        let takeover = channel.on(EventKind::SessionExpired, move |event| {
            if let (Some(tokens), ServerEvent::SessionExpired { message }) = (weak.upgrade(), event) {
                tracing::warn!(%message, "server ended the session");
                tokens.expire();
            }
        });

        Self {
            tokens,
            channel,
            requests,
            _takeover: takeover,
        }
    }

    // -- state -------------------------------------------------------------

    pub fn state(&self) -> AuthState {
        AuthState {
            session: self.tokens.current_session(),
            authenticated: self.tokens.is_authenticated(),
            kind: self.tokens.login_kind(),
            connection: self.channel.status(),
        }
    }

    pub fn session(&self) -> Option<Session> {
        self.tokens.current_session()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.is_authenticated()
    }

    pub fn is_admin(&self) -> bool {
        self.session().is_some_and(|s| s.is_admin())
    }

    // -- credential lifecycle ----------------------------------------------

    /// Logs in a regular user. The realtime channel starts connecting and
    /// authenticating before this returns.
    pub async fn login(
        &self,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<LoginOutcome, LifelineError> {
        let request = LoginRequest::new(email, password);
        Ok(self.tokens.login(&request).await?)
    }

    /// Logs in at the admin endpoint. Admin sessions do not open the
    /// realtime channel.
    pub async fn admin_login(
        &self,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<LoginOutcome, LifelineError> {
        let request = LoginRequest::new(email, password);
        Ok(self.tokens.admin_login(&request).await?)
    }

    /// Ends the session, disconnects the channel and clears the store.
    pub fn logout(&self) {
        self.tokens.logout();
    }

    /// Resumes a session left in the store by a previous run.
    pub async fn restore(&self) -> Result<Option<Session>, LifelineError> {
        Ok(self.tokens.restore().await?)
    }

    /// Waits until the persisted credential matches memory.
    pub async fn flush_store(&self) -> Result<(), LifelineError> {
        Ok(self.tokens.store().flush().await?)
    }

    pub async fn refresh_profile(&self) -> Result<Option<Session>, LifelineError> {
        Ok(self.tokens.refresh_profile().await?)
    }

    // -- requests ----------------------------------------------------------

    /// Sends an authenticated request. A request the server still rejects
    /// after a refresh ends the session.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, LifelineError> {
        match self.requests.send(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if e.is_session_terminal() && self.tokens.current_session().is_some() {
                    tracing::info!("request rejected after refresh, ending session");
                    self.tokens.expire();
                }
                Err(e.into())
            }
        }
    }

    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, LifelineError> {
        Ok(self.send(request).await?.json()?)
    }

    // -- realtime ----------------------------------------------------------

    /// Queues a chat message as the current user. `false` if there is no
    /// session or the channel is not authenticated; see
    /// [`deliver_message`](Self::deliver_message) for a confirmed send.
    pub fn send_message(
        &self,
        receiver_id: UserId,
        content: impl Into<String>,
        item_id: Option<String>,
    ) -> bool {
        let Some(session) = self.session() else {
            return false;
        };
        self.channel
            .send_message(session.id, receiver_id, content, item_id)
    }

    /// Sends a chat message and waits until it has been written to the
    /// channel.
    ///
    /// # Errors
    /// [`RealtimeError::NotAuthenticated`] without a session or an
    /// authenticated channel; a send failure if the connection was lost.
    pub async fn deliver_message(
        &self,
        receiver_id: UserId,
        content: impl Into<String>,
        item_id: Option<String>,
    ) -> Result<(), LifelineError> {
        let Some(session) = self.session() else {
            return Err(RealtimeError::NotAuthenticated.into());
        };
        let event = ClientEvent::SendMessage {
            sender_id: session.id,
            receiver_id,
            content: content.into(),
            item_id,
        };
        Ok(self.channel.deliver(event).await?)
    }

    pub fn notify_typing(&self, receiver_id: UserId) -> bool {
        let Some(session) = self.session() else {
            return false;
        };
        self.channel.notify_typing(session.id, receiver_id)
    }

    pub fn mark_read(&self, message_id: MessageId) -> bool {
        self.channel.mark_read(message_id)
    }

    /// Registers a handler for one kind of server push.
    pub fn on(
        &self,
        kind: EventKind,
        handler: impl Fn(&ServerEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.channel.on(kind, handler)
    }

    /// Drops and re-opens the channel with a fresh attempt budget.
    pub fn reset_connection(&self) {
        self.channel.reset();
    }

    // -- observation -------------------------------------------------------

    pub fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.tokens.subscribe()
    }

    pub fn connection_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.channel.lifecycle()
    }

    /// User-facing failure notices from the request layer.
    pub fn notices(&self) -> broadcast::Receiver<String> {
        self.requests.notices()
    }

    // -- components --------------------------------------------------------

    pub fn tokens(&self) -> &Arc<Tokens> {
        &self.tokens
    }

    pub fn channel(&self) -> &RealtimeConnectionManager {
        &self.channel
    }

    pub fn requests(&self) -> &RequestRetryCoordinator<Arc<Tokens>> {
        &self.requests
    }
}

impl Drop for SessionFacade {
    fn drop(&mut self) {
        self.channel.disconnect();
    }
}

