//! The token lifecycle manager: the single owner of the credential.
//!
//! ```text
//! login() ─────┐                      ┌──→ Refreshed ──→ listeners
//! admin_login()├─→ [Active] ──tick──→ check_and_refresh()
//! restore() ───┘      │               └──→ Ended(Expired | RefreshFailed)
//!                     ▼
//!                 logout() ──→ Ended(Logout)
//! ```
//!
//! Every path that asks "is the session still good" goes through
//! [`TokenLifecycleManager::check_and_refresh`]: the periodic timer, the
//! HTTP 401 handler and `restore`. Concurrent callers share one in-flight
//! check instead of issuing parallel refresh calls.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use lifeline_protocol::LoginRequest;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::credential::unix_now;
use crate::store::{SESSION_KEY, TOKEN_KEY};
use crate::{
    AuthApi, AuthApiError, Credential, CredentialEvent, CredentialListener,
    CredentialStore, EndReason, LoginKind, Session, SessionConfig,
    SessionError, SessionEvent,
};

/// Capacity of the [`SessionEvent`] broadcast buffer.
const EVENT_BUFFER: usize = 32;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Public result types
// ---------------------------------------------------------------------------

/// Result of a successful [`check_and_refresh`](TokenLifecycleManager::check_and_refresh).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The token is outside the refresh window. Nothing was done.
    Valid,
    /// The token was inside the refresh window and has been replaced.
    Refreshed,
}

/// A recoverable problem encountered during an otherwise successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginWarning {
    /// The profile endpoint failed; the session uses a derived display name.
    ProfileUnavailable { reason: String },
}

/// What a successful login returns.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub session: Session,
    pub warnings: Vec<LoginWarning>,
}

/// Read access to the credential plus the shared freshness check.
///
/// This is the narrow view the request layer gets: it can stamp requests
/// and ask for a refresh, nothing more.
pub trait CredentialAuthority: Send + Sync + 'static {
    /// The current, unexpired bearer token.
    fn bearer(&self) -> Option<String>;

    /// Runs (or joins) the freshness check.
    fn check_and_refresh(
        &self,
    ) -> impl Future<Output = Result<Freshness, SessionError>> + Send;
}

impl<T: CredentialAuthority> CredentialAuthority for Arc<T> {
    fn bearer(&self) -> Option<String> {
        (**self).bearer()
    }

    fn check_and_refresh(
        &self,
    ) -> impl Future<Output = Result<Freshness, SessionError>> + Send {
        (**self).check_and_refresh()
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// Outcome of one check, cloneable so followers can share it.
#[derive(Debug, Clone)]
enum Settled {
    Valid,
    Refreshed,
    NoSession,
    Expired,
    RefreshFailed(String),
}

impl Settled {
    fn into_result(self) -> Result<Freshness, SessionError> {
        match self {
            Self::Valid => Ok(Freshness::Valid),
            Self::Refreshed => Ok(Freshness::Refreshed),
            Self::NoSession => Err(SessionError::NoSession),
            Self::Expired => Err(SessionError::SessionExpired),
            Self::RefreshFailed(reason) => Err(SessionError::RefreshFailed(reason)),
        }
    }
}

enum Flight {
    Leader(watch::Sender<Option<Settled>>),
    Follower(watch::Receiver<Option<Settled>>),
}

/// Clears the in-flight slot when the leading check finishes or is dropped.
struct FlightGuard<'a>(&'a Mutex<Option<watch::Receiver<Option<Settled>>>>);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.0).take();
    }
}

#[derive(Default)]
struct Inner {
    credential: Option<Arc<Credential>>,
    session: Option<Session>,
    kind: LoginKind,
    profile_failures: u32,
}

type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

// ---------------------------------------------------------------------------
// TokenLifecycleManager
// ---------------------------------------------------------------------------

/// Owns the credential, the derived session and the periodic check.
///
/// Construct one per process (or per test), wrap it in an `Arc`, and hand
/// clones to the consumers that need it. Operations that start the
/// periodic check take `self: &Arc<Self>` because the timer task holds a
/// weak reference back to the manager.
pub struct TokenLifecycleManager<A, S> {
    api: A,
    store: S,
    config: SessionConfig,
    clock: Clock,
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<Arc<dyn CredentialListener>>>,
    events: broadcast::Sender<SessionEvent>,
    in_flight: Mutex<Option<watch::Receiver<Option<Settled>>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl<A: AuthApi, S: CredentialStore> TokenLifecycleManager<A, S> {
    pub fn new(api: A, store: S, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            api,
            store,
            config,
            clock: Arc::new(unix_now),
            inner: Mutex::new(Inner::default()),
            listeners: Mutex::new(Vec::new()),
            events,
            in_flight: Mutex::new(None),
            timer: Mutex::new(None),
        }
    }

    /// Replaces the wall clock (seconds since the Unix epoch) used for
    /// expiry decisions.
    pub fn with_clock(
        mut self,
        clock: impl Fn() -> u64 + Send + Sync + 'static,
    ) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The issuing/refresh API this manager calls.
    pub fn api(&self) -> &A {
        &self.api
    }

    /// The store the credential is persisted to.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn now(&self) -> u64 {
        (self.clock)()
    }

    // -- observation -------------------------------------------------------

    /// Registers a listener for credential changes.
    pub fn add_listener(&self, listener: Arc<dyn CredentialListener>) {
        lock(&self.listeners).push(listener);
    }

    /// Subscribes to lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The current session, if any.
    pub fn current_session(&self) -> Option<Session> {
        lock(&self.inner).session.clone()
    }

    /// The current credential. An expired credential reads as `None`.
    pub fn current_credential(&self) -> Option<Arc<Credential>> {
        let now = self.now();
        lock(&self.inner)
            .credential
            .clone()
            .filter(|c| !c.is_expired_at(now))
    }

    pub fn is_authenticated(&self) -> bool {
        self.current_credential().is_some()
    }

    /// The endpoint family of the current session.
    pub fn login_kind(&self) -> Option<LoginKind> {
        let inner = lock(&self.inner);
        inner.credential.as_ref().map(|_| inner.kind)
    }

    fn notify(&self, event: CredentialEvent) {
        let listeners = lock(&self.listeners).clone();
        for listener in listeners {
            listener.on_credential_event(&event);
        }
    }

    fn publish(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    // -- persistence -------------------------------------------------------

    fn persist(&self, credential: &Credential, session: &Session) -> Result<(), SessionError> {
        let json = serde_json::to_string(session).map_err(crate::StoreError::from)?;
        self.store.set(TOKEN_KEY, credential.bearer())?;
        self.store.set(SESSION_KEY, &json)?;
        Ok(())
    }

    fn clear_store(&self) {
        for key in [TOKEN_KEY, SESSION_KEY] {
            if let Err(e) = self.store.remove(key) {
                tracing::warn!(key, error = %e, "failed to clear credential store");
            }
        }
    }

    // -- set / clear -------------------------------------------------------

    /// Stores (`Some`) or clears (`None`) the credential.
    ///
    /// Setting a token for the current subject behaves like a refresh;
    /// setting a token for anyone else starts a new session with a derived
    /// display name and starts the periodic check. Clearing ends the
    /// session. Both directions are idempotent.
    ///
    /// An already-expired token is never installed: it ends any current
    /// session as [`EndReason::Expired`] and nothing is stored.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    /// [`SessionError::MalformedToken`] for an unparseable token,
    /// [`SessionError::SessionExpired`] for an expired one, or a store
    /// failure.
    pub fn set_credential(self: &Arc<Self>, raw: Option<&str>) -> Result<(), SessionError> {
        let Some(raw) = raw else {
            if lock(&self.inner).credential.is_some() {
                self.end_session(EndReason::Logout);
            }
            return Ok(());
        };

        let credential = Arc::new(Credential::parse(raw)?);
        if credential.is_expired_at(self.now()) {
            tracing::info!(sub = %credential.subject(), "refusing expired token");
            if lock(&self.inner).credential.is_some() {
                self.end_session(EndReason::Expired);
            }
            return Err(SessionError::SessionExpired);
        }
        let (session, kind, same_subject) = {
            let inner = lock(&self.inner);
            if inner
                .credential
                .as_ref()
                .is_some_and(|c| c.bearer() == credential.bearer())
            {
                return Ok(());
            }
            match &inner.session {
                Some(existing) if existing.id == credential.subject() => {
                    let mut session = existing.clone();
                    session.rebind(&credential);
                    (session, inner.kind, true)
                }
                _ => {
                    let subject = credential.subject();
                    let session =
                        Session::derive(&credential, LoginKind::User, subject.as_str());
                    (session, LoginKind::User, false)
                }
            }
        };

        self.persist(&credential, &session)?;
        {
            let mut inner = lock(&self.inner);
            inner.credential = Some(credential.clone());
            inner.session = Some(session.clone());
            inner.kind = kind;
            if !same_subject {
                inner.profile_failures = 0;
            }
        }

        if same_subject {
            self.notify(CredentialEvent::Refreshed { credential, kind });
        } else {
            self.start_periodic_check();
            self.notify(CredentialEvent::Established { credential, kind });
        }
        Ok(())
    }

    /// Clears credential and session, stops the timer, tells everyone.
    fn end_session(&self, reason: EndReason) {
        let had_session = {
            let mut inner = lock(&self.inner);
            let had = inner.credential.is_some();
            *inner = Inner::default();
            had
        };
        self.clear_store();
        self.stop_periodic_check();

        if had_session {
            tracing::info!(?reason, "session ended");
        }
        self.notify(CredentialEvent::Ended(reason));
        if had_session {
            self.publish(SessionEvent::Ended(reason));
        }
    }

    // -- check_and_refresh -------------------------------------------------

    /// Decides whether the current token is still good, refreshing it when
    /// it is close to expiry.
    ///
    /// - expired: the session is cleared, [`SessionError::SessionExpired`]
    /// - more than `refresh_window` left: [`Freshness::Valid`], no call
    /// - otherwise: one refresh call. On success the new token (same
    ///   subject, strictly later expiry) is stored and listeners are told;
    ///   on failure the session is cleared, [`SessionError::RefreshFailed`]
    ///
    /// A caller arriving while a check is in flight waits for that check
    /// and gets its result.
    pub async fn check_and_refresh(&self) -> Result<Freshness, SessionError> {
        loop {
            let flight = {
                let mut slot = lock(&self.in_flight);
                match slot.as_ref() {
                    Some(rx) => Flight::Follower(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        *slot = Some(rx);
                        Flight::Leader(tx)
                    }
                }
            };

            match flight {
                Flight::Leader(tx) => {
                    let _guard = FlightGuard(&self.in_flight);
                    let settled = self.run_check().await;
                    tx.send_replace(Some(settled.clone()));
                    return settled.into_result();
                }
                Flight::Follower(mut rx) => {
                    let shared = rx
                        .wait_for(Option::is_some)
                        .await
                        .ok()
                        .and_then(|settled| settled.clone());
                    match shared {
                        Some(settled) => return settled.into_result(),
                        // The leader was cancelled before it settled.
                        None => continue,
                    }
                }
            }
        }
    }

    async fn run_check(&self) -> Settled {
        let Some(current) = lock(&self.inner).credential.clone() else {
            return Settled::NoSession;
        };

        let now = self.now();
        if current.is_expired_at(now) {
            tracing::info!(sub = %current.subject(), "token expired");
            self.end_session(EndReason::Expired);
            return Settled::Expired;
        }

        let remaining = current.seconds_remaining(now);
        if remaining > self.config.refresh_window.as_secs() as i64 {
            return Settled::Valid;
        }

        tracing::info!(sub = %current.subject(), remaining, "token inside refresh window, refreshing");
        let result = self.api.refresh(current.bearer()).await;

        if !self.still_current(&current) {
            tracing::debug!("credential changed during refresh, discarding result");
            return match lock(&self.inner).credential {
                Some(_) => Settled::Valid,
                None => Settled::NoSession,
            };
        }

        let refreshed = result
            .map_err(|e| e.to_string())
            .and_then(|response| {
                Credential::parse(&response.access_token).map_err(|e| e.to_string())
            })
            .and_then(|fresh| {
                if fresh.subject() != current.subject() {
                    Err("refreshed token names a different subject".to_string())
                } else if fresh.expires_at() <= current.expires_at() {
                    Err("refreshed token does not extend expiry".to_string())
                } else {
                    Ok(Arc::new(fresh))
                }
            });

        match refreshed {
            Ok(fresh) => {
                self.install_refreshed(fresh);
                Settled::Refreshed
            }
            Err(reason) => {
                tracing::warn!(%reason, "token refresh failed");
                self.end_session(EndReason::RefreshFailed);
                Settled::RefreshFailed(reason)
            }
        }
    }

    fn still_current(&self, credential: &Arc<Credential>) -> bool {
        lock(&self.inner)
            .credential
            .as_ref()
            .is_some_and(|c| Arc::ptr_eq(c, credential))
    }

    fn install_refreshed(&self, fresh: Arc<Credential>) {
        let (session, kind) = {
            let mut inner = lock(&self.inner);
            inner.credential = Some(fresh.clone());
            if let Some(session) = inner.session.as_mut() {
                session.rebind(&fresh);
            }
            (inner.session.clone(), inner.kind)
        };

        if let Some(session) = &session {
            // The refreshed token lives in memory either way.
            if let Err(e) = self.persist(&fresh, session) {
                tracing::warn!(error = %e, "failed to persist refreshed token");
            }
        }

        tracing::info!(sub = %fresh.subject(), expires_at = fresh.expires_at(), "token refreshed");
        self.notify(CredentialEvent::Refreshed {
            credential: fresh.clone(),
            kind,
        });
        self.publish(SessionEvent::Refreshed {
            user_id: fresh.subject(),
            expires_at: fresh.expires_at(),
        });
    }

    // -- periodic check ----------------------------------------------------

    fn start_periodic_check(self: &Arc<Self>) {
        let period = self.config.check_interval;
        let manager: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if let Err(e) = manager.check_and_refresh().await {
                    tracing::debug!(error = %e, "periodic check stopped");
                    break;
                }
            }
        });

        if let Some(previous) = lock(&self.timer).replace(handle) {
            previous.abort();
        }
    }

    fn stop_periodic_check(&self) {
        if let Some(handle) = lock(&self.timer).take() {
            handle.abort();
        }
    }

    /// Whether the periodic check task is running.
    pub fn is_checking(&self) -> bool {
        lock(&self.timer).as_ref().is_some_and(|h| !h.is_finished())
    }

    // -- login / logout ----------------------------------------------------

    /// Logs in at the user endpoint.
    ///
    /// On success the credential and session are stored, the periodic check
    /// starts and listeners hear [`CredentialEvent::Established`] before
    /// this returns. A profile fetch failure is reported as a
    /// [`LoginWarning`], not an error.
    ///
    /// # Errors
    /// [`SessionError::InvalidCredentials`] if the endpoint rejects the
    /// pair; API, token and store failures otherwise.
    pub async fn login(
        self: &Arc<Self>,
        request: &LoginRequest,
    ) -> Result<LoginOutcome, SessionError> {
        self.sign_in(LoginKind::User, request).await
    }

    /// Logs in at the admin endpoint.
    ///
    /// Same as [`login`](Self::login) except that the fallback display name
    /// is the full email and listeners see [`LoginKind::Admin`].
    pub async fn admin_login(
        self: &Arc<Self>,
        request: &LoginRequest,
    ) -> Result<LoginOutcome, SessionError> {
        self.sign_in(LoginKind::Admin, request).await
    }

    async fn sign_in(
        self: &Arc<Self>,
        kind: LoginKind,
        request: &LoginRequest,
    ) -> Result<LoginOutcome, SessionError> {
        let response = self.api.login(kind, request).await.map_err(|e| match e {
            AuthApiError::Rejected { message, .. } => SessionError::InvalidCredentials(
                message.unwrap_or_else(|| "invalid email or password".into()),
            ),
            other => SessionError::Api(other),
        })?;

        let credential = Arc::new(Credential::parse(&response.access_token)?);
        if credential.is_expired_at(self.now()) {
            return Err(SessionError::SessionExpired);
        }

        let fallback = match kind {
            LoginKind::User => request.email_local_part(),
            LoginKind::Admin => request.email.as_str(),
        };
        let mut session = Session::derive(&credential, kind, fallback);
        let mut warnings = Vec::new();

        match self.api.profile(kind, credential.bearer()).await {
            Ok(profile) => {
                if !session.merge_profile(&profile) {
                    tracing::warn!(sub = %session.id, "profile belongs to another user, ignored");
                    warnings.push(LoginWarning::ProfileUnavailable {
                        reason: "profile does not match the token subject".into(),
                    });
                }
            }
            Err(e) => {
                tracing::warn!(sub = %session.id, error = %e, "profile unavailable, using derived name");
                warnings.push(LoginWarning::ProfileUnavailable {
                    reason: e.to_string(),
                });
            }
        }

        self.persist(&credential, &session)?;
        {
            let mut inner = lock(&self.inner);
            inner.credential = Some(credential.clone());
            inner.session = Some(session.clone());
            inner.kind = kind;
            inner.profile_failures = 0;
        }
        self.start_periodic_check();

        tracing::info!(user_id = %session.id, ?kind, "logged in");
        self.notify(CredentialEvent::Established { credential, kind });
        self.publish(SessionEvent::LoggedIn {
            user_id: session.id.clone(),
            kind,
        });

        Ok(LoginOutcome { session, warnings })
    }

    /// Ends the session. Always succeeds, also when there is none.
    pub fn logout(&self) {
        self.end_session(EndReason::Logout);
    }

    /// Ends the session because the server stopped accepting it (a 401
    /// that survived a refresh, or a takeover by another login).
    pub fn expire(&self) {
        self.end_session(EndReason::Expired);
    }

    // -- restore -----------------------------------------------------------

    /// Resumes a session persisted by a previous process.
    ///
    /// Returns `Ok(None)` when the store is empty, holds garbage, or holds a
    /// token that turns out to be expired or unrefreshable.
    pub async fn restore(self: &Arc<Self>) -> Result<Option<Session>, SessionError> {
        let Some(raw) = self.store.get(TOKEN_KEY)? else {
            return Ok(None);
        };
        let credential = match Credential::parse(&raw) {
            Ok(credential) => Arc::new(credential),
            Err(e) => {
                tracing::warn!(error = %e, "discarding malformed stored token");
                self.clear_store();
                return Ok(None);
            }
        };

        let stored = self
            .store
            .get(SESSION_KEY)?
            .and_then(|json| serde_json::from_str::<Session>(&json).ok())
            .filter(|s| s.id == credential.subject());
        let kind = stored.as_ref().map(|s| s.kind).unwrap_or_default();
        let mut session = stored.unwrap_or_else(|| {
            let subject = credential.subject();
            Session::derive(&credential, kind, subject.as_str())
        });
        session.rebind(&credential);

        {
            let mut inner = lock(&self.inner);
            inner.credential = Some(credential);
            inner.session = Some(session);
            inner.kind = kind;
            inner.profile_failures = 0;
        }

        match self.check_and_refresh().await {
            Ok(_) => {}
            Err(e) if e.is_session_terminal() => {
                tracing::info!(error = %e, "stored session could not be resumed");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        if let Err(e) = self.refresh_profile().await {
            tracing::debug!(error = %e, "profile refresh after restore failed");
        }

        let Some(credential) = lock(&self.inner).credential.clone() else {
            return Ok(None);
        };
        self.start_periodic_check();

        tracing::info!(user_id = %credential.subject(), "session restored");
        self.notify(CredentialEvent::Established { credential: credential.clone(), kind });
        self.publish(SessionEvent::Restored {
            user_id: credential.subject(),
        });
        Ok(self.current_session())
    }

    // -- profile -----------------------------------------------------------

    /// Re-fetches the profile and merges it into the session.
    ///
    /// After `profile_refresh_attempts` consecutive failures (a 404 counts
    /// as all of them) the endpoint is no longer called and `Ok(None)` is
    /// returned until the next login.
    ///
    /// # Errors
    /// [`SessionError::NoSession`] without a session; the API error of a
    /// failed fetch.
    pub async fn refresh_profile(&self) -> Result<Option<Session>, SessionError> {
        let (credential, kind, failures) = {
            let inner = lock(&self.inner);
            let Some(credential) = inner.credential.clone() else {
                return Err(SessionError::NoSession);
            };
            (credential, inner.kind, inner.profile_failures)
        };
        let cap = self.config.profile_refresh_attempts;
        if failures >= cap {
            tracing::debug!(failures, "profile refresh disabled after repeated failures");
            return Ok(None);
        }

        let result = self.api.profile(kind, credential.bearer()).await;
        if !self.still_current(&credential) {
            return Ok(None);
        }

        let profile = match result {
            Ok(profile) => profile,
            Err(e) => {
                let mut inner = lock(&self.inner);
                inner.profile_failures = match e {
                    AuthApiError::NotFound => cap,
                    _ => inner.profile_failures + 1,
                };
                tracing::warn!(attempt = inner.profile_failures, error = %e, "profile refresh failed");
                return Err(e.into());
            }
        };

        let session = {
            let mut inner = lock(&self.inner);
            inner.profile_failures = 0;
            let Some(session) = inner.session.as_mut() else {
                return Ok(None);
            };
            if !session.merge_profile(&profile) {
                tracing::warn!(sub = %session.id, "profile belongs to another user, ignored");
                return Ok(None);
            }
            session.clone()
        };

        if let Err(e) = self.persist(&credential, &session) {
            tracing::warn!(error = %e, "failed to persist refreshed profile");
        }
        self.publish(SessionEvent::ProfileUpdated {
            user_id: session.id.clone(),
        });
        Ok(Some(session))
    }
}

impl<A: AuthApi, S: CredentialStore> CredentialAuthority for TokenLifecycleManager<A, S> {
    fn bearer(&self) -> Option<String> {
        self.current_credential().map(|c| c.bearer().to_string())
    }

    fn check_and_refresh(
        &self,
    ) -> impl Future<Output = Result<Freshness, SessionError>> + Send {
        TokenLifecycleManager::check_and_refresh(self)
    }
}

impl<A, S> Drop for TokenLifecycleManager<A, S> {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.timer).take() {
            handle.abort();
        }
    }
}
