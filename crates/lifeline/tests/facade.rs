//! End-to-end tests: the facade against a wiremock REST server and a
//! loopback realtime server.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use lifeline::prelude::*;
use lifeline::session::{CredentialStore, FileStore, SessionError, TOKEN_KEY, unix_now};
use lifeline::transport::loopback::{
    LoopbackConnection, LoopbackDialer, LoopbackListener, loopback,
};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// =========================================================================
// Helpers
// =========================================================================

const ENDPOINT: &str = "loop://socket";

fn token(sub: &str, exp: u64, role: Option<&str>) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let mut claims = json!({ "sub": sub, "exp": exp });
    if let Some(role) = role {
        claims["role"] = json!(role);
    }
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("timed out")
}

struct Stack {
    rest: MockServer,
    dialer: LoopbackDialer,
    listener: LoopbackListener,
    facade: SessionFacade,
}

async fn stack_with(builder: LifelineBuilder) -> Stack {
    let rest = MockServer::start().await;
    let (dialer, listener) = loopback();
    let facade = builder
        .base_url(rest.uri())
        .realtime_endpoint(ENDPOINT)
        .build_with_dialer(dialer.clone())
        .expect("facade should build");
    Stack {
        rest,
        dialer,
        listener,
        facade,
    }
}

async fn stack() -> Stack {
    stack_with(LifelineBuilder::new()).await
}

async fn mock_login(rest: &MockServer, endpoint: &str, token: &str) {
    Mock::given(method("POST"))
        .and(path(endpoint))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": token })))
        .mount(rest)
        .await;
}

async fn mock_profile(rest: &MockServer, endpoint: &str, profile: Value) {
    Mock::given(method("GET"))
        .and(path(endpoint))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile))
        .mount(rest)
        .await;
}

async fn next_frame(server: &LoopbackConnection) -> Value {
    let text = within(server.recv_text())
        .await
        .expect("recv failed")
        .expect("client closed");
    serde_json::from_str(&text).expect("client sent invalid json")
}

async fn push(server: &LoopbackConnection, frame: Value) {
    server.send_text(&frame.to_string()).await.expect("push failed");
}

/// Logs in as `u1`, answers the channel handshake and waits until the
/// channel is authenticated.
async fn logged_in(stack: &mut Stack) -> (String, LoopbackConnection) {
    let bearer = token("u1", unix_now() + 3600, None);
    mock_login(&stack.rest, "/api/users/login", &bearer).await;
    mock_profile(&stack.rest, "/api/users/me", json!({ "id": "u1", "username": "Alice" })).await;

    stack.facade.login("alice@example.com", "pw").await.unwrap();

    let server = within(stack.listener.accept()).await.expect("no dial");
    let frame = next_frame(&server).await;
    assert_eq!(frame["event"], "authenticate");
    assert_eq!(frame["data"]["token"], bearer.as_str());
    push(
        &server,
        json!({ "event": "authenticated", "data": { "user_id": "u1", "username": "Alice" } }),
    )
    .await;
    within(stack.facade.channel().wait_for_phase(ConnectionPhase::Authenticated))
        .await
        .unwrap();
    (bearer, server)
}

async fn next_end(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> EndReason {
    within(async {
        loop {
            if let SessionEvent::Ended(reason) = events.recv().await.expect("events closed") {
                return reason;
            }
        }
    })
    .await
}

// =========================================================================
// Login / logout
// =========================================================================

#[tokio::test]
async fn test_login_opens_and_authenticates_channel() {
    let mut stack = stack().await;
    logged_in(&mut stack).await;

    let state = stack.facade.state();
    assert!(state.authenticated);
    assert_eq!(state.kind, Some(LoginKind::User));
    assert_eq!(state.session.unwrap().display_name, "Alice");
    assert_eq!(state.connection.phase, ConnectionPhase::Authenticated);
    assert_eq!(state.connection.username.as_deref(), Some("Alice"));
}

#[tokio::test]
async fn test_login_profile_failure_is_a_warning() {
    let stack = stack().await;
    mock_login(&stack.rest, "/api/users/login", &token("u1", unix_now() + 3600, None)).await;
    Mock::given(method("GET"))
        .and(path("/api/users/me"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&stack.rest)
        .await;

    let outcome = stack.facade.login("alice@example.com", "pw").await.unwrap();

    assert_eq!(outcome.session.display_name, "alice");
    assert!(matches!(
        outcome.warnings.as_slice(),
        [LoginWarning::ProfileUnavailable { .. }]
    ));
}

#[tokio::test]
async fn test_login_rejected_is_invalid_credentials() {
    let stack = stack().await;
    Mock::given(method("POST"))
        .and(path("/api/users/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "msg": "wrong password" })))
        .mount(&stack.rest)
        .await;

    let err = stack.facade.login("alice@example.com", "bad").await.unwrap_err();

    match err {
        LifelineError::Session(SessionError::InvalidCredentials(message)) => {
            assert_eq!(message, "wrong password");
        }
        other => panic!("expected invalid credentials, got {other:?}"),
    }
    assert!(!stack.facade.is_authenticated());
    assert_eq!(stack.dialer.dial_count(), 0);
}

#[tokio::test]
async fn test_admin_login_skips_channel() {
    let stack = stack().await;
    mock_login(&stack.rest, "/api/admin/login", &token("a1", unix_now() + 3600, None)).await;
    mock_profile(&stack.rest, "/api/admin/me", json!({ "id": "a1" })).await;

    let outcome = stack.facade.admin_login("root@example.com", "pw").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(outcome.session.display_name, "root@example.com");
    assert!(stack.facade.is_admin());
    assert_eq!(stack.dialer.dial_count(), 0);
}

#[tokio::test]
async fn test_logout_disconnects_channel() {
    let mut stack = stack().await;
    let (_, server) = logged_in(&mut stack).await;

    stack.facade.logout();

    within(stack.facade.channel().wait_for_phase(ConnectionPhase::Disconnected))
        .await
        .unwrap();
    assert_eq!(within(server.recv_text()).await.unwrap(), None);
    assert!(stack.facade.session().is_none());
}

// =========================================================================
// Forced logout
// =========================================================================

#[tokio::test]
async fn test_request_rejected_after_refresh_ends_session() {
    let mut stack = stack().await;
    logged_in(&mut stack).await;
    Mock::given(method("GET"))
        .and(path("/api/users/favorites"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&stack.rest)
        .await;
    let mut events = stack.facade.session_events();

    let err = stack
        .facade
        .send(ApiRequest::get("/api/users/favorites"))
        .await
        .unwrap_err();

    assert!(err.is_session_terminal());
    assert_eq!(next_end(&mut events).await, EndReason::Expired);
    assert!(!stack.facade.is_authenticated());
    within(stack.facade.channel().wait_for_phase(ConnectionPhase::Disconnected))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_server_takeover_push_ends_session() {
    let mut stack = stack().await;
    let (_, server) = logged_in(&mut stack).await;
    let mut events = stack.facade.session_events();

    push(
        &server,
        json!({ "event": "session_expired", "data": { "message": "logged in elsewhere" } }),
    )
    .await;

    assert_eq!(next_end(&mut events).await, EndReason::Expired);
    assert!(stack.facade.session().is_none());
}

#[tokio::test]
async fn test_channel_auth_error_does_not_log_out() {
    let mut stack = stack().await;
    let bearer = token("u1", unix_now() + 3600, None);
    mock_login(&stack.rest, "/api/users/login", &bearer).await;
    mock_profile(&stack.rest, "/api/users/me", json!({ "id": "u1" })).await;
    stack.facade.login("alice@example.com", "pw").await.unwrap();

    let server = within(stack.listener.accept()).await.unwrap();
    next_frame(&server).await;
    push(
        &server,
        json!({ "event": "authentication_error", "data": { "message": "bad token" } }),
    )
    .await;
    let mut status = stack.facade.channel().watch_status();
    within(status.wait_for(|s| s.last_error.is_some())).await.unwrap();

    assert_eq!(stack.facade.channel().phase(), ConnectionPhase::Connected);
    assert!(stack.facade.is_authenticated());
}

// =========================================================================
// Requests and realtime traffic
// =========================================================================

#[tokio::test]
async fn test_send_json_carries_bearer() {
    let mut stack = stack().await;
    let (bearer, _server) = logged_in(&mut stack).await;
    Mock::given(method("GET"))
        .and(path("/api/users/favorites"))
        .and(wiremock::matchers::header(
            "authorization",
            format!("Bearer {bearer}").as_str(),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 3 }])))
        .expect(1)
        .mount(&stack.rest)
        .await;

    let favorites: Vec<Value> = stack
        .facade
        .send_json(ApiRequest::get("/api/users/favorites"))
        .await
        .unwrap();

    assert_eq!(favorites.len(), 1);
}

#[tokio::test]
async fn test_send_message_uses_session_identity() {
    let mut stack = stack().await;
    let (_, server) = logged_in(&mut stack).await;

    assert!(stack.facade.send_message(UserId::new("u2"), "is it still available?", None));

    let frame = next_frame(&server).await;
    assert_eq!(frame["event"], "send_message");
    assert_eq!(frame["data"]["sender_id"], "u1");
    assert_eq!(frame["data"]["receiver_id"], "u2");
}

#[tokio::test]
async fn test_deliver_message_confirms_write() {
    let mut stack = stack().await;
    let (_, server) = logged_in(&mut stack).await;

    within(stack.facade.deliver_message(UserId::new("u2"), "still there?", None))
        .await
        .unwrap();

    let frame = next_frame(&server).await;
    assert_eq!(frame["event"], "send_message");
    assert_eq!(frame["data"]["sender_id"], "u1");
}

#[tokio::test]
async fn test_deliver_message_without_session_is_an_error() {
    let stack = stack().await;

    let err = stack
        .facade
        .deliver_message(UserId::new("u2"), "hi", None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LifelineError::Realtime(lifeline::realtime::RealtimeError::NotAuthenticated)
    ));
}

#[tokio::test]
async fn test_send_message_without_session_is_refused() {
    let stack = stack().await;
    assert!(!stack.facade.send_message(UserId::new("u2"), "hi", None));
    assert!(!stack.facade.notify_typing(UserId::new("u2")));
}

// =========================================================================
// Restore
// =========================================================================

#[tokio::test]
async fn test_restore_resumes_stored_session_and_connects() {
    let dir = std::env::temp_dir().join(format!("lifeline-facade-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let file = dir.join("session.json");
    let bearer = token("u7", unix_now() + 3600, None);
    let seed = FileStore::open(&file).unwrap();
    seed.set(TOKEN_KEY, &bearer).unwrap();
    seed.flush().await.unwrap();
    drop(seed);

    let mut stack = stack_with(LifelineBuilder::new().file_store(&file)).await;
    mock_profile(&stack.rest, "/api/users/me", json!({ "id": "u7", "username": "Grace" })).await;

    let session = stack.facade.restore().await.unwrap().expect("session restored");

    assert_eq!(session.id, UserId::new("u7"));
    assert_eq!(session.display_name, "Grace");
    let server = within(stack.listener.accept()).await.unwrap();
    let frame = next_frame(&server).await;
    assert_eq!(frame["data"]["token"], bearer.as_str());

    stack.facade.flush_store().await.unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_restore_with_empty_store_returns_none() {
    let stack = stack().await;
    assert!(stack.facade.restore().await.unwrap().is_none());
    assert_eq!(stack.dialer.dial_count(), 0);
}
