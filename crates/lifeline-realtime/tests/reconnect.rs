//! Backoff and cancellation tests. All run on paused Tokio time, so the
//! recorded dial instants are exact up to timer granularity (1 ms).

use std::time::Duration;

use lifeline_protocol::JsonCodec;
use lifeline_realtime::{
    ConnectionPhase, LifecycleEvent, RealtimeConfig, RealtimeConnectionManager,
    ReconnectPolicy,
};
use lifeline_transport::loopback::{loopback, LoopbackDialer};
use tokio::sync::broadcast;

const ENDPOINT: &str = "loop://primary";

fn spawn(dialer: &LoopbackDialer, config: RealtimeConfig) -> RealtimeConnectionManager {
    RealtimeConnectionManager::spawn(dialer.clone(), JsonCodec, config)
}

async fn wait_for(
    events: &mut broadcast::Receiver<LifecycleEvent>,
    matches: impl Fn(&LifecycleEvent) -> bool,
) -> LifecycleEvent {
    tokio::time::timeout(Duration::from_secs(120), async {
        loop {
            let event = events.recv().await.expect("lifecycle stream closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for lifecycle event")
}

fn gaps_ms(dialer: &LoopbackDialer) -> Vec<f64> {
    dialer
        .dials()
        .windows(2)
        .map(|w| (w[1].at - w[0].at).as_secs_f64() * 1000.0)
        .collect()
}

// =========================================================================
// Backoff sequence
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_connects_follow_backoff_then_give_up() {
    let (dialer, _listener) = loopback();
    dialer.refuse_all(true);
    let manager = spawn(&dialer, RealtimeConfig::with_endpoint(ENDPOINT));
    let mut events = manager.lifecycle();

    manager.connect();
    let gave_up = wait_for(&mut events, |e| matches!(e, LifecycleEvent::GaveUp { .. })).await;

    assert_eq!(gave_up, LifecycleEvent::GaveUp { attempts: 6 });
    assert_eq!(dialer.dial_count(), 6);

    let expected = [1500.0, 2250.0, 3375.0, 5062.5, 7593.75];
    let gaps = gaps_ms(&dialer);
    assert_eq!(gaps.len(), expected.len());
    for (got, want) in gaps.iter().zip(expected) {
        assert!((got - want).abs() <= 2.0, "gap {got}ms, expected {want}ms");
    }
    for pair in gaps.windows(2) {
        assert!(pair[0] <= pair[1], "delays must not decrease: {gaps:?}");
    }

    let status = manager.status();
    assert_eq!(status.phase, ConnectionPhase::Errored);
    assert_eq!(status.attempts, 6);
}

#[tokio::test(start_paused = true)]
async fn test_no_attempt_after_giving_up() {
    let (dialer, _listener) = loopback();
    dialer.refuse_all(true);
    let manager = spawn(&dialer, RealtimeConfig::with_endpoint(ENDPOINT));
    let mut events = manager.lifecycle();

    manager.connect();
    wait_for(&mut events, |e| matches!(e, LifecycleEvent::GaveUp { .. })).await;
    tokio::time::sleep(Duration::from_secs(600)).await;

    assert_eq!(dialer.dial_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_delay_cap_applies_with_more_attempts() {
    let (dialer, _listener) = loopback();
    dialer.refuse_all(true);
    let config = RealtimeConfig {
        policy: ReconnectPolicy {
            max_attempts: 8,
            ..ReconnectPolicy::default()
        },
        ..RealtimeConfig::with_endpoint(ENDPOINT)
    };
    let manager = spawn(&dialer, config);
    let mut events = manager.lifecycle();

    manager.connect();
    wait_for(&mut events, |e| matches!(e, LifecycleEvent::GaveUp { .. })).await;

    let gaps = gaps_ms(&dialer);
    assert_eq!(gaps.len(), 8);
    for got in &gaps[5..] {
        assert!((got - 10_000.0).abs() <= 2.0, "gap {got}ms should be capped");
    }
}

#[tokio::test(start_paused = true)]
async fn test_successful_connect_resets_attempts() {
    let (dialer, mut listener) = loopback();
    dialer.fail_next(2);
    let manager = spawn(&dialer, RealtimeConfig::with_endpoint(ENDPOINT));

    manager.connect();
    let _server = listener.accept().await.unwrap();
    manager.wait_for_phase(ConnectionPhase::Connected).await.unwrap();

    assert_eq!(dialer.dial_count(), 3);
    assert_eq!(manager.status().attempts, 0);
    assert_eq!(manager.status().last_error, None);
}

#[tokio::test(start_paused = true)]
async fn test_reconnection_disabled_stops_after_first_failure() {
    let (dialer, _listener) = loopback();
    dialer.refuse_all(true);
    let config = RealtimeConfig {
        reconnection: false,
        ..RealtimeConfig::with_endpoint(ENDPOINT)
    };
    let manager = spawn(&dialer, config);
    let mut events = manager.lifecycle();

    manager.connect();
    wait_for(&mut events, |e| matches!(e, LifecycleEvent::ConnectFailed { .. })).await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(dialer.dial_count(), 1);
    assert_eq!(manager.phase(), ConnectionPhase::Errored);
}

// =========================================================================
// Cancellation
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_reconnect() {
    let (dialer, _listener) = loopback();
    dialer.refuse_all(true);
    let manager = spawn(&dialer, RealtimeConfig::with_endpoint(ENDPOINT));
    let mut events = manager.lifecycle();

    manager.connect();
    wait_for(&mut events, |e| matches!(e, LifecycleEvent::ReconnectScheduled { .. })).await;
    manager.disconnect();
    manager.wait_for_phase(ConnectionPhase::Disconnected).await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(dialer.dial_count(), 1);
    assert_eq!(manager.phase(), ConnectionPhase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_after_server_close_cancels_reconnect() {
    let (dialer, mut listener) = loopback();
    let manager = spawn(&dialer, RealtimeConfig::with_endpoint(ENDPOINT));
    let mut events = manager.lifecycle();

    manager.connect();
    let server = listener.accept().await.unwrap();
    manager.wait_for_phase(ConnectionPhase::Connected).await.unwrap();
    drop(server);
    wait_for(&mut events, |e| matches!(e, LifecycleEvent::ReconnectScheduled { .. })).await;

    manager.disconnect();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(dialer.dial_count(), 1);
}

// =========================================================================
// Explicit recovery
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_connect_after_giving_up_starts_fresh_cycle() {
    let (dialer, mut listener) = loopback();
    dialer.refuse_all(true);
    let manager = spawn(&dialer, RealtimeConfig::with_endpoint(ENDPOINT));
    let mut events = manager.lifecycle();
    manager.connect();
    wait_for(&mut events, |e| matches!(e, LifecycleEvent::GaveUp { .. })).await;

    dialer.refuse_all(false);
    manager.connect();
    let _server = listener.accept().await.unwrap();
    manager.wait_for_phase(ConnectionPhase::Connected).await.unwrap();

    assert_eq!(dialer.dial_count(), 7);
    assert_eq!(manager.status().attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_reset_clears_attempts_and_reconnects_after_base_delay() {
    let (dialer, mut listener) = loopback();
    dialer.fail_next(1);
    let manager = spawn(&dialer, RealtimeConfig::with_endpoint(ENDPOINT));
    let mut events = manager.lifecycle();

    manager.authenticate("token-1");
    let _first = listener.accept().await.unwrap();
    manager.wait_for_phase(ConnectionPhase::Connected).await.unwrap();
    let connected_at = dialer.dials()[1].at;

    manager.reset();
    wait_for(&mut events, |e| matches!(e, LifecycleEvent::ReconnectScheduled { .. })).await;
    let _second = listener.accept().await.unwrap();

    let dials = dialer.dials();
    assert_eq!(dials.len(), 3);
    let gap = dials[2].at - connected_at;
    assert!(gap >= Duration::from_millis(1000), "reset reconnected after {gap:?}");
    assert_eq!(manager.status().attempts, 0);
}
