use std::time::Duration;

use rpc_resilience_reconnect::{ConnectionState, ReconnectState, ReconnectingEndpoint};
use tokio::time::Instant;

use super::{INTERVAL, connected};
use crate::common::{Control, MockEndpoint};

#[tokio::test(start_paused = true)]
async fn state_tracks_connection_lifecycle() {
    let control = Control::new();
    let endpoint = connected(&control).await;

    let state = endpoint.state().clone();
    assert_eq!(state.state(), ConnectionState::Connected);
    assert_eq!(state.generation(), 1);
    assert_eq!(state.attempts(), 0);
    assert!(state.last_error().is_none());
    assert!(endpoint.is_connected());
    assert_eq!(endpoint.generation(), 1);

    control.sever();
    control.connect_by_default(false);
    let _ = endpoint.call(1).await;

    assert_eq!(state.state(), ConnectionState::Recovering);
    assert!(state.is_disconnected());
    assert!(endpoint.is_disconnected());
    assert_eq!(endpoint.connection_state(), ConnectionState::Recovering);
    assert_eq!(state.attempts(), 3);
    assert!(state.last_error().is_some());

    // Background attempts keep counting
    tokio::time::sleep(INTERVAL * 2 + Duration::from_millis(1)).await;
    assert_eq!(state.attempts(), 5);

    control.connect_by_default(true);
    endpoint.wait_connected().await.unwrap();
    assert_eq!(state.state(), ConnectionState::Connected);
    assert_eq!(state.generation(), 2);
    assert_eq!(state.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn time_since_connected_advances() {
    let control = Control::new();
    let endpoint = connected(&control).await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    let since = endpoint.state().time_since_connected().unwrap();
    assert!(since >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn calls_fail_fast_during_bounded_attempts() {
    let control = Control::new();
    let endpoint = connected(&control).await;

    control.sever();
    control.script(&[false, true]);

    let caller = {
        let endpoint = endpoint.clone();
        tokio::spawn(async move { endpoint.call(1).await })
    };

    // First attempt failed, sleeping before the second
    tokio::time::sleep(INTERVAL / 2).await;
    assert_eq!(endpoint.connection_state(), ConnectionState::Connecting);
    assert!(endpoint.call(2).await.unwrap_err().is_unavailable());

    assert_eq!(caller.await.unwrap().unwrap().client, 2);
    assert_eq!(endpoint.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn shutdown_is_terminal() {
    let control = Control::new();
    let endpoint = connected(&control).await;

    endpoint.shutdown();
    assert_eq!(endpoint.connection_state(), ConnectionState::Closed);
    assert!(endpoint.call(1).await.unwrap_err().is_unavailable());

    let call = endpoint.go_call(2, None).wait().await.unwrap();
    assert!(call.error().unwrap().is_unavailable());
    assert!(endpoint.wait_connected().await.is_err());
    assert_eq!(control.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_bounded_retry_sleep() {
    let control = Control::new();
    let endpoint = connected(&control).await;

    control.connect_by_default(false);
    control.sever();
    let start = Instant::now();
    let caller = {
        let endpoint = endpoint.clone();
        tokio::spawn(async move { endpoint.call(1).await })
    };

    // First attempt failed, sleeping before the second
    tokio::time::sleep(INTERVAL / 10).await;
    assert_eq!(control.dials(), 2);
    assert_eq!(endpoint.connection_state(), ConnectionState::Connecting);

    endpoint.shutdown();
    assert!(caller.await.unwrap().unwrap_err().is_unavailable());
    assert!(start.elapsed() < INTERVAL);
    assert_eq!(control.dials(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_bounded_dial() {
    let control = Control::new();
    let endpoint = connected(&control).await;

    control.set_connect_delay(INTERVAL * 10);
    control.sever();
    let start = Instant::now();
    let caller = {
        let endpoint = endpoint.clone();
        tokio::spawn(async move { endpoint.call(1).await })
    };

    tokio::time::sleep(INTERVAL / 10).await;
    assert_eq!(control.dials(), 2);

    endpoint.shutdown();
    assert!(caller.await.unwrap().unwrap_err().is_unavailable());
    assert!(start.elapsed() < INTERVAL);
    assert_eq!(control.installs(), 1);
    assert_eq!(endpoint.connection_state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_background_recovery() {
    let control = Control::scripted(&[]);
    let endpoint = ReconnectingEndpoint::wrap(MockEndpoint::new(&control), INTERVAL)
        .await
        .unwrap_err()
        .into_endpoint();

    tokio::time::sleep(INTERVAL * 3 + Duration::from_millis(1)).await;
    let dials = control.dials();
    assert_eq!(dials, 6);

    endpoint.shutdown();
    tokio::time::sleep(INTERVAL * 10).await;
    assert_eq!(control.dials(), dials);
    assert_eq!(endpoint.state().state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_endpoint_cancels_background_recovery() {
    let control = Control::scripted(&[]);
    let error = ReconnectingEndpoint::wrap(MockEndpoint::new(&control), INTERVAL)
        .await
        .unwrap_err();
    let state = error.endpoint().state().clone();

    drop(error);
    tokio::time::sleep(INTERVAL * 10).await;

    assert_eq!(control.dials(), 3);
    assert!(state.is_closed());
}

#[tokio::test(start_paused = true)]
async fn waiters_are_released_on_shutdown() {
    let control = Control::scripted(&[]);
    let endpoint = ReconnectingEndpoint::wrap(MockEndpoint::new(&control), INTERVAL)
        .await
        .unwrap_err()
        .into_endpoint();

    let waiter = {
        let endpoint = endpoint.clone();
        tokio::spawn(async move { endpoint.wait_connected().await })
    };
    tokio::time::sleep(INTERVAL).await;
    assert!(!waiter.is_finished());

    endpoint.shutdown();
    assert!(waiter.await.unwrap().is_err());
}

#[test]
fn fresh_state_is_disconnected() {
    let state = ReconnectState::new();
    assert_eq!(state.state(), ConnectionState::Disconnected);
    assert_eq!(state.generation(), ReconnectState::INITIAL_GENERATION);
    assert!(!state.is_closed());
    assert!(state.unavailable().cause().is_none());
}
