//! Integration tests for the relay link: queueing, flushing, timeouts, and
//! bounded reconnection.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::{sample, Open, ScriptedRelay};
use saferoute_core::config::RelayConfig;
use saferoute_core::link::{
    LinkError, LinkState, RelayFrame, RelayLink, SendOutcome, TcpRelayTransport,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

fn link(relay: &Arc<ScriptedRelay>) -> RelayLink {
    RelayLink::new(relay.clone(), RelayConfig::default())
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn queued_messages_flush_in_order_exactly_once() {
    helpers::init_logging();
    let relay = Arc::new(ScriptedRelay::default());
    let link = link(&relay);

    for heading in [10.0, 20.0, 30.0] {
        let outcome = link.send(&sample("SELF0001", heading, 1.0, 2.0, 1_000));
        assert_eq!(outcome, SendOutcome::Queued);
    }
    assert_eq!(link.queued_len(), 3);

    link.connect(|_| {}).await.unwrap();

    let mut end = relay.take_end();
    let headings: Vec<f64> = end
        .drain()
        .iter()
        .map(|line| RelayFrame::decode(line).unwrap().heading)
        .collect();
    assert_eq!(headings, vec![10.0, 20.0, 30.0]);
    assert_eq!(link.queued_len(), 0);

    assert_eq!(
        link.send(&sample("SELF0001", 40.0, 1.0, 2.0, 2_000)),
        SendOutcome::Sent
    );
    let lines = end.drain();
    assert_eq!(lines.len(), 1);
    assert!((RelayFrame::decode(&lines[0]).unwrap().heading - 40.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn incomplete_sample_is_dropped() {
    let relay = Arc::new(ScriptedRelay::default());
    let link = link(&relay);
    let mut partial = sample("SELF0001", 0.0, 1.0, 2.0, 0);
    partial.latitude = None;

    assert_eq!(link.send(&partial), SendOutcome::Dropped);
    assert_eq!(link.queued_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn connect_times_out_after_five_seconds() {
    let relay = Arc::new(ScriptedRelay::with_script(&[Open::Hang]));
    let link = link(&relay);

    let started = tokio::time::Instant::now();
    let result = link.connect(|_| {}).await;

    assert!(matches!(result, Err(LinkError::Timeout(_))));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_millis(5_100));
    assert_eq!(link.state(), LinkState::Error);
}

#[tokio::test(start_paused = true)]
async fn concurrent_connect_is_rejected() {
    let relay = Arc::new(ScriptedRelay::with_script(&[Open::Hang]));
    let link = link(&relay);

    let first = {
        let link = link.clone();
        tokio::spawn(async move { link.connect(|_| {}).await })
    };
    settle().await;

    assert_eq!(link.state(), LinkState::Connecting);
    assert_eq!(link.connect(|_| {}).await, Err(LinkError::AlreadyConnecting));

    first.abort();
}

#[tokio::test(start_paused = true)]
async fn reconnect_backs_off_and_stops_after_three_attempts() {
    let relay = Arc::new(ScriptedRelay::with_script(&[
        Open::Accept,
        Open::Refuse,
        Open::Refuse,
        Open::Refuse,
    ]));
    let link = link(&relay);
    link.connect(|_| {}).await.unwrap();

    drop(relay.take_end());
    settle().await;
    assert_eq!(link.state(), LinkState::Disconnected);

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(relay.opens(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(relay.opens(), 2, "first retry after 1s");

    tokio::time::sleep(Duration::from_millis(1_800)).await;
    assert_eq!(relay.opens(), 2);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(relay.opens(), 3, "second retry 2s later");

    tokio::time::sleep(Duration::from_millis(3_800)).await;
    assert_eq!(relay.opens(), 3);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(relay.opens(), 4, "third retry 4s later");

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(relay.opens(), 4, "no retries past the cap");
    assert_eq!(link.state(), LinkState::Error);
    assert_eq!(link.reconnect_attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn successful_reconnect_resets_attempts_and_flushes() {
    let relay = Arc::new(ScriptedRelay::with_script(&[
        Open::Accept,
        Open::Refuse,
        Open::Accept,
    ]));
    let link = link(&relay);
    link.connect(|_| {}).await.unwrap();

    drop(relay.take_end());
    settle().await;
    assert_eq!(
        link.send(&sample("SELF0001", 5.0, 1.0, 2.0, 0)),
        SendOutcome::Queued
    );

    tokio::time::sleep(Duration::from_millis(3_100)).await;

    assert_eq!(relay.opens(), 3);
    assert_eq!(link.state(), LinkState::Connected);
    assert_eq!(link.reconnect_attempts(), 0);
    assert_eq!(relay.take_end().drain().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_disables_reconnect() {
    let relay = Arc::new(ScriptedRelay::default());
    let link = link(&relay);
    link.connect(|_| {}).await.unwrap();
    let end = relay.take_end();

    link.disconnect();
    drop(end);
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(relay.opens(), 1);
    assert_eq!(link.state(), LinkState::Idle);
}

#[tokio::test(start_paused = true)]
async fn explicit_reconnect_after_exhaustion() {
    let relay = Arc::new(ScriptedRelay::with_script(&[
        Open::Accept,
        Open::Refuse,
        Open::Refuse,
        Open::Refuse,
    ]));
    let link = link(&relay);
    link.connect(|_| {}).await.unwrap();
    drop(relay.take_end());
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(link.reconnect_attempts(), 3);

    link.reconnect().await.unwrap();

    assert_eq!(link.state(), LinkState::Connected);
    assert_eq!(link.reconnect_attempts(), 0);
}

#[tokio::test]
async fn reconnect_before_connect_fails() {
    let relay = Arc::new(ScriptedRelay::default());
    let link = link(&relay);

    assert_eq!(link.reconnect().await, Err(LinkError::NotInitialized));
    assert_eq!(relay.opens(), 0);
}

#[tokio::test]
async fn invalid_frames_are_dropped() {
    let relay = Arc::new(ScriptedRelay::default());
    let link = link(&relay);
    let (tx, mut rx) = mpsc::unbounded_channel();
    link.connect(move |frame| {
        let _ = tx.send(frame);
    })
    .await
    .unwrap();
    let end = relay.take_end();

    end.push.send("not json".to_string()).unwrap();
    end.push
        .send(r#"{"heading":"east","location":{"latitude":1,"longitude":2},"timestamp":1}"#.to_string())
        .unwrap();
    end.push
        .send(r#"{"heading":90,"timestamp":1}"#.to_string())
        .unwrap();
    end.push
        .send(r#"{"heading":90,"location":{"latitude":1,"longitude":2},"timestamp":1}"#.to_string())
        .unwrap();

    let frame = rx.recv().await.unwrap();
    assert!((frame.heading - 90.0).abs() < f64::EPSILON);
    assert!(rx.try_recv().is_err());
    assert_eq!(link.state(), LinkState::Connected);
}

#[tokio::test(start_paused = true)]
async fn failed_write_requeues_and_reconnects() {
    let relay = Arc::new(ScriptedRelay::default());
    let link = link(&relay);
    link.connect(|_| {}).await.unwrap();
    // Keep the read side open so only the write path sees the fault.
    let helpers::RelayEnd { sent, push: _push } = relay.take_end();

    drop(sent);
    assert_eq!(
        link.send(&sample("SELF0001", 1.0, 1.0, 2.0, 0)),
        SendOutcome::Queued
    );
    assert_eq!(link.state(), LinkState::Disconnected);
    assert_eq!(link.reconnect_attempts(), 1);
    assert_eq!(
        link.send(&sample("SELF0001", 2.0, 1.0, 2.0, 0)),
        SendOutcome::Queued
    );
    assert_eq!(link.queued_len(), 2);

    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert_eq!(relay.opens(), 2);
    assert_eq!(link.state(), LinkState::Connected);
    assert_eq!(link.reconnect_attempts(), 0);
    assert_eq!(link.queued_len(), 0);
    let headings: Vec<f64> = relay
        .take_end()
        .drain()
        .iter()
        .map(|line| RelayFrame::decode(line).unwrap().heading)
        .collect();
    assert_eq!(headings, vec![1.0, 2.0]);
}

#[tokio::test]
async fn tcp_relay_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = RelayConfig {
        endpoint: listener.local_addr().unwrap().to_string(),
        ..RelayConfig::default()
    };

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        write_half
            .write_all(b"{\"heading\":180,\"location\":{\"latitude\":3,\"longitude\":4},\"timestamp\":7,\"deviceId\":\"PEER0001\"}\n")
            .await
            .unwrap();
        let mut lines = BufReader::new(read_half).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        (line, write_half)
    });

    let link = RelayLink::new(Arc::new(TcpRelayTransport), config);
    let (tx, mut rx) = mpsc::unbounded_channel();
    link.connect(move |frame| {
        let _ = tx.send(frame);
    })
    .await
    .unwrap();

    let frame = rx.recv().await.unwrap();
    assert_eq!(frame.device_id.as_deref(), Some("PEER0001"));
    let position = frame.into_sample("relay").position().unwrap();
    assert!((position.latitude - 3.0).abs() < f64::EPSILON);

    assert_eq!(
        link.send(&sample("SELF0001", 45.0, 1.0, 2.0, 9)),
        SendOutcome::Sent
    );
    let (line, _write_half) = server.await.unwrap();
    let echoed = RelayFrame::decode(&line).unwrap();
    assert_eq!(echoed.device_id.as_deref(), Some("SELF0001"));
    assert!((echoed.heading - 45.0).abs() < f64::EPSILON);

    link.disconnect();
}
