//! End-to-end relay tests: a real TCP control channel on loopback, a
//! scripted radio link, and a scripted control client.
//!
//! Each test spawns [`Relay::run`] on an ephemeral port, learns the bound
//! address from the `Listening` event, and drives the relay through
//! [`MockControlClient`] while observing radio traffic via
//! [`MockRadioHandle`].

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use groundlink_core::Error;
use groundlink_core::events::RelayEvent;
use groundlink_core::protocol::{ACK, INITIALIZATION_REQUEST, INITIALIZATION_REQUEST_ACK, READY};
use groundlink_relay::{DisconnectPolicy, Relay, RelayConfig, RelayError, RelayResult};
use groundlink_test_harness::{MOCK_REMOTE_ADDRESS, MockControlClient, MockRadioHandle, MockRadioLink};
#[cfg(unix)]
use groundlink_transport::serial::map_io_error;

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(150);

struct RunningRelay {
    addr: String,
    events: broadcast::Receiver<RelayEvent>,
    radio: MockRadioHandle,
    cancel: CancellationToken,
    task: JoinHandle<RelayResult<()>>,
}

impl RunningRelay {
    async fn connect(&mut self) -> MockControlClient {
        let mut client = MockControlClient::connect(&self.addr).await.unwrap();
        client.expect_ready(WAIT).await.unwrap();
        client
    }

    async fn wait_for(&mut self, wanted: impl Fn(&RelayEvent) -> bool) -> RelayEvent {
        wait_for_event(&mut self.events, wanted).await
    }

    async fn stop(self) -> RelayResult<()> {
        self.cancel.cancel();
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("relay did not stop")
            .expect("relay task panicked")
    }
}

fn base_config() -> RelayConfig {
    RelayConfig {
        bind_address: "127.0.0.1".into(),
        tcp_port: 0,
        handshake_timeout_ms: 1_000,
        ..Default::default()
    }
}

fn no_handshake() -> RelayConfig {
    RelayConfig {
        skip_handshake: true,
        ..base_config()
    }
}

async fn wait_for_event(
    events: &mut broadcast::Receiver<RelayEvent>,
    wanted: impl Fn(&RelayEvent) -> bool,
) -> RelayEvent {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(event)) if wanted(&event) => return event,
            Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => panic!("relay event channel closed"),
            Err(_) => panic!("timed out waiting for relay event"),
        }
    }
}

/// Spawn a relay whose radio peer will send `script` during the handshake.
async fn spawn_relay(config: RelayConfig, script: &[&[u8]]) -> RunningRelay {
    let (link, radio) = MockRadioLink::new();
    for message in script {
        radio.push_message(message);
    }

    let relay = Relay::new(config, Box::new(link)).unwrap();
    let mut events = relay.subscribe();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(relay.run(cancel.clone()));

    let addr = match wait_for_event(&mut events, |e| matches!(e, RelayEvent::Listening { .. })).await {
        RelayEvent::Listening { addr } => addr.to_string(),
        _ => unreachable!(),
    };

    RunningRelay {
        addr,
        events,
        radio,
        cancel,
        task,
    }
}

#[tokio::test]
async fn handshake_then_one_frame_to_peer() {
    let mut relay = spawn_relay(base_config(), &[&[INITIALIZATION_REQUEST], &[ACK]]).await;

    let ack = relay.radio.next_sent(WAIT).await.unwrap();
    assert_eq!(ack.data, vec![INITIALIZATION_REQUEST_ACK]);

    let mut client = relay.connect().await;
    client.send(&[1, 2, 3, 4, 5, 6, 7, 8]).await.unwrap();

    let frame = relay.radio.next_sent(WAIT).await.unwrap();
    assert_eq!(frame.peer, MOCK_REMOTE_ADDRESS);
    assert_eq!(frame.data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    assert!(relay.radio.next_sent(QUIET).await.is_none());

    // One handshake reply plus one frame, nothing else.
    assert_eq!(relay.radio.sent().len(), 2);
    relay.stop().await.unwrap();
}

#[tokio::test]
async fn ready_is_the_first_byte_a_client_sees() {
    let relay = spawn_relay(no_handshake(), &[]).await;

    let mut client = MockControlClient::connect(&relay.addr).await.unwrap();
    assert_eq!(client.read_byte(WAIT).await.unwrap(), READY);
    // Nothing else follows READY.
    assert!(matches!(client.read_byte(QUIET).await, Err(Error::Timeout)));

    relay.stop().await.unwrap();
}

#[tokio::test]
async fn ten_bytes_send_first_eight_and_hold_two() {
    let mut relay = spawn_relay(no_handshake(), &[]).await;
    let mut client = relay.connect().await;

    client.send(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]).await.unwrap();

    let frame = relay.radio.next_sent(WAIT).await.unwrap();
    assert_eq!(frame.data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    assert!(relay.radio.next_sent(QUIET).await.is_none());

    client.disconnect().await.unwrap();
    let event = relay
        .wait_for(|e| matches!(e, RelayEvent::ClientDisconnected { .. }))
        .await;
    assert!(matches!(event, RelayEvent::ClientDisconnected { discarded: 2, .. }));

    relay.stop().await.unwrap();
}

#[tokio::test]
async fn partial_frame_is_never_sent() {
    let mut relay = spawn_relay(no_handshake(), &[]).await;
    let mut client = relay.connect().await;

    client.send(&[0xAA, 0xBB, 0xCC]).await.unwrap();
    client.disconnect().await.unwrap();

    let event = relay
        .wait_for(|e| matches!(e, RelayEvent::ClientDisconnected { .. }))
        .await;
    assert!(matches!(event, RelayEvent::ClientDisconnected { discarded: 3, .. }));
    assert!(relay.radio.next_sent(QUIET).await.is_none());
    assert!(relay.radio.sent().is_empty());

    relay.stop().await.unwrap();
}

#[tokio::test]
async fn new_client_starts_with_an_empty_frame() {
    let mut relay = spawn_relay(no_handshake(), &[]).await;

    let mut first = relay.connect().await;
    first.send(&[0xEE; 5]).await.unwrap();
    first.disconnect().await.unwrap();
    relay
        .wait_for(|e| matches!(e, RelayEvent::ClientDisconnected { .. }))
        .await;

    let mut second = relay.connect().await;
    second.send(&[1, 2, 3, 4, 5, 6, 7, 8]).await.unwrap();

    let frame = relay.radio.next_sent(WAIT).await.unwrap();
    assert_eq!(frame.data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(relay.radio.sent().len(), 1);

    relay.stop().await.unwrap();
}

#[tokio::test]
async fn second_client_waits_for_the_first() {
    let mut relay = spawn_relay(no_handshake(), &[]).await;
    let first = relay.connect().await;

    // The connection is queued by the OS but not served yet.
    let mut second = MockControlClient::connect(&relay.addr).await.unwrap();
    assert!(matches!(second.read_byte(QUIET).await, Err(Error::Timeout)));

    first.disconnect().await.unwrap();
    second.expect_ready(WAIT).await.unwrap();
    second.send(&[8; 8]).await.unwrap();
    assert_eq!(relay.radio.next_sent(WAIT).await.unwrap().data, vec![8; 8]);

    relay.stop().await.unwrap();
}

#[tokio::test]
async fn exit_policy_stops_after_disconnect() {
    let config = RelayConfig {
        on_disconnect: DisconnectPolicy::Exit,
        ..no_handshake()
    };
    let mut relay = spawn_relay(config, &[]).await;
    let client = relay.connect().await;
    client.disconnect().await.unwrap();

    let result = tokio::time::timeout(WAIT, relay.task)
        .await
        .expect("relay should exit on its own")
        .unwrap();
    assert!(result.is_ok());
    assert!(!relay.radio.is_open());
    assert!(MockControlClient::connect(&relay.addr).await.is_err());
}

#[tokio::test]
async fn failed_send_drops_frame_and_relay_continues() {
    let mut relay = spawn_relay(no_handshake(), &[]).await;
    relay.radio.fail_next_send(Error::Protocol("network ACK failure".into()));
    let mut client = relay.connect().await;

    client.send(&[1, 2, 3, 4, 5, 6, 7, 8]).await.unwrap();
    client.send(&[9, 10, 11, 12, 13, 14, 15, 16]).await.unwrap();

    let dropped = relay
        .wait_for(|e| matches!(e, RelayEvent::FrameDropped { .. }))
        .await;
    assert!(matches!(dropped, RelayEvent::FrameDropped { seq: 0, .. }));

    let frame = relay.radio.next_sent(WAIT).await.unwrap();
    assert_eq!(frame.data, vec![9, 10, 11, 12, 13, 14, 15, 16]);
    let sent = relay
        .wait_for(|e| matches!(e, RelayEvent::FrameSent { .. }))
        .await;
    assert_eq!(sent, RelayEvent::FrameSent { seq: 1, len: 8 });

    // The failed frame is not retried.
    assert!(relay.radio.next_sent(QUIET).await.is_none());
    relay.stop().await.unwrap();
}

#[tokio::test]
async fn lost_radio_link_is_fatal() {
    let mut relay = spawn_relay(no_handshake(), &[]).await;
    relay.radio.fail_next_send(Error::ConnectionLost);
    let mut client = relay.connect().await;

    client.send(&[1, 2, 3, 4, 5, 6, 7, 8]).await.unwrap();

    let result = tokio::time::timeout(WAIT, relay.task)
        .await
        .expect("relay should stop on link loss")
        .unwrap();
    assert!(matches!(result, Err(RelayError::RadioLinkLost(Error::ConnectionLost))));
    assert!(result.unwrap_err().is_fatal());

    // The client is dropped with the session.
    assert!(matches!(client.read_byte(WAIT).await, Err(Error::ConnectionLost)));
}

#[cfg(unix)]
#[tokio::test]
async fn unplugged_serial_radio_is_fatal() {
    const EIO: i32 = 5;
    let mut relay = spawn_relay(no_handshake(), &[]).await;
    relay
        .radio
        .fail_next_send(map_io_error(std::io::Error::from_raw_os_error(EIO)));
    let mut client = relay.connect().await;

    client.send(&[0x42; 8]).await.unwrap();

    let result = tokio::time::timeout(WAIT, relay.task)
        .await
        .expect("relay should stop when the radio device vanishes")
        .unwrap();
    assert!(matches!(result, Err(RelayError::RadioLinkLost(Error::ConnectionLost))));
    assert!(relay.radio.sent().is_empty());
    assert!(!relay.radio.is_open());
}

#[tokio::test]
async fn occupied_port_is_setup_error_and_closes_radio() {
    let holder = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = holder.local_addr().unwrap().port();

    let (link, radio) = MockRadioLink::new();
    let config = RelayConfig {
        tcp_port: port,
        ..no_handshake()
    };
    let relay = Relay::new(config, Box::new(link)).unwrap();
    let mut events = relay.subscribe();

    let result = tokio::time::timeout(WAIT, relay.run(CancellationToken::new()))
        .await
        .expect("bind failure should end the relay");

    assert!(matches!(result, Err(RelayError::Setup(Error::Transport(_)))));
    assert!(result.unwrap_err().is_fatal());
    // The link was opened for startup and closed again.
    assert_eq!(radio.open_calls(), 1);
    assert_eq!(radio.close_calls(), 1);
    assert!(!radio.is_open());
    assert_eq!(
        events.try_recv().unwrap(),
        RelayEvent::RadioReady { handshake: false }
    );
    // Never reached Listening.
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Closed)
    ));
    drop(holder);
}

#[tokio::test]
async fn frames_arrive_in_order_through_a_small_queue() {
    let config = RelayConfig {
        frame_size: 4,
        frame_queue_depth: 1,
        ..no_handshake()
    };
    let mut relay = spawn_relay(config, &[]).await;
    let mut client = relay.connect().await;

    let stream: Vec<u8> = (0..=255).collect();
    client.send(&stream).await.unwrap();

    for chunk in stream.chunks(4) {
        let frame = relay.radio.next_sent(WAIT).await.unwrap();
        assert_eq!(frame.data, chunk);
    }
    assert!(relay.radio.next_sent(QUIET).await.is_none());

    relay.stop().await.unwrap();
}

#[tokio::test]
async fn failed_handshake_never_listens() {
    let (link, radio) = MockRadioLink::new();
    radio.push_message(&[0x00]);
    let relay = Relay::new(base_config(), Box::new(link)).unwrap();
    let mut events = relay.subscribe();

    let result = relay.run(CancellationToken::new()).await;

    assert!(matches!(result, Err(RelayError::Handshake(_))));
    assert!(radio.sent().is_empty());
    assert!(!radio.is_open());
    // Neither RadioReady nor Listening was published.
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Closed)
    ));
}

#[tokio::test]
async fn cancel_during_unbounded_handshake() {
    let (link, radio) = MockRadioLink::new();
    let config = RelayConfig {
        handshake_timeout_ms: 0,
        ..base_config()
    };
    let relay = Relay::new(config, Box::new(link)).unwrap();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(relay.run(cancel.clone()));

    tokio::time::sleep(QUIET).await;
    assert!(!task.is_finished());
    cancel.cancel();

    let result = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert!(!radio.is_open());
}
