//! Control messages are acknowledged by the read loop and never surface to
//! the application.

use std::{sync::Arc, time::Duration};

use rstest::rstest;
use wirelane::{Envelope, Operation};
use wirelane_testing::{RecordingDispatcher, duplex_connection};

#[rstest]
#[case::config(Operation::ConfigSync)]
#[case::ping(Operation::Ping)]
#[case::pong(Operation::Pong)]
#[tokio::test]
async fn control_message_is_acked_once_and_not_queued(#[case] operation: Operation) {
    let (conn, mut peer) = duplex_connection(|opts| opts);
    conn.serve_conn();

    peer.send(&Envelope::new(operation).with_id("7")).await;
    let ack = peer.recv().await;
    assert!(ack.is_ack());
    assert_eq!(ack.parent_id(), Some("7"));
    assert!(peer.recv_within(Duration::from_millis(50)).await.is_none());

    peer.send(&Envelope::new(Operation::Insert).with_id("after")).await;
    let next = conn.read_message().await.expect("queued application message");
    assert_eq!(next.id(), "after");

    conn.close().await.expect("close");
}

#[tokio::test]
async fn control_message_is_not_dispatched_when_auto_routing() {
    let (dispatcher, mut routed) = RecordingDispatcher::new();
    let (conn, mut peer) =
        duplex_connection(|opts| opts.auto_route(true).dispatcher(Arc::new(dispatcher)));
    conn.serve_conn();

    peer.send(&Envelope::new(Operation::Ping).with_id("7")).await;
    peer.send(&Envelope::new(Operation::Update).with_id("8")).await;

    let ack = peer.recv().await;
    assert_eq!(ack.parent_id(), Some("7"));
    let request = routed.recv().await.expect("routed request");
    assert_eq!(request.message.id(), "8");

    conn.close().await.expect("close");
    conn.wait_handlers().await;
    assert!(routed.try_recv().is_err());
}

#[tokio::test]
async fn ack_keeps_the_request_route() {
    let (conn, mut peer) = duplex_connection(|opts| opts);
    conn.serve_conn();

    let ping = Envelope::new(Operation::Ping)
        .with_id("route")
        .with_route("edge", "twin")
        .with_resource("node/1");
    peer.send(&ping).await;

    let ack = peer.recv().await;
    assert_eq!(ack.source(), "edge");
    assert_eq!(ack.group(), "twin");
    assert_eq!(ack.resource(), "node/1");
    assert_eq!(ack.operation(), &Operation::Response);

    conn.close().await.expect("close");
}
