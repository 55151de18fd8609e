//! Auto-routed delivery through a dispatcher.

use std::{sync::Arc, time::Duration};

use wirelane::{
    ConnectionState,
    Envelope,
    MessageMux,
    Operation,
    ResponseKind,
    connection::{NODE_ID_HEADER, PROJECT_ID_HEADER},
};
use wirelane_testing::{RecordingDispatcher, duplex_connection, echo_handler};

fn sync(envelope: Envelope) -> Envelope {
    let mut envelope = envelope;
    envelope.set_sync(true);
    envelope
}

#[tokio::test]
async fn routed_request_carries_connection_identity() {
    let (dispatcher, mut routed) = RecordingDispatcher::new();
    let state = ConnectionState::new()
        .with_header(NODE_ID_HEADER, "edge-1")
        .with_header(PROJECT_ID_HEADER, "proj-9")
        .with_peer_certificate(vec![0x30, 0x82]);
    let (conn, mut peer) = duplex_connection(|opts| {
        opts.auto_route(true)
            .state(state)
            .dispatcher(Arc::new(dispatcher))
    });
    conn.serve_conn();

    peer.send(&Envelope::new(Operation::Update).with_id("u1").with_resource("devices/a"))
        .await;

    let request = routed.recv().await.expect("routed request");
    assert_eq!(request.message.id(), "u1");
    assert_eq!(request.message.resource(), "devices/a");
    assert_eq!(request.headers.get(NODE_ID_HEADER).map(String::as_str), Some("edge-1"));
    assert_eq!(request.headers.get(PROJECT_ID_HEADER).map(String::as_str), Some("proj-9"));
    assert_eq!(request.peer_certificates, vec![vec![0x30, 0x82]]);

    conn.close().await.expect("close");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn routed_messages_reach_the_dispatcher_in_arrival_order() {
    let (dispatcher, mut routed) = RecordingDispatcher::new();
    let (conn, mut peer) = duplex_connection(|opts| opts.auto_route(true).dispatcher(Arc::new(dispatcher)));
    conn.serve_conn();

    let sender = tokio::spawn(async move {
        for seq in 0..500 {
            peer.send(&Envelope::new(Operation::Insert).with_id(format!("{seq}")))
                .await;
        }
        peer
    });

    for seq in 0..500 {
        let request = tokio::time::timeout(Duration::from_secs(5), routed.recv())
            .await
            .expect("routed in time")
            .expect("routed request");
        assert_eq!(request.message.id(), format!("{seq}"));
    }

    let _peer = sender.await.expect("sender task");
    conn.close().await.expect("close");
}

#[tokio::test]
async fn routed_sync_request_is_answered_through_the_writer() {
    let mux = MessageMux::new()
        .route(Operation::Query, echo_handler())
        .expect("register route");
    let (conn, mut peer) = duplex_connection(|opts| opts.auto_route(true).dispatcher(Arc::new(mux)));
    conn.serve_conn();

    peer.send(&sync(Envelope::new(Operation::Query).with_id("q").with_content("hello")))
        .await;

    let response = peer.recv().await;
    assert_eq!(response.parent_id(), Some("q"));
    assert_eq!(response.content(), b"hello");

    conn.close().await.expect("close");
}

#[tokio::test]
async fn unrouted_sync_request_gets_error_response() {
    let (conn, mut peer) = duplex_connection(|opts| opts.auto_route(true));
    conn.serve_conn();

    peer.send(&sync(Envelope::new(Operation::Delete).with_id("d"))).await;

    let response = peer.recv().await;
    assert_eq!(response.parent_id(), Some("d"));
    assert_eq!(response.content(), b"no route for operation");
    assert!(!response.is_ack());

    conn.close().await.expect("close");
}

#[tokio::test]
async fn unrouted_async_message_is_dropped_quietly() {
    let (conn, mut peer) = duplex_connection(|opts| opts.auto_route(true));
    conn.serve_conn();

    peer.send(&Envelope::new(Operation::Delete).with_id("d")).await;
    assert!(peer.recv_within(Duration::from_millis(50)).await.is_none());

    peer.send(&Envelope::new(Operation::Ping).with_id("still-alive")).await;
    assert_eq!(peer.recv().await.parent_id(), Some("still-alive"));

    conn.close().await.expect("close");
}

#[tokio::test]
async fn fallback_handles_unmatched_operations() {
    let mux = MessageMux::new().fallback(echo_handler());
    let (conn, mut peer) = duplex_connection(|opts| opts.auto_route(true).dispatcher(Arc::new(mux)));
    conn.serve_conn();

    let custom = Envelope::new(Operation::Custom("twin/report".into()))
        .with_id("c")
        .with_content("payload");
    peer.send(&sync(custom)).await;

    let response = peer.recv().await;
    assert_eq!(response.parent_id(), Some("c"));
    assert_eq!(response.content(), b"payload");

    conn.close().await.expect("close");
}

#[tokio::test]
async fn replying_dispatcher_answers_and_records() {
    let (dispatcher, mut routed) = RecordingDispatcher::replying();
    let (conn, mut peer) =
        duplex_connection(|opts| opts.auto_route(true).dispatcher(Arc::new(dispatcher)));
    conn.serve_conn();

    peer.send(&sync(Envelope::new(Operation::Insert).with_id("i").with_content("x")))
        .await;

    let response = peer.recv().await;
    assert_eq!(response.parent_id(), Some("i"));
    assert_eq!(response.content(), b"x");
    let recorded = routed.recv().await.expect("recorded request");
    assert_eq!(recorded.message.id(), "i");

    conn.close().await.expect("close");
}

#[test]
fn error_responses_carry_the_reason() {
    let request = Envelope::new(Operation::Query).with_id("r");
    let response = request.respond_to(ResponseKind::Error("denied".into()));
    assert_eq!(response.content(), b"denied");
}
