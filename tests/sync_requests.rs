//! Synchronous request/response correlation over a live connection.

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use tokio::{io::DuplexStream, time::Instant};
use wirelane::{
    Connection,
    ConnectionError,
    Envelope,
    MessageMux,
    MessageRequest,
    Operation,
    ResponseKind,
    ResponseWriter,
    mux::handler,
};
use wirelane_testing::duplex_connection;

#[tokio::test]
async fn sync_request_receives_correlated_response() {
    let (conn, mut peer) = duplex_connection(|opts| opts);
    conn.serve_conn();

    let responder = tokio::spawn(async move {
        let request = peer.recv().await;
        assert!(request.is_sync());
        peer.send(&request.respond_to(ResponseKind::Content(b"pong".to_vec())))
            .await;
        peer
    });

    let response = conn
        .write_message_sync(Envelope::new(Operation::Query).with_id("1"))
        .await
        .expect("sync response");
    assert_eq!(response.parent_id(), Some("1"));
    assert_eq!(response.content(), b"pong");
    assert_eq!(conn.pending_requests(), 0);

    let mut peer = responder.await.expect("responder task");
    peer.send(&Envelope::new(Operation::Insert).with_id("next")).await;
    let queued = conn.read_message().await.expect("queued message");
    assert_eq!(queued.id(), "next");

    conn.close().await.expect("close");
}

#[tokio::test(start_paused = true)]
async fn sync_request_times_out_at_write_deadline() {
    let (conn, mut peer) = duplex_connection(|opts| opts);
    conn.serve_conn();

    let start = Instant::now();
    conn.set_write_deadline(Some(start + Duration::from_secs(2)));
    let err = conn
        .write_message_sync(Envelope::new(Operation::Query).with_id("42"))
        .await
        .expect_err("no response arrives");

    assert!(err.is_timeout());
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(2));
    assert!(waited < Duration::from_secs(3));
    assert_eq!(conn.pending_requests(), 0);

    let request = peer.recv().await;
    assert_eq!(request.id(), "42");
    assert!(request.is_sync());

    conn.close().await.expect("close");
}

#[tokio::test(start_paused = true)]
async fn late_response_is_queued_after_timeout() {
    let (conn, mut peer) = duplex_connection(|opts| opts);
    conn.serve_conn();

    conn.set_write_deadline(Some(Instant::now() + Duration::from_secs(1)));
    let err = conn
        .write_message_sync(Envelope::new(Operation::Query).with_id("late"))
        .await
        .expect_err("no response in time");
    assert!(err.is_timeout());

    let request = peer.recv().await;
    peer.send(&request.respond_to(ResponseKind::Content(b"too late".to_vec())))
        .await;

    let queued = conn.read_message().await.expect("late response queued");
    assert_eq!(queued.parent_id(), Some("late"));
    assert_eq!(queued.content(), b"too late");

    conn.close().await.expect("close");
}

#[tokio::test]
async fn peer_disconnect_fails_outstanding_request() {
    let (conn, mut peer) = duplex_connection(|opts| opts);
    conn.serve_conn();

    let closer = tokio::spawn(async move {
        let _request = peer.recv().await;
        peer.shutdown().await;
        peer
    });

    let err = conn
        .write_message_sync(Envelope::new(Operation::Query).with_id("lost"))
        .await
        .expect_err("peer went away");
    assert!(matches!(err, ConnectionError::Disconnected));
    assert_eq!(conn.pending_requests(), 0);

    let _peer = closer.await.expect("closer task");
}

#[tokio::test]
async fn local_close_fails_outstanding_request() {
    let (conn, mut peer) = duplex_connection(|opts| opts);
    conn.serve_conn();

    let waiter = {
        let conn = conn.clone();
        tokio::spawn(async move {
            conn.write_message_sync(Envelope::new(Operation::Query).with_id("pending"))
                .await
        })
    };
    let request = peer.recv().await;
    assert_eq!(request.id(), "pending");

    conn.close().await.expect("close");
    let result = waiter.await.expect("waiter task");
    assert!(matches!(result, Err(ConnectionError::Disconnected)));
}

#[tokio::test]
async fn duplicate_outstanding_id_is_rejected() {
    let (conn, mut peer) = duplex_connection(|opts| opts);
    conn.serve_conn();

    let first = {
        let conn = conn.clone();
        tokio::spawn(async move {
            conn.write_message_sync(Envelope::new(Operation::Query).with_id("dup"))
                .await
        })
    };
    let _request = peer.recv().await;
    assert_eq!(conn.pending_requests(), 1);

    let err = conn
        .write_message_sync(Envelope::new(Operation::Query).with_id("dup"))
        .await
        .expect_err("duplicate id");
    assert!(matches!(err, ConnectionError::DuplicateRequest(ref id) if id == "dup"));
    assert_eq!(conn.pending_requests(), 1);

    conn.close().await.expect("close");
    assert!(matches!(
        first.await.expect("first task"),
        Err(ConnectionError::Disconnected)
    ));
}

#[tokio::test]
async fn handler_can_issue_sync_request_on_its_own_connection() {
    let slot: Arc<OnceLock<Connection<DuplexStream>>> = Arc::new(OnceLock::new());
    let handler_slot = Arc::clone(&slot);
    let relay = handler(move |request: MessageRequest, writer: ResponseWriter| {
        let slot = Arc::clone(&handler_slot);
        async move {
            let conn = slot.get().expect("connection installed before traffic");
            let inner = conn
                .write_message_sync(Envelope::new(Operation::Query).with_id("inner"))
                .await
                .expect("inner response");
            let reply = request
                .message
                .respond_to(ResponseKind::Content(inner.into_content()));
            writer.write_response(&reply).await.expect("reply");
        }
    });
    let mux = MessageMux::new()
        .route(Operation::Insert, relay)
        .expect("register route");

    let (conn, mut peer) = duplex_connection(|opts| opts.auto_route(true).dispatcher(Arc::new(mux)));
    assert!(slot.set(conn.clone()).is_ok());
    conn.serve_conn();

    let mut outer = Envelope::new(Operation::Insert).with_id("outer");
    outer.set_sync(true);
    peer.send(&outer).await;

    let inner = peer.recv().await;
    assert_eq!(inner.id(), "inner");
    peer.send(&inner.respond_to(ResponseKind::Content(b"from peer".to_vec())))
        .await;

    let reply = peer.recv().await;
    assert_eq!(reply.parent_id(), Some("outer"));
    assert_eq!(reply.content(), b"from peer");

    conn.close().await.expect("close");
}
