//! Background tasks that own the transport reader.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use log::{debug, error, info, warn};
use tokio::{io::ReadHalf, sync::mpsc};

use super::{Shared, Transport, outbound::bounded};
use crate::{
    envelope::{ControlKind, Envelope, ResponseKind},
    error::ConnectionError,
    lane::LaneReader,
    metrics,
    mux::{EnvelopeSink, MessageRequest, ResponseWriter},
    panic::format_panic,
};

impl<T: Transport> Shared<T> {
    fn node_id(&self) -> &str { self.state.identity().node_id() }

    fn project_id(&self) -> &str { self.state.identity().project_id() }

    /// Run [`Self::message_loop`], tearing the connection down if it panics.
    pub(super) async fn run_message_loop(self: Arc<Self>, reader: LaneReader<ReadHalf<T>>) {
        let outcome = AssertUnwindSafe(Arc::clone(&self).message_loop(reader))
            .catch_unwind()
            .await;
        if let Err(panic) = outcome {
            metrics::inc_errors();
            {
                let panic_msg = format_panic(&*panic);
                error!("read loop panicked: panic={panic_msg}, node_id={}", self.node_id());
                tracing::error!(panic = %panic_msg, node_id = %self.node_id(), "read loop panicked");
            }
            self.finish_read().await;
        }
    }

    /// Decode and route envelopes until the transport fails or the
    /// connection is closed.
    async fn message_loop(self: Arc<Self>, mut reader: LaneReader<ReadHalf<T>>) {
        let mut deadline_rx = self.read_deadline.subscribe();
        let routed = self.auto_route.then(|| self.spawn_dispatch_worker());
        loop {
            let deadline = *deadline_rx.borrow_and_update();
            let read = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    debug!("read loop stopped by close: node_id={}", self.node_id());
                    return;
                }
                // A new deadline re-arms the pending read; buffered bytes
                // stay in the lane.
                Ok(()) = deadline_rx.changed() => continue,
                read = bounded(deadline, reader.read_envelope()) => {
                    read.and_then(|decoded| decoded.map_err(ConnectionError::from))
                }
            };
            match read {
                Ok(envelope) => self.handle_envelope(envelope, routed.as_ref()).await,
                Err(e) => {
                    self.fail_read(&e).await;
                    return;
                }
            }
        }
    }

    async fn handle_envelope(
        &self,
        envelope: Envelope,
        routed: Option<&mpsc::UnboundedSender<Envelope>>,
    ) {
        if let Some(kind) = envelope.control_kind() {
            self.acknowledge(kind, &envelope).await;
            return;
        }
        let envelope = match self.keeper.match_and_notify(envelope) {
            Ok(()) => return,
            Err(unmatched) => unmatched,
        };
        if let Some(routed) = routed {
            if routed.send(envelope).is_err() {
                warn!("dispatch worker gone: dropping message, node_id={}", self.node_id());
            }
        } else if let Err(e) = self.fifo.put(envelope).await {
            warn!(
                "failed to queue inbound message: error={e}, node_id={}",
                self.node_id()
            );
        }
    }

    async fn acknowledge(&self, kind: ControlKind, request: &Envelope) {
        let ack = request.respond_to(ResponseKind::Ack);
        match self.outbound.write_envelope(&ack).await {
            Ok(()) => {
                metrics::inc_control_acks();
                debug!("acknowledged control message: kind={kind:?}, id={}", request.id());
            }
            Err(e) => {
                metrics::inc_errors();
                error!(
                    "failed to acknowledge control message: kind={kind:?}, id={}, error={e}",
                    request.id()
                );
            }
        }
    }

    /// Start the task that hands routed envelopes to the dispatcher one at
    /// a time, in arrival order. It runs on the handler tracker so a handler
    /// awaiting a synchronous request does not stall the read loop, and it
    /// exits once the returned sender is dropped and the backlog is served.
    fn spawn_dispatch_worker(&self) -> mpsc::UnboundedSender<Envelope> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let identity = self.state.identity().clone();
        let sink: Arc<dyn EnvelopeSink> = self.outbound.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        self.handlers.spawn(async move {
            while let Some(message) = rx.recv().await {
                let id = message.id().to_owned();
                let request = MessageRequest {
                    headers: identity.headers.clone(),
                    peer_certificates: identity.peer_certificates.clone(),
                    message,
                };
                let writer = ResponseWriter::new(Arc::clone(&sink));
                let outcome = AssertUnwindSafe(dispatcher.serve_conn(request, writer))
                    .catch_unwind()
                    .await;
                if let Err(panic) = outcome {
                    metrics::inc_errors();
                    let panic_msg = format_panic(&*panic);
                    // Emit via both `log` and `tracing` for tests that capture either.
                    error!("dispatcher panicked: panic={panic_msg}, id={id}");
                    tracing::error!(panic = %panic_msg, %id, "dispatcher panicked");
                }
            }
        });
        tx
    }

    async fn fail_read(&self, err: &ConnectionError) {
        if err.is_clean_close() {
            info!(
                "peer closed connection: node_id={}, project_id={}",
                self.node_id(),
                self.project_id()
            );
        } else {
            metrics::inc_errors();
            error!(
                "failed to read message: error={err}, node_id={}, project_id={}",
                self.node_id(),
                self.project_id()
            );
        }
        self.finish_read().await;
    }

    /// Tear down after the read loop ends on its own and notify the owner,
    /// unless a concurrent close got there first.
    async fn finish_read(&self) {
        if !self.teardown().await {
            return;
        }
        if let Some(on_err) = &self.on_read_transport_err {
            on_err(self.node_id(), self.project_id());
        }
    }

    /// Mark the connection disconnected and release everything waiting on
    /// it. Returns true if this call performed the transition.
    async fn teardown(&self) -> bool {
        let transitioned = {
            let mut write = self.outbound.lock().await;
            let transitioned = self.state.mark_disconnected();
            let shutdown = bounded(self.outbound.deadline(), write.shutdown_lane()).await;
            if let Err(e) = shutdown.and_then(|flushed| flushed.map_err(ConnectionError::from)) {
                debug!("transport shutdown failed: error={e}, node_id={}", self.node_id());
            }
            transitioned
        };
        self.shutdown.cancel();
        self.keeper.cancel_all();
        // Buffered messages stay readable after a transport failure.
        self.fifo.seal();
        self.handlers.close();
        transitioned
    }

    /// Whether stream mode has what it needs to start copying.
    pub(super) fn stream_ready(&self) -> bool {
        let has_consumer = self
            .consumer
            .try_lock()
            .is_ok_and(|consumer| consumer.is_some());
        if !has_consumer {
            warn!("bad consumer for raw data: node_id={}", self.node_id());
            return false;
        }
        if !self.auto_route {
            debug!("raw data copy needs auto-route: node_id={}", self.node_id());
            return false;
        }
        true
    }

    /// Copy raw transport bytes into the consumer until EOF or failure.
    ///
    /// Control messages are not intercepted in this mode.
    pub(super) async fn stream_loop(self: Arc<Self>, reader: LaneReader<ReadHalf<T>>) {
        let Some(mut consumer) = self.consumer.lock().await.take() else {
            warn!("bad consumer for raw data: node_id={}", self.node_id());
            return;
        };
        let mut reader = reader.into_inner();
        let copied = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return,
            copied = tokio::io::copy(&mut reader, &mut consumer) => copied,
        };
        match copied {
            Ok(bytes) => info!("raw data stream ended: bytes={bytes}, node_id={}", self.node_id()),
            Err(e) => {
                metrics::inc_errors();
                error!("failed to copy data: error={e}, node_id={}", self.node_id());
            }
        }
        self.teardown().await;
    }
}
