//! Dispatchers that record what a connection routes to them.

use async_trait::async_trait;
use tokio::sync::mpsc;
use wirelane::{
    Dispatcher,
    MessageRequest,
    ResponseKind,
    ResponseWriter,
    mux::{Handler, handler},
};

/// Dispatcher forwarding every request to a channel.
///
/// When built with [`RecordingDispatcher::replying`], synchronous requests
/// are answered with their own payload before being recorded.
pub struct RecordingDispatcher {
    tx: mpsc::UnboundedSender<MessageRequest>,
    reply: bool,
}

impl RecordingDispatcher {
    /// Record requests without answering them.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MessageRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, reply: false }, rx)
    }

    /// Record requests and echo the payload of synchronous ones.
    #[must_use]
    pub fn replying() -> (Self, mpsc::UnboundedReceiver<MessageRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, reply: true }, rx)
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn serve_conn(&self, request: MessageRequest, writer: ResponseWriter) {
        if self.reply && request.message.is_sync() {
            let response = request
                .message
                .respond_to(ResponseKind::Content(request.message.content().to_vec()));
            if let Err(e) = writer.write_response(&response).await {
                log::warn!("recording dispatcher failed to reply: error={e}");
            }
        }
        let _ = self.tx.send(request);
    }
}

/// Route handler answering every request with its own payload.
#[must_use]
pub fn echo_handler() -> Handler {
    handler(|request: MessageRequest, writer: ResponseWriter| async move {
        let response = request
            .message
            .respond_to(ResponseKind::Content(request.message.content().to_vec()));
        if let Err(e) = writer.write_response(&response).await {
            log::warn!("echo handler failed to reply: error={e}");
        }
    })
}
