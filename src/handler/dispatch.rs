//! Dispatch of fully-reassembled inbound requests.
//!
//! Every request gets a reply: `RESPONSE` with the handler's bytes (empty
//! for the response-less shapes), `ERROR` when the handler fails or none is
//! configured. The reply's write failures are swallowed — the peer may have
//! shut down underneath us.

use std::sync::Arc;

use bytes::Bytes;

use super::HandlerError;
use crate::channel::ChannelCore;
use crate::protocol::MsgType;

/// Keeps the dispatch count honest across every exit path, and runs the
/// deferred-dispose check once the dispatch is accounted for.
struct ProcessGuard<'a> {
    core: &'a ChannelCore,
}

impl<'a> ProcessGuard<'a> {
    fn enter(core: &'a ChannelCore) -> Self {
        core.process_entered();
        Self { core }
    }
}

impl Drop for ProcessGuard<'_> {
    fn drop(&mut self) {
        self.core.process_exited();
        self.core.maybe_managed_dispose();
    }
}

/// Invoke the configured handler for one inbound request and emit its reply.
pub(crate) async fn dispatch_request(core: Arc<ChannelCore>, msg_id: u64, data: Bytes) {
    let _guard = ProcessGuard::enter(&core);

    let outcome = match core.handler() {
        Some(handler) => handler.call(msg_id, data).await,
        None => Err(HandlerError::from("no handler configured")),
    };

    let reply_id = core.allocate_msg_id();
    let sent = match outcome {
        Ok(body) => {
            core.writer()
                .write_framed(MsgType::Response, reply_id, body.as_deref(), msg_id)
                .await
        }
        Err(error) => {
            tracing::debug!(msg_id, %error, "handler failed; replying with error");
            core.writer()
                .write_framed(MsgType::Error, reply_id, None, msg_id)
                .await
        }
    };
    if !sent {
        tracing::debug!(msg_id, "reply not delivered; channel going down");
    }
}
