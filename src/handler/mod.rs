//! Handler module - inbound request handling and dispatch.
//!
//! A channel carries at most one handler, registered at construction in one
//! of four shapes: synchronous or asynchronous, with or without a response
//! payload. All four normalize to the single [`Handler`] trait — an async
//! function `(msg_id, bytes) -> Option<bytes>` — so the dispatcher only ever
//! sees one abstraction.

mod dispatch;

pub(crate) use dispatch::dispatch_request;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

/// Error type handlers may fail with; converted into an `ERROR` reply.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Normalized handler outcome: `None` means "respond with an empty payload".
pub type HandlerResult = std::result::Result<Option<Bytes>, HandlerError>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait every handler shape normalizes to.
pub trait Handler: Send + Sync + 'static {
    /// Handle one fully-reassembled inbound request.
    fn call(&self, msg_id: u64, data: Bytes) -> BoxFuture<'static, HandlerResult>;
}

/// Synchronous handler without a response payload.
pub(crate) struct MessageFn<F>(pub(crate) F);

impl<F> Handler for MessageFn<F>
where
    F: Fn(u64, Bytes) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
{
    fn call(&self, msg_id: u64, data: Bytes) -> BoxFuture<'static, HandlerResult> {
        let result = (self.0)(msg_id, data).map(|()| None);
        Box::pin(std::future::ready(result))
    }
}

/// Asynchronous handler without a response payload.
pub(crate) struct MessageFutureFn<F>(pub(crate) F);

impl<F, Fut> Handler for MessageFutureFn<F>
where
    F: Fn(u64, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
{
    fn call(&self, msg_id: u64, data: Bytes) -> BoxFuture<'static, HandlerResult> {
        let fut = (self.0)(msg_id, data);
        Box::pin(async move { fut.await.map(|()| None) })
    }
}

/// Synchronous handler returning response bytes.
pub(crate) struct RequestFn<F>(pub(crate) F);

impl<F> Handler for RequestFn<F>
where
    F: Fn(u64, Bytes) -> std::result::Result<Bytes, HandlerError> + Send + Sync + 'static,
{
    fn call(&self, msg_id: u64, data: Bytes) -> BoxFuture<'static, HandlerResult> {
        let result = (self.0)(msg_id, data).map(Some);
        Box::pin(std::future::ready(result))
    }
}

/// Asynchronous handler resolving to response bytes.
pub(crate) struct RequestFutureFn<F>(pub(crate) F);

impl<F, Fut> Handler for RequestFutureFn<F>
where
    F: Fn(u64, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Bytes, HandlerError>> + Send + 'static,
{
    fn call(&self, msg_id: u64, data: Bytes) -> BoxFuture<'static, HandlerResult> {
        let fut = (self.0)(msg_id, data);
        Box::pin(async move { fut.await.map(Some) })
    }
}
