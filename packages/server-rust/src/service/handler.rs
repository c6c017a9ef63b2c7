//! Handler traits for request/response and streaming routes.
//!
//! Both traits have blanket impls for async closures, so routes are usually
//! registered as `|req: Request| async move { ... }`.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use corekit_core::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::request::Request;
use super::response::Reply;

/// Boxed future returned by handlers.
pub type HandlerFuture<T> = Pin<Box<dyn Future<Output = Result<T, Error>> + Send>>;

/// A business handler answering one request with one reply.
pub trait ApiHandler: Send + Sync + 'static {
    fn call(&self, req: Request) -> HandlerFuture<Reply>;
}

impl<F, Fut> ApiHandler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, Error>> + Send + 'static,
{
    fn call(&self, req: Request) -> HandlerFuture<Reply> {
        Box::pin(self(req))
    }
}

/// A business handler that asks for a duplex stream instead of a response.
pub trait StreamHandler: Send + Sync + 'static {
    fn call(&self, req: Request) -> HandlerFuture<StreamReply>;
}

impl<F, Fut> StreamHandler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StreamReply, Error>> + Send + 'static,
{
    fn call(&self, req: Request) -> HandlerFuture<StreamReply> {
        Box::pin(self(req))
    }
}

/// The session's side of a stream: outbound frames to forward and the token
/// it cancels when the session ends.
#[derive(Debug)]
pub struct StreamReply {
    pub frames: mpsc::Receiver<Bytes>,
    pub cancel: CancellationToken,
}

/// The handler's side of a stream.
///
/// Producers must stop once `cancel` fires. Frames sent after teardown are
/// accepted and discarded until the sender is dropped.
#[derive(Debug, Clone)]
pub struct StreamProducer {
    pub frames: mpsc::Sender<Bytes>,
    pub cancel: CancellationToken,
}

/// Builds a connected producer/reply pair with a bounded frame buffer.
#[must_use]
pub fn stream_channel(capacity: usize) -> (StreamProducer, StreamReply) {
    let (tx, rx) = mpsc::channel(capacity);
    let cancel = CancellationToken::new();
    (
        StreamProducer {
            frames: tx,
            cancel: cancel.clone(),
        },
        StreamReply { frames: rx, cancel },
    )
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, Method, Uri};

    use super::*;
    use crate::service::Response;

    fn request() -> Request {
        Request::new(Method::GET, Uri::from_static("/"), HeaderMap::new(), Bytes::new())
    }

    #[tokio::test]
    async fn closures_are_api_handlers() {
        let handler = |req: Request| async move {
            Ok::<_, Error>(Reply::from(Response::ok(serde_json::json!({ "path": req.path() }))))
        };
        let reply = ApiHandler::call(&handler, request()).await.unwrap();
        assert_eq!(reply.into_response().status, 200);
    }

    #[tokio::test]
    async fn stream_channel_connects_both_sides() {
        let (producer, mut reply) = stream_channel(4);
        producer.frames.send(Bytes::from_static(b"a")).await.unwrap();
        assert_eq!(reply.frames.recv().await.unwrap(), Bytes::from_static(b"a"));

        reply.cancel.cancel();
        assert!(producer.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn closures_are_stream_handlers() {
        let handler = |_req: Request| async move {
            let (_producer, reply) = stream_channel(1);
            Ok::<_, Error>(reply)
        };
        let reply = StreamHandler::call(&handler, request()).await.unwrap();
        assert!(!reply.cancel.is_cancelled());
    }
}
