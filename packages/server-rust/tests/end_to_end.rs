//! End-to-end tests: a real listener, the HTTP sender, and WebSocket clients.

use std::sync::Arc;
use std::time::Duration;

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method, StatusCode};
use bytes::Bytes;
use corekit_core::apikit::{ApiError, ERR_DECODE_REQUEST, ERR_ENTITY_NOT_FOUND, ERR_PERMISSION_DENIED};
use corekit_core::codec::MSGPACK;
use corekit_core::errors::Error;
use corekit_core::testkit::{assert_api_error, wait};
use corekit_core::Pinger;
use corekit_server::network::Lifecycle;
use corekit_server::{
    stream_channel, Endpoint, Reply, Request, Sender, SenderOptions, SenderRequest, SenderResponse,
    Service, ServiceConfig,
};
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Greeting {
    name: String,
}

struct Running {
    port: u16,
    lifecycle: Arc<Lifecycle>,
    shutdown: Option<oneshot::Sender<()>>,
    served: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl Running {
    fn address(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.served.await.unwrap().unwrap();
    }
}

/// Starts `service` on an OS-assigned port and serves it in the background.
async fn spawn(service: Service) -> Running {
    let mut service = service;
    let port = service.start().await.unwrap();
    let lifecycle = service.lifecycle();
    let (tx, rx) = oneshot::channel::<()>();
    let served = tokio::spawn(service.serve(async move {
        let _ = rx.await;
    }));
    Running {
        port,
        lifecycle,
        shutdown: Some(tx),
        served,
    }
}

fn config() -> ServiceConfig {
    ServiceConfig {
        name: "e2e".into(),
        host: "127.0.0.1".into(),
        drain_timeout: Duration::from_secs(2),
        ..ServiceConfig::default()
    }
}

fn greeting_service() -> Service {
    Service::new(config())
        .post("/greetings", |req: Request| async move {
            let greeting: Greeting = req.unmarshal()?;
            Reply::payload(&json!({ "message": format!("hello {}", greeting.name) }))
        })
        .put("/greetings/{name}", |_req: Request| async { Ok::<_, Error>(Reply::Empty) })
        .get("/greetings/{name}", |req: Request| async move {
            match req.param("name") {
                Some("admin") => Err(Error::new(ERR_PERMISSION_DENIED)),
                Some(name) => Reply::payload(&Greeting { name: name.to_owned() }),
                None => Err(Error::new(ERR_ENTITY_NOT_FOUND)),
            }
        })
        .get("/missing", |_req: Request| async {
            Err::<Reply, _>(Error::new(ERR_ENTITY_NOT_FOUND))
        })
}

fn sender(running: &Running) -> Sender {
    Sender::new(running.address(), SenderOptions::default())
}

// ---------------------------------------------------------------------------
// Request/response through the sender
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sender_round_trips_json_payload() {
    let running = spawn(greeting_service()).await;
    let sender = sender(&running);

    let req = SenderRequest::new(Method::POST, Endpoint::new("/greetings"))
        .with_payload(&Greeting { name: "ann".into() })
        .unwrap();
    let answer: serde_json::Value = sender.send(req).await.unwrap();
    assert_eq!(answer, json!({"message": "hello ann"}));

    running.stop().await;
}

#[tokio::test]
async fn sender_round_trips_msgpack_payload() {
    let running = spawn(greeting_service()).await;
    let sender = sender(&running);

    let req = SenderRequest::new(Method::GET, Endpoint::new("/greetings/{}").param("bob"))
        .with_header(CONTENT_TYPE, HeaderValue::from_static(MSGPACK))
        .with_payload(&json!({}))
        .unwrap();
    let response = sender.send_with_response(req).await.unwrap();
    assert_eq!(response.headers[CONTENT_TYPE], MSGPACK);
    let greeting: Greeting = response.unmarshal().unwrap();
    assert_eq!(greeting, Greeting { name: "bob".into() });

    running.stop().await;
}

#[tokio::test]
async fn empty_reply_is_201() {
    let running = spawn(greeting_service()).await;
    let response = sender(&running)
        .send_with_response(SenderRequest::new(
            Method::PUT,
            Endpoint::new("/greetings/{}").param("x"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::CREATED);
    assert!(response.body.is_empty());

    running.stop().await;
}

#[tokio::test]
async fn business_errors_cross_the_wire() {
    let running = spawn(greeting_service()).await;
    let sender = sender(&running);

    let err = sender
        .send_with_response(SenderRequest::new(Method::GET, Endpoint::new("/missing")))
        .await
        .unwrap_err();
    assert_api_error(&err, &ERR_ENTITY_NOT_FOUND);
    let ctx = err.context().unwrap();
    assert_eq!(ctx.get("http_path").and_then(|v| v.as_str()), Some("/missing"));
    assert_eq!(ctx.get("response_status").map(ToString::to_string).as_deref(), Some("404"));

    let err = sender
        .send_with_response(SenderRequest::new(
            Method::GET,
            Endpoint::new("/greetings/{}").param("admin"),
        ))
        .await
        .unwrap_err();
    assert_api_error(&err, &ERR_PERMISSION_DENIED);

    running.stop().await;
}

#[tokio::test]
async fn strict_decoding_rejects_unknown_fields() {
    let running = spawn(greeting_service()).await;
    let req = SenderRequest::new(Method::POST, Endpoint::new("/greetings"))
        .with_payload(&json!({"name": "ann", "extra": true}))
        .unwrap();
    let err = sender(&running).send_with_response(req).await.unwrap_err();
    let api = err.find::<ApiError>().unwrap();
    assert_eq!(api.sub_code, ERR_DECODE_REQUEST.sub_code);

    running.stop().await;
}

#[tokio::test]
#[should_panic(expected = "error handler should return an error")]
async fn error_handler_returning_none_panics() {
    let running = spawn(greeting_service()).await;
    let sender = Sender::new(
        running.address(),
        SenderOptions {
            error_handler: Arc::new(|_resp: &SenderResponse| -> Option<Error> { None }),
            ..SenderOptions::default()
        },
    );
    let _ = sender
        .send_with_response(SenderRequest::new(Method::GET, Endpoint::new("/missing")))
        .await;
}

// ---------------------------------------------------------------------------
// Ops endpoints and readiness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_and_wait_against_liveness() {
    let running = spawn(greeting_service()).await;
    let sender = sender(&running);
    sender.ping().await.unwrap();
    wait(&sender, Duration::from_millis(20)).await.unwrap();
    running.stop().await;
}

#[tokio::test]
async fn ping_fails_when_nothing_listens() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let sender = Sender::new(format!("http://127.0.0.1:{port}"), SenderOptions::default());
    let err = sender.ping().await.unwrap_err();
    let ctx = err.context().unwrap();
    assert_eq!(ctx.get("method").and_then(|v| v.as_str()), Some("ping"));
    assert_eq!(ctx.get("action").and_then(|v| v.as_str()), Some("send_request"));
}

#[tokio::test]
async fn readiness_reflects_dependencies() {
    let upstream = spawn(greeting_service()).await;
    let upstream_sender = Arc::new(sender(&upstream));
    let running = spawn(greeting_service().dependency(upstream_sender)).await;

    let readiness = Sender::new(
        running.address(),
        SenderOptions {
            health_path: corekit_server::network::READINESS_PATH.to_owned(),
            ..SenderOptions::default()
        },
    );
    readiness.ping().await.unwrap();

    upstream.stop().await;
    assert!(readiness.ping().await.is_err());

    running.stop().await;
}

#[tokio::test]
async fn shutdown_drains_and_stops() {
    let running = spawn(greeting_service()).await;
    let lifecycle = Arc::clone(&running.lifecycle);
    running.stop().await;
    assert_eq!(lifecycle.state(), corekit_server::network::LifecycleState::Stopped);
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

fn ticking_service(cancelled: Arc<Mutex<Option<CancellationToken>>>) -> Service {
    Service::new(config())
        .stream("/ticks", move |_req: Request| {
            let cancelled = Arc::clone(&cancelled);
            async move {
                let (producer, reply) = stream_channel(4);
                *cancelled.lock() = Some(producer.cancel.clone());
                tokio::spawn(async move {
                    let mut n = 0u32;
                    loop {
                        n += 1;
                        tokio::select! {
                            () = producer.cancel.cancelled() => break,
                            sent = producer.frames.send(Bytes::from(n.to_string())) => {
                                if sent.is_err() {
                                    break;
                                }
                            }
                        }
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                });
                Ok::<_, Error>(reply)
            }
        })
        .stream("/forbidden", |_req: Request| async {
            Err::<corekit_server::StreamReply, _>(Error::new(ERR_PERMISSION_DENIED))
        })
}

async fn cancelled_within(token: &CancellationToken, limit: Duration) -> bool {
    tokio::time::timeout(limit, token.cancelled()).await.is_ok()
}

#[tokio::test]
async fn stream_delivers_frames_in_order() {
    let slot = Arc::new(Mutex::new(None));
    let running = spawn(ticking_service(Arc::clone(&slot))).await;

    let url = format!("ws://127.0.0.1:{}/ticks", running.port);
    let (mut ws, _resp) = tokio_tungstenite::connect_async(&url).await.unwrap();

    let mut seen = Vec::new();
    while seen.len() < 3 {
        if let Message::Binary(data) = ws.next().await.unwrap().unwrap() {
            seen.push(data);
        }
    }
    assert_eq!(
        seen,
        vec![Bytes::from_static(b"1"), Bytes::from_static(b"2"), Bytes::from_static(b"3")]
    );

    ws.close(None).await.unwrap();
    let token = slot.lock().clone().unwrap();
    assert!(cancelled_within(&token, Duration::from_secs(2)).await);

    running.stop().await;
}

#[tokio::test]
async fn client_drop_cancels_producer() {
    let slot = Arc::new(Mutex::new(None));
    let running = spawn(ticking_service(Arc::clone(&slot))).await;

    let url = format!("ws://127.0.0.1:{}/ticks", running.port);
    let (mut ws, _resp) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let _ = ws.next().await;
    drop(ws);

    let token = slot.lock().clone().unwrap();
    assert!(cancelled_within(&token, Duration::from_secs(2)).await);

    running.stop().await;
}

#[tokio::test]
async fn shutdown_closes_open_streams() {
    let slot = Arc::new(Mutex::new(None));
    let running = spawn(ticking_service(Arc::clone(&slot))).await;

    let url = format!("ws://127.0.0.1:{}/ticks", running.port);
    let (mut ws, _resp) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let _ = ws.next().await;
    let token = slot.lock().clone().unwrap();

    running.stop().await;
    assert!(token.is_cancelled());

    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                None | Some(Err(_) | Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn stream_handler_error_is_answered_over_http() {
    let running = spawn(ticking_service(Arc::new(Mutex::new(None)))).await;

    let url = format!("ws://127.0.0.1:{}/forbidden", running.port);
    match tokio_tungstenite::connect_async(&url).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
        }
        Err(other) => panic!("expected an HTTP rejection, got {other:?}"),
        Ok(_) => panic!("expected an HTTP rejection, got an upgrade"),
    }

    running.stop().await;
}
