//! Demo service used for manual and end-to-end testing.
//!
//! Serves an in-memory item store and a tick stream:
//! - `GET /items/{id}`, `POST /items`, `DELETE /items/{id}`
//! - `GET /ticks` (WebSocket): one binary frame per interval until the peer leaves

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use clap::Parser;
use corekit_core::apikit::ERR_ENTITY_NOT_FOUND;
use corekit_core::errors::Error;
use corekit_core::Pinger;
use corekit_server::{
    stream_channel, Reply, Request, Response, Sender, SenderOptions, Service, ServiceConfig,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "test-server", version, about = "corekit demo service")]
struct Args {
    /// Bind host.
    #[arg(long, env = "COREKIT_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Bind port; 0 picks a free one.
    #[arg(long, env = "COREKIT_PORT", default_value_t = 8080)]
    port: u16,

    /// Service name, also the metrics namespace.
    #[arg(long, env = "COREKIT_NAME", default_value = "items")]
    name: String,

    /// Base address of an upstream service checked by readiness.
    #[arg(long, env = "COREKIT_UPSTREAM")]
    upstream: Option<String>,

    /// Interval between stream ticks, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    tick_ms: u64,

    /// Emit logs as JSON.
    #[arg(long, env = "COREKIT_LOG_JSON")]
    json_logs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Item {
    #[serde(default)]
    id: u64,
    name: String,
}

#[derive(Default)]
struct Store {
    next_id: AtomicU64,
    items: RwLock<HashMap<u64, Item>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = ServiceConfig {
        name: args.name.clone(),
        host: args.host.clone(),
        port: args.port,
        ..ServiceConfig::default()
    };
    let store = Arc::new(Store::default());
    let tick = Duration::from_millis(args.tick_ms);

    let mut service = Service::new(config);
    if let Some(upstream) = &args.upstream {
        let sender = Sender::new(upstream.clone(), SenderOptions {
            metrics: Some(service.metrics_provider()),
            ..SenderOptions::default()
        });
        service = service.dependency(Arc::new(sender) as Arc<dyn Pinger>);
    }

    let get_store = Arc::clone(&store);
    let post_store = Arc::clone(&store);
    let delete_store = Arc::clone(&store);
    let mut service = service
        .get("/items/{id}", move |req: Request| {
            let store = Arc::clone(&get_store);
            async move {
                let id = parse_id(&req)?;
                let item = store.items.read().get(&id).cloned();
                match item {
                    Some(item) => Reply::payload(&item),
                    None => Err(Error::new(ERR_ENTITY_NOT_FOUND)),
                }
            }
        })
        .post("/items", move |req: Request| {
            let store = Arc::clone(&post_store);
            async move {
                let mut item: Item = req.unmarshal()?;
                item.id = store.next_id.fetch_add(1, Ordering::Relaxed) + 1;
                store.items.write().insert(item.id, item);
                Ok::<_, Error>(Reply::Empty)
            }
        })
        .delete("/items/{id}", move |req: Request| {
            let store = Arc::clone(&delete_store);
            async move {
                let id = parse_id(&req)?;
                match store.items.write().remove(&id) {
                    Some(_) => Ok(Reply::from(Response::no_content())),
                    None => Err(Error::new(ERR_ENTITY_NOT_FOUND)),
                }
            }
        })
        .stream("/ticks", move |_req: Request| async move {
            let (producer, reply) = stream_channel(16);
            tokio::spawn(async move {
                let mut n: u64 = 0;
                let mut interval = tokio::time::interval(tick);
                loop {
                    tokio::select! {
                        () = producer.cancel.cancelled() => break,
                        _ = interval.tick() => {
                            n += 1;
                            if producer.frames.send(Bytes::from(n.to_string())).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
            Ok::<_, Error>(reply)
        });

    let port = service.start().await?;
    info!(port, "test server listening");
    service.serve(shutdown_signal()).await
}

fn parse_id(req: &Request) -> Result<u64, Error> {
    req.param("id")
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| Error::new(ERR_ENTITY_NOT_FOUND))
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
