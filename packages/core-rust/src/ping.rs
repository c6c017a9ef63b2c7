//! Health-check abstraction for external dependencies.
//!
//! The service host evaluates every registered [`Pinger`] on each readiness
//! probe. The server crate's HTTP sender implements it against a remote
//! liveness path.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::Error;

/// A dependency that can report whether it is reachable.
#[async_trait]
pub trait Pinger: Send + Sync {
    /// Checks the dependency once.
    async fn ping(&self) -> Result<(), Error>;
}

#[async_trait]
impl<P: Pinger + ?Sized> Pinger for Arc<P> {
    async fn ping(&self) -> Result<(), Error> {
        (**self).ping().await
    }
}

/// Adapts an async closure into a [`Pinger`].
pub struct PingerFn<F>(pub F);

#[async_trait]
impl<F, Fut> Pinger for PingerFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Error>> + Send,
{
    async fn ping(&self) -> Result<(), Error> {
        (self.0)().await
    }
}

/// Pings the wrapped dependency until it succeeds once, then reports success
/// forever without contacting it again.
///
/// Concurrent callers are serialized while the dependency has not yet
/// succeeded, so at most one check is in flight.
pub struct OncePinger<P> {
    inner: P,
    succeeded: AtomicBool,
    lock: Mutex<()>,
}

impl<P: Pinger> OncePinger<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            succeeded: AtomicBool::new(false),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl<P: Pinger> Pinger for OncePinger<P> {
    async fn ping(&self) -> Result<(), Error> {
        if self.succeeded.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.lock.lock().await;
        if self.succeeded.load(Ordering::Acquire) {
            return Ok(());
        }
        self.inner.ping().await?;
        self.succeeded.store(true, Ordering::Release);
        Ok(())
    }
}
