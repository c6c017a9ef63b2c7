//! Configuration types for the service host and streaming sessions.

use std::time::Duration;

/// Lower bound for the keep-alive interval; the timer cannot tick faster.
pub const MIN_PING_PERIOD: Duration = Duration::from_millis(1);

/// Top-level configuration for a [`Service`](super::Service).
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Service name, used as the metrics namespace and in `/_service/info`.
    pub name: String,
    /// Service version reported by `/_service/info` and the sender's `User-Agent`.
    pub version: String,
    /// Bind address.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Maximum time to wait for a request to complete.
    pub request_timeout: Duration,
    /// Upper bound on waiting for in-flight requests after shutdown.
    pub drain_timeout: Duration,
    /// Maximum accepted request body size in bytes.
    pub body_limit: usize,
    /// Per-session streaming settings.
    pub stream: StreamConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "corekit".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            host: "0.0.0.0".to_string(),
            port: 0,
            request_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(30),
            body_limit: 2 * 1024 * 1024,
            stream: StreamConfig::default(),
        }
    }
}

/// What a streaming session does when the peer stays silent past `pong_wait`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadTimeoutPolicy {
    /// Keep the session open; only write failures tear it down.
    #[default]
    Ignore,
    /// Tear the session down once the read deadline passes.
    Close,
}

/// Timing and sizing for a streaming session.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Deadline for every socket write, data frames and control frames alike.
    pub write_wait: Duration,
    /// Read deadline, extended each time a pong arrives.
    pub pong_wait: Duration,
    /// Largest inbound frame accepted from the peer, in bytes.
    pub max_message_size: usize,
    /// Behaviour when the read deadline passes.
    pub read_timeout_policy: ReadTimeoutPolicy,
}

impl StreamConfig {
    /// Keep-alive interval: nine tenths of `pong_wait`, so a ping always goes
    /// out before the peer's liveness window closes. Never shorter than
    /// [`MIN_PING_PERIOD`].
    #[must_use]
    pub fn ping_period(&self) -> Duration {
        (self.pong_wait * 9 / 10).max(MIN_PING_PERIOD)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
            max_message_size: 1024,
            read_timeout_policy: ReadTimeoutPolicy::Ignore,
        }
    }
}
