//! Streaming session: forwards a handler's frames over a WebSocket.
//!
//! A session owns the socket after the upgrade. It forwards outbound frames
//! under a write deadline, pings the peer every `ping_period`, extends the
//! read deadline on each pong and tears everything down exactly once:
//! the handler's cancel token fires, a close frame is attempted, and the
//! remaining frames are drained so the producer never blocks.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::SinkExt;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::debug;

use super::config::{ReadTimeoutPolicy, StreamConfig};
use crate::metrics::MetricsProvider;
use crate::service::StreamReply;

// ---------------------------------------------------------------------------
// Socket abstraction
// ---------------------------------------------------------------------------

/// A frame on the wire, reduced to what a session cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close,
    /// Text or anything else the session does not act on.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SocketError {
    #[error("socket closed")]
    Closed,
    #[error("write deadline exceeded")]
    WriteTimeout,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Duplex frame transport driven by a [`Session`].
#[async_trait]
pub trait Socket: Send {
    async fn send(&mut self, frame: Frame) -> Result<(), SocketError>;

    /// Next inbound frame; `None` once the peer is gone.
    async fn recv(&mut self) -> Option<Result<Frame, SocketError>>;

    async fn close(&mut self) -> Result<(), SocketError>;
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Binary(data) => Frame::Binary(data),
            Message::Ping(data) => Frame::Ping(data),
            Message::Pong(data) => Frame::Pong(data),
            Message::Close(_) => Frame::Close,
            Message::Text(_) => Frame::Other,
        }
    }
}

#[async_trait]
impl Socket for WebSocket {
    async fn send(&mut self, frame: Frame) -> Result<(), SocketError> {
        let message = match frame {
            Frame::Binary(data) => Message::Binary(data),
            Frame::Ping(data) => Message::Ping(data),
            Frame::Pong(data) => Message::Pong(data),
            Frame::Close => Message::Close(None),
            Frame::Other => return Ok(()),
        };
        WebSocket::send(self, message)
            .await
            .map_err(|e| SocketError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Frame, SocketError>> {
        let message = WebSocket::recv(self).await?;
        Some(
            message
                .map(Frame::from)
                .map_err(|e| SocketError::Transport(e.to_string())),
        )
    }

    async fn close(&mut self) -> Result<(), SocketError> {
        <Self as SinkExt<Message>>::close(self)
            .await
            .map_err(|e| SocketError::Transport(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Session lifecycle. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Upgrading,
    Active,
    Closing,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Writing a data frame failed or missed its deadline.
    WriteFailed,
    /// Writing a keep-alive ping failed or missed its deadline.
    KeepAliveFailed,
    /// No pong within `pong_wait` under [`ReadTimeoutPolicy::Close`].
    ReadTimeout,
    /// The peer sent a close frame or the connection dropped.
    PeerClosed,
    /// The handler dropped its frame sender.
    ProducerFinished,
    /// The service is shutting down.
    Shutdown,
}

impl CloseReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::WriteFailed => "write_failed",
            CloseReason::KeepAliveFailed => "keep_alive_failed",
            CloseReason::ReadTimeout => "read_timeout",
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::ProducerFinished => "producer_finished",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

enum Event {
    Outbound(Bytes),
    ProducerDone,
    Ping,
    Inbound(Option<Result<Frame, SocketError>>),
    ReadTimeout,
    Shutdown,
    ShutdownGone,
}

/// One upgraded streaming connection.
#[derive(Debug)]
pub struct Session {
    config: StreamConfig,
    metrics: MetricsProvider,
    shutdown: watch::Receiver<bool>,
    state: watch::Sender<SessionState>,
}

impl Session {
    #[must_use]
    pub fn new(
        config: StreamConfig,
        metrics: MetricsProvider,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (state, _rx) = watch::channel(SessionState::Upgrading);
        Self {
            config,
            metrics,
            shutdown,
            state,
        }
    }

    /// Observes state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Drives `socket` until one side ends the stream, then tears down.
    pub async fn run<S: Socket>(mut self, mut socket: S, reply: StreamReply) -> CloseReason {
        let StreamReply { mut frames, cancel } = reply;
        self.state.send_replace(SessionState::Active);
        let active = self.metrics.gauge("stream_sessions_active", &[]);
        active.increment(1.0);

        let reason = self.forward(&mut socket, &mut frames).await;

        self.state.send_replace(SessionState::Closing);
        cancel.cancel();
        if reason != CloseReason::PeerClosed {
            let _ = timeout(self.config.write_wait, socket.send(Frame::Close)).await;
        }
        let _ = timeout(self.config.write_wait, socket.close()).await;
        if reason != CloseReason::ProducerFinished {
            tokio::spawn(drain(frames));
        }

        active.decrement(1.0);
        self.metrics
            .counter(
                "stream_sessions_closed",
                &[("reason", reason.as_str().to_owned())],
            )
            .increment(1);
        debug!(reason = reason.as_str(), "stream session closed");
        self.state.send_replace(SessionState::Closed);
        reason
    }

    async fn forward<S: Socket>(
        &mut self,
        socket: &mut S,
        frames: &mut mpsc::Receiver<Bytes>,
    ) -> CloseReason {
        let ping_period = self.config.ping_period();
        let mut ping = interval_at(Instant::now() + ping_period, ping_period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut read_deadline = Instant::now() + self.config.pong_wait;
        let close_on_timeout = self.config.read_timeout_policy == ReadTimeoutPolicy::Close;
        let mut shutdown_open = true;

        loop {
            if *self.shutdown.borrow_and_update() {
                return CloseReason::Shutdown;
            }

            let event = tokio::select! {
                frame = frames.recv() => match frame {
                    Some(data) => Event::Outbound(data),
                    None => Event::ProducerDone,
                },
                _ = ping.tick() => Event::Ping,
                inbound = socket.recv() => Event::Inbound(inbound),
                () = sleep_until(read_deadline), if close_on_timeout => Event::ReadTimeout,
                changed = self.shutdown.changed(), if shutdown_open => match changed {
                    Ok(()) => Event::Shutdown,
                    Err(_) => Event::ShutdownGone,
                },
            };

            match event {
                Event::Outbound(data) => {
                    if let Err(err) = self.write(socket, Frame::Binary(data)).await {
                        debug!(error = %err, "stream write failed");
                        return CloseReason::WriteFailed;
                    }
                }
                Event::ProducerDone => return CloseReason::ProducerFinished,
                Event::Ping => {
                    if let Err(err) = self.write(socket, Frame::Ping(Bytes::new())).await {
                        debug!(error = %err, "stream keep-alive failed");
                        return CloseReason::KeepAliveFailed;
                    }
                }
                Event::Inbound(Some(Ok(Frame::Pong(_)))) => {
                    read_deadline = Instant::now() + self.config.pong_wait;
                }
                Event::Inbound(Some(Ok(Frame::Close)) | None) => return CloseReason::PeerClosed,
                Event::Inbound(Some(Err(err))) => {
                    debug!(error = %err, "stream read failed");
                    return CloseReason::PeerClosed;
                }
                Event::Inbound(Some(Ok(_))) => {}
                Event::ReadTimeout => return CloseReason::ReadTimeout,
                // Checked at the top of the loop.
                Event::Shutdown => {}
                Event::ShutdownGone => shutdown_open = false,
            }
        }
    }

    async fn write<S: Socket>(&self, socket: &mut S, frame: Frame) -> Result<(), SocketError> {
        match timeout(self.config.write_wait, socket.send(frame)).await {
            Ok(result) => result,
            Err(_) => Err(SocketError::WriteTimeout),
        }
    }
}

/// Consumes frames until every sender is dropped.
pub(crate) async fn drain(mut frames: mpsc::Receiver<Bytes>) {
    while frames.recv().await.is_some() {}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
