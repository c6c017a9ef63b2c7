//! Service hosting: configuration, lifecycle, HTTP middleware, built-in
//! endpoints and streaming sessions.

pub mod config;
pub mod handlers;
pub mod lifecycle;
pub mod middleware;
pub mod module;
pub mod session;

pub use config::{ReadTimeoutPolicy, ServiceConfig, StreamConfig, MIN_PING_PERIOD};
pub use handlers::OpsState;
pub use lifecycle::{InFlightGuard, Lifecycle, LifecycleState};
pub use module::{Service, INFO_PATH, LIVENESS_PATH, METRICS_PATH, READINESS_PATH};
pub use session::{CloseReason, Frame, Session, SessionState, Socket, SocketError};
