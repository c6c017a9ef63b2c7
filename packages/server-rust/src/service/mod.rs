//! Request/response pipeline for business handlers.
//!
//! 1. **Envelopes** (`request`, `response`): what handlers receive and return
//! 2. **Handlers** (`handler`): `ApiHandler` and `StreamHandler` traits
//! 3. **Negotiation** (`negotiate`): codec selection for bodies and responses
//! 4. **Pipeline** (`pipeline`): invocation, error classification, encoding
//! 5. **Middleware** (`middleware`): Tower layers applied per route

pub mod handler;
pub mod middleware;
pub mod negotiate;
pub mod pipeline;
pub mod request;
pub mod response;

// Re-export key types for convenient access.
pub use handler::{stream_channel, ApiHandler, HandlerFuture, StreamHandler, StreamProducer, StreamReply};
pub use negotiate::Negotiator;
pub use pipeline::{api_error_convertor, ErrorConvertor, Pipeline};
pub use request::Request;
pub use response::{Reply, Response};
