//! corekit server: service host, request pipeline, content negotiation,
//! WebSocket streaming sessions and the HTTP sender.

pub mod metrics;
pub mod network;
pub mod sender;
pub mod service;

pub use metrics::MetricsProvider;
pub use network::{Service, ServiceConfig, StreamConfig};
pub use sender::{Endpoint, Sender, SenderOptions, SenderRequest, SenderResponse};
pub use service::{stream_channel, Reply, Request, Response, StreamProducer, StreamReply};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
