//! Tower middleware applied to registered routes.
//!
//! - [`latency`]: per-route request latency histogram

pub mod latency;

pub use latency::LatencyLayer;
