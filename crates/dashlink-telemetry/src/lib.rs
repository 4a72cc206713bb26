//! Prometheus metrics and structured logging for dashlink.
//!
//! - Structured logging with tracing (JSON in production)
//! - Prometheus metrics for the stream connection, data delivery and chart sync

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
