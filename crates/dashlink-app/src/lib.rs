//! dashlink host application.
//!
//! Wires the components together:
//! - Stream multiplexer over one provider connection
//! - Chart synchronizer with one live chart per configured stream
//! - Event bridge from both event buses to logs and Prometheus metrics

pub mod app;
pub mod bridge;
pub mod config;
pub mod error;
pub mod live_chart;

pub use app::Application;
pub use config::{AppConfig, StreamTarget};
pub use error::{AppError, AppResult};
pub use live_chart::LiveChart;
