//! Read-only host and service metrics.

mod collector;
mod exposition;
pub mod system;

pub use collector::{DaemonMetrics, MetricsCollector, MetricsSnapshot, SystemMetrics};
pub use exposition::render_exposition;
