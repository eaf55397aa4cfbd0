//! Daemon-wide commands.
//!
//! - `system.ping` - Responsiveness check
//! - `health.liveness` / `health.readiness` / `health.basic` / `health.detailed`
//! - `metrics.json` / `metrics.exposition`

mod health;
mod metrics;
mod ping;

pub use health::{HealthCommand, HealthLevel};
pub use metrics::{MetricsCommand, MetricsFormat};
pub use ping::PingCommand;
