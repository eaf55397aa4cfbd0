//! Health checking for the daemon and the services it manages.

mod checker;
mod probe;
mod status;

pub use checker::{
    evaluate_services, evaluate_storage, evaluate_system, BasicHealth, HealthChecker, Liveness,
    Readiness,
};
pub use probe::{probe_from_config, DatabaseProbe, NoDatabase, SqliteProbe, TcpProbe};
pub use status::{CheckResult, HealthReport, HealthStatus};
