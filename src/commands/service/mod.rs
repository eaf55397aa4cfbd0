//! Service management commands.
//!
//! - `service.apply` - Render, write and activate a service config
//! - `service.start` / `service.stop` / `service.restart` - Lifecycle transitions
//! - `service.status` - Observe one or every service
//! - `service.backups` / `service.prune_backups` - Config backup management

mod apply;
mod backups;
mod control;
mod status;

pub use apply::ApplyServiceCommand;
pub use backups::{ListBackupsCommand, PruneBackupsCommand};
pub use control::ControlServiceCommand;
pub use status::StatusServiceCommand;
