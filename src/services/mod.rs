//! Service management module.
//!
//! Contains the typed service model, the per-protocol service kinds and the
//! managers that apply configs and drive service lifecycles.
//!
//! ## Adding a New Protocol
//!
//! 1. Add a variant to `ServiceType` and `ServiceConfig`
//! 2. Create a kind in this directory implementing `ServiceKind`
//! 3. Add a built-in template and return the kind from `kind_for()`

pub mod controller;
mod directives;
mod manager;
mod model;
mod nfs;
mod registry;
mod samba;
mod traits;
mod vsftpd;

pub use controller::{ProcessController, SystemdController, UnitStatus};
pub use directives::{global_directives, restart_required};
pub use manager::{ApplyAction, ApplyFailure, ApplyResult, ServiceManager};
pub use model::{
    select_shares, ControlAction, FtpConfig, NfsConfig, ServiceConfig, ServiceDefinition,
    ServiceState, ServiceStatus, ServiceType, ShareRecord, SmbConfig,
};
pub use nfs::NfsKind;
pub use registry::{kind_for, ServiceRegistry};
pub use samba::SambaKind;
pub use traits::ServiceKind;
pub use vsftpd::VsftpdKind;
