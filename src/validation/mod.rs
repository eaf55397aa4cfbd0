//! Input validation module.
//!
//! Validators for share records: paths, share names, access users and NFS
//! client networks.

mod path;
mod share;

pub use path::validate_share_path;
pub use share::{validate_access_user, validate_client_network, validate_share_name};
