//! Error types for the NAS service daemon.
//!
//! Provides a unified error handling system using thiserror.

mod types;

pub use types::*;
