//! Subprocess execution with deadlines.
//!
//! Everything that touches an external program (systemctl, testparm,
//! exportfs) goes through here.

mod subprocess;
mod timeout;

pub use subprocess::{SubprocessBuilder, SubprocessResult};
pub use timeout::{sanitize_output, with_timeout};
