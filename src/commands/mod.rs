//! Command handlers module.
//!
//! Contains the command registry and all command implementations.
//!
//! ## Adding a New Command
//!
//! 1. Create a new file in the appropriate subdirectory (`service/`, `system/`)
//! 2. Implement the `Command` trait
//! 3. Register the command in `CommandRegistry::new()`

mod registry;
mod traits;
mod types;

pub mod service;
pub mod system;

pub use registry::{CommandDeps, CommandRegistry};
pub use traits::Command;
pub use types::{CommandParams, CommandResult, ExecutionContext};
