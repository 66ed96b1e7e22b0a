//! External command execution
//!
//! Handlers and status aggregators never touch `std::process` directly.
//! They go through [`CommandRunner`] so tests can script the outside world.

mod system;
mod traits;

#[cfg(test)]
pub mod fake;

pub use system::SystemRunner;
pub use traits::{ChildProcess, Cmd, CommandRunner};
