//! Detached continuations
//!
//! Background work spawned by a handler that outlives the handler's return.
//! Progress is observable only through the option the continuation updates.

mod supervisor;
mod wait;

pub use supervisor::ContinuationSupervisor;
pub use wait::{wait_for_any_file, wait_for_exit};
