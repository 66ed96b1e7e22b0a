//! Task execution: registry of handlers and the dispatcher that runs them

mod dispatcher;
pub mod handlers;
pub mod registry;

pub use dispatcher::Dispatcher;
pub use handlers::{HandlerContext, HandlerResult};
pub use registry::HandlerRegistry;
