pub mod logger;

pub use crate::context::context_middleware;
pub use crate::trace::tracing_middleware;
pub use logger::{get_logger, logger_middleware, set_logger, LogLevel, LoggerOptions};
