//! Logging for tern processes and tests.
//!
//! [`init_logging`] installs a global `tracing` subscriber configured from
//! [`LoggingArgs`]; [`init_test_logging`] is the quiet variant for tests.

mod args;
mod logging;

pub use args::{LogLevel, LoggingArgs};
pub use logging::{env_filter, init_logging, init_test_logging};
