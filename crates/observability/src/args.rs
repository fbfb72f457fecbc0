//! CLI arguments for logging.

use clap::Args;
use serde::{Deserialize, Serialize};
use tracing::Level;

/// CLI wrapper for [`tracing::Level`] with clap integration.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    clap::ValueEnum,
    strum::Display,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Informational messages (default).
    #[default]
    Info,
    /// Frame-level detail.
    Debug,
    /// Every delivery state change.
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Self::ERROR,
            LogLevel::Warn => Self::WARN,
            LogLevel::Info => Self::INFO,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Trace => Self::TRACE,
        }
    }
}

/// Logging arguments.
#[derive(Debug, Args, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[command(next_help_heading = "Logging")]
#[serde(default)]
pub struct LoggingArgs {
    /// Log level for tern crates
    #[arg(long = "log.level", value_enum, default_value_t = LogLevel::Info)]
    pub level: LogLevel,

    /// Emit logs as JSON
    #[arg(long = "log.json")]
    pub json: bool,

    /// Filter directives overriding the level, in `RUST_LOG` syntax
    #[arg(long = "log.filter")]
    pub filter: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        logging: LoggingArgs,
    }

    #[test]
    fn test_parse_logging_flags() {
        let cli = Cli::try_parse_from(["tern", "--log.level", "trace", "--log.json"])
            .expect("valid flags");

        assert_eq!(cli.logging.level, LogLevel::Trace);
        assert!(cli.logging.json);
        assert_eq!(Level::from(cli.logging.level), Level::TRACE);
    }

    #[test]
    fn test_level_display_matches_filter_syntax() {
        assert_eq!(LogLevel::Warn.to_string(), "warn");
        assert_eq!(LoggingArgs::default().level, LogLevel::Info);
    }
}
