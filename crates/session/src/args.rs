//! CLI arguments for the session service.

use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_PRUNE_INTERVAL_SECS;

/// Session service arguments.
#[derive(Debug, Args, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[command(next_help_heading = "Session")]
#[serde(default)]
pub struct SessionArgs {
    /// Seconds between sweeps of settled deliveries past their retention window
    #[arg(long = "session.prune-interval-secs", default_value_t = DEFAULT_PRUNE_INTERVAL_SECS)]
    pub prune_interval_secs: u64,
}

impl Default for SessionArgs {
    fn default() -> Self {
        Self {
            prune_interval_secs: DEFAULT_PRUNE_INTERVAL_SECS,
        }
    }
}

impl SessionArgs {
    /// Interval between prune sweeps.
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }

    /// Validate argument values.
    pub fn validate(&self) -> Result<(), String> {
        if self.prune_interval_secs == 0 {
            return Err("prune-interval-secs must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        session: SessionArgs,
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["tern"]).expect("no flags");
        assert_eq!(cli.session, SessionArgs::default());
        assert_eq!(cli.session.prune_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let cli = Cli::try_parse_from(["tern", "--session.prune-interval-secs", "0"])
            .expect("parses");
        assert!(cli.session.validate().is_err());
    }
}
