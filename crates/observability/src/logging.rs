//! Subscriber setup.

use eyre::Context;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::args::LoggingArgs;

/// The filter [`init_logging`] installs.
///
/// Explicit `--log.filter` directives win, then `RUST_LOG`, then
/// `info,tern=<level>`.
pub fn env_filter(args: &LoggingArgs) -> eyre::Result<EnvFilter> {
    if let Some(directives) = &args.filter {
        return EnvFilter::try_new(directives).wrap_err("Invalid log filter");
    }
    Ok(EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,tern={}", args.level))))
}

/// Install the global subscriber.
///
/// Fails if a global subscriber is already set.
pub fn init_logging(args: &LoggingArgs) -> eyre::Result<()> {
    let filter = env_filter(args)?;

    let stdout_layer = fmt::Layer::new().with_target(true);
    let stdout_layer = if args.json {
        stdout_layer.json().boxed()
    } else {
        stdout_layer.with_ansi(true).boxed()
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(filter)
        .try_init()
        .wrap_err("Failed to install tracing subscriber")?;

    Ok(())
}

/// Install a test-writer subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(fmt::Layer::new().with_test_writer())
        .with(filter)
        .try_init();
}
