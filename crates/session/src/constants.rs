//! Session service defaults.

/// Seconds between sweeps of settled deliveries.
pub(crate) const DEFAULT_PRUNE_INTERVAL_SECS: u64 = 5;
