//! Default constants for link settlement and credit.

/// Default credit granted by a receiver at attach.
pub(crate) const DEFAULT_INITIAL_CREDIT: u32 = 100;

/// Default credit re-granted per arrival under the replenish policy.
pub(crate) const DEFAULT_CREDIT_QUANTUM: u32 = 1;

/// Default time a settled delivery is retained to absorb late dispositions.
pub(crate) const DEFAULT_RETENTION_SECS: u64 = 30;

/// Capacity of the per-link event broadcast channel.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;
