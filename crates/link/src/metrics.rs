//! Link metrics

use metrics::Counter;

/// Counters shared by every link of a process.
#[derive(Clone, Debug)]
pub(crate) struct LinkMetrics {
    /// Transfers handed to the session output
    pub(crate) transfers_sent_total: Counter,
    /// Distinct transfers received
    pub(crate) transfers_received_total: Counter,
    /// Retransmitted transfers suppressed by the tracker
    pub(crate) duplicate_transfers_total: Counter,
    /// Dispositions emitted
    pub(crate) dispositions_sent_total: Counter,
    /// Dispositions applied
    pub(crate) dispositions_received_total: Counter,
    /// Sends refused for lack of credit
    pub(crate) credit_exhausted_total: Counter,
    /// Flow frames granting credit
    pub(crate) credit_grants_total: Counter,
    /// Settled deliveries removed after the retention window
    pub(crate) deliveries_pruned_total: Counter,
}

impl Default for LinkMetrics {
    fn default() -> Self {
        Self {
            transfers_sent_total: metrics::counter!("tern.link.transfers_sent_total"),
            transfers_received_total: metrics::counter!("tern.link.transfers_received_total"),
            duplicate_transfers_total: metrics::counter!("tern.link.duplicate_transfers_total"),
            dispositions_sent_total: metrics::counter!("tern.link.dispositions_sent_total"),
            dispositions_received_total: metrics::counter!(
                "tern.link.dispositions_received_total"
            ),
            credit_exhausted_total: metrics::counter!("tern.link.credit_exhausted_total"),
            credit_grants_total: metrics::counter!("tern.link.credit_grants_total"),
            deliveries_pruned_total: metrics::counter!("tern.link.deliveries_pruned_total"),
        }
    }
}
