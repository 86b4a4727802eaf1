//! Per-flow statistics (spec.md §3 `stats`, §6.2 `flow_get_stats`).
//!
//! Grounded on `notes/dtcp.rs`'s `RetransmissionControl`, the closest the
//! teacher comes to per-flow counters, generalised into the named counters
//! spec.md §3/§4.6 call for.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlowStats {
    pub tx_pdus: u64,
    pub tx_bytes: u64,
    pub rx_pdus: u64,
    pub rx_bytes: u64,
    /// Duplicates, too-far-ahead gaps, reorder-queue and RMT-queue
    /// overflow: every silently-dropped condition spec.md §7 names.
    pub rx_err: u64,
    pub dropped: u64,
}
