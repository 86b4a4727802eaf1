//! Policy hook for DTCP ack/nack subtypes the data path does not act on
//! (spec.md §9: "structure the DTCP handling so each bit of the type-mask
//! dispatches to a named policy... so additional policies can be added
//! without perturbing the data path").
//!
//! Grounded on the teacher's `notes/dtcp.rs`, which separates
//! `RetransmissionControl`, `WindowFlowControl` and `RateFlowControl` as
//! distinct strategies under one `Dtcp`; `NackPolicy` plays the same role
//! for `NACK`/`SACK`/`SNACK`, which spec.md's Non-goals leave unimplemented.
use pdu::AckSubtype;

/// The policy applied to a recognised-but-unimplemented ack/nack subtype.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NackPolicy {
    /// Recognised, logged, otherwise a no-op.
    Stub,
}

impl NackPolicy {
    /// Handles `subtype`, which is neither `Ack` (acted on by the data
    /// path) nor a type requiring no action.
    pub fn handle(self, flow_id: u64, subtype: AckSubtype) {
        match self {
            NackPolicy::Stub => {
                log::trace!("flow {flow_id}: {subtype:?} control PDU recognised, policy not implemented");
            }
        }
    }
}

impl Default for NackPolicy {
    fn default() -> Self {
        NackPolicy::Stub
    }
}
