//! Relaying and Multiplexing Task (spec.md §4.4).
//!
//! Looks up the chosen lower flow for a destination address in the PDU
//! Forwarding Table, pushes to it, loops back PDUs addressed to this IPCP's
//! own address straight to the receive pipeline, and holds a small bounded
//! deferred-transmission queue for the non-blocking backpressure case.
//!
//! Grounded on the teacher's `dtp/src/dtp.rs` `InnerDtpSocket`, which
//! multiplexes several logical channels over one underlying transport behind
//! a `Mutex`-guarded lookup table; here the lookup table is the `pduft`
//! crate and the "channels" are lower (N-1) flows.
#![deny(missing_docs)]
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use pdu::{Address, Buffer, RateLimitedLog};
use pduft::{FlowId, PduForwardingTable};

/// Upper bound on the RMT's deferred-transmission queue (spec.md §4.4).
pub const RMTQ_MAX_LEN: usize = 64;

/// Errors surfaced by [`Rmt::transmit`] (spec.md §7).
#[derive(Debug, thiserror::Error)]
pub enum RmtError {
    /// No PDUFT entry for a non-local destination.
    #[error("no route to address {0}")]
    HostUnreachable(Address),
    /// A lower flow id has no lower flow registered for it.
    #[error("no lower flow registered for id {0}")]
    NoSuchLowerFlow(FlowId),
    /// The lower flow itself reported an error (not backpressure).
    #[error("lower flow error: {0}")]
    Lower(String),
}

/// Outcome of a lower flow write attempt. `WouldBlock` returns the buffer
/// so the caller — here, the RMT — retains ownership and can queue or retry
/// it, per spec.md §7 ("the caller must retain ownership of the buffer and
/// retry").
pub enum WriteOutcome {
    /// The PDU was accepted by the lower flow.
    Sent,
    /// The lower flow is backpressured; the buffer is returned unconsumed.
    WouldBlock(Buffer),
}

/// A lower (N-1) flow as seen by the RMT.
pub trait LowerFlow: Send + Sync {
    /// Attempts to write `pdu`. Must not free `pdu` on `WouldBlock`.
    fn write(&self, pdu: Buffer, may_block: bool) -> Result<WriteOutcome, String>;

    /// Blocks the calling thread until this flow's transmit wait-queue
    /// wakes it (spec.md §4.4 step 5, `may_block = true` case).
    fn wait_writable(&self);
}

/// Receives a PDU addressed to this IPCP's own address (spec.md §4.4 step
/// 3, loopback). Implemented by the receive pipeline in the facade crate;
/// `rmt` only holds a handle to avoid a `rmt` -> receive-pipeline ->
/// `rmt` crate cycle (receive pipeline already depends on `rmt` to forward
/// non-local PDUs).
pub trait LocalDelivery: Send + Sync {
    /// Hands `pdu` to the local receive pipeline.
    fn deliver_local(&self, pdu: Buffer);
}

/// The Relaying and Multiplexing Task.
pub struct Rmt {
    own_address: AtomicU64,
    pduft: Arc<PduForwardingTable>,
    lower_flows: Mutex<HashMap<FlowId, Arc<dyn LowerFlow>>>,
    rmtq: Mutex<VecDeque<(FlowId, Buffer)>>,
    local: Arc<dyn LocalDelivery>,
    drop_log: RateLimitedLog,
}

impl Rmt {
    /// Creates an RMT for an IPCP whose own address is `own_address`,
    /// sharing `pduft` with the rest of the IPCP and delivering loopback
    /// PDUs to `local`.
    pub fn new(own_address: Address, pduft: Arc<PduForwardingTable>, local: Arc<dyn LocalDelivery>) -> Self {
        Rmt {
            own_address: AtomicU64::new(own_address),
            pduft,
            lower_flows: Mutex::new(HashMap::new()),
            rmtq: Mutex::new(VecDeque::new()),
            local,
            drop_log: RateLimitedLog::default(),
        }
    }

    /// Updates this IPCP's own address (spec.md §6.2 `config(ipcp,
    /// "address", value)`), changing which destination addresses loop back
    /// instead of being routed through the PDUFT.
    pub fn set_own_address(&self, own_address: Address) {
        self.own_address.store(own_address, Ordering::SeqCst);
    }

    /// Registers a lower flow so PDUFT entries pointing at `id` can be
    /// transmitted through it.
    pub fn register_lower_flow(&self, id: FlowId, flow: Arc<dyn LowerFlow>) {
        self.lower_flows.lock().unwrap().insert(id, flow);
    }

    /// Unregisters a lower flow (its transport has gone away).
    pub fn unregister_lower_flow(&self, id: FlowId) {
        self.lower_flows.lock().unwrap().remove(&id);
    }

    /// Transmits `pdu` towards `dest` (spec.md §4.4).
    pub fn transmit(&self, dest: Address, pdu: Buffer, may_block: bool) -> Result<(), RmtError> {
        if dest == self.own_address.load(Ordering::SeqCst) {
            self.local.deliver_local(pdu);
            return Ok(());
        }

        let flow_id = self
            .pduft
            .lookup(dest)
            .ok_or(RmtError::HostUnreachable(dest))?;
        self.transmit_via(flow_id, pdu, may_block)
    }

    /// Transmits `pdu` directly through lower flow `flow_id`, bypassing the
    /// PDUFT (spec.md §4.9 "direct flow selection" for port-routed
    /// management PDUs).
    pub fn transmit_via(&self, flow_id: FlowId, pdu: Buffer, may_block: bool) -> Result<(), RmtError> {
        let lower = self.lower_flows.lock().unwrap().get(&flow_id).cloned();
        let lower = lower.ok_or(RmtError::NoSuchLowerFlow(flow_id))?;

        let mut pdu = pdu;
        loop {
            match lower.write(pdu, may_block).map_err(RmtError::Lower)? {
                WriteOutcome::Sent => return Ok(()),
                WriteOutcome::WouldBlock(returned) => {
                    if may_block {
                        lower.wait_writable();
                        pdu = returned;
                        continue;
                    }
                    self.defer(flow_id, returned);
                    return Ok(());
                }
            }
        }
    }

    fn defer(&self, flow_id: FlowId, pdu: Buffer) {
        let mut q = self.rmtq.lock().unwrap();
        if q.len() < RMTQ_MAX_LEN {
            q.push_back((flow_id, pdu));
        } else {
            self.drop_log.log(|suppressed| {
                log::warn!(
                    "rmt: deferred-transmission queue full, dropping PDU for flow {flow_id} \
                     ({suppressed} earlier drops suppressed)"
                );
            });
        }
    }

    /// Called on a transmit-completion notification from a lower flow:
    /// retries as many deferred PDUs for that flow as it will currently
    /// accept.
    pub fn on_transmit_ready(&self, flow_id: FlowId) {
        let Some(lower) = self.lower_flows.lock().unwrap().get(&flow_id).cloned() else {
            return;
        };
        loop {
            let next = {
                let mut q = self.rmtq.lock().unwrap();
                let pos = q.iter().position(|(f, _)| *f == flow_id);
                pos.map(|i| q.remove(i).unwrap())
            };
            let Some((_, pdu)) = next else { return };
            match lower.write(pdu, false) {
                Ok(WriteOutcome::Sent) | Err(_) => continue,
                Ok(WriteOutcome::WouldBlock(returned)) => {
                    self.rmtq.lock().unwrap().push_front((flow_id, returned));
                    return;
                }
            }
        }
    }

    /// Current length of the deferred-transmission queue. Test/diagnostic
    /// helper.
    pub fn deferred_len(&self) -> usize {
        self.rmtq.lock().unwrap().len()
    }
}
