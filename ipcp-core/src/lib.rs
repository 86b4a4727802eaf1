//! IPC Process core: Receive Pipeline (§4.6 non-data-path entry plus
//! demultiplexing) and the management-plane API (§6.2) that wires together
//! the forwarding table, RMT and the per-flow DTP/DTCP state machines.
//!
//! This crate plays the role the teacher's root `src/lib.rs`/`efcp`
//! crate played: the facade a management daemon links against. The
//! teacher's facade additionally carried a Noise-based handshake and
//! protocol-negotiation layer (`negotiation.rs`, `secure.rs`, `disco`);
//! that is out of scope here (see DESIGN.md) and is not carried over.
#![deny(missing_docs)]
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use dtp::config::FlowConfig;
use dtp::{DeliverFn, Flow, FlowError, FlowId, FlowInit, FlowStats};
use pdu::header::{self, CtrlPci, Pci};
use pdu::{Address, Buffer, CepId, PduError, QosId};
use pduft::{EntryId, PduForwardingTable};
use rmt::{LocalDelivery, LowerFlow, Rmt, RmtError};

/// Errors surfaced by the core to the management plane (spec.md §7).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// No PDUFT entry for a non-local destination (spec.md §7).
    #[error("no route to address {0}")]
    HostUnreachable(Address),
    /// Backpressure; caller retains ownership and must retry (spec.md §7).
    #[error("flow is backpressured")]
    WouldBlock,
    /// Buffer lacks reserved prefix for the header (spec.md §7).
    #[error("no header space: {0}")]
    NoHeaderSpace(#[from] PduError),
    /// Malformed management-send request (spec.md §7).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// No flow registered for the given id or CEP-id.
    #[error("unknown flow {0}")]
    UnknownFlow(FlowId),
    /// The RMT could not deliver the PDU.
    #[error("rmt error: {0}")]
    Rmt(#[from] RmtError),
}

impl From<FlowError> for CoreError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::WouldBlock => CoreError::WouldBlock,
            FlowError::NoHeaderSpace(e) => CoreError::NoHeaderSpace(e),
            FlowError::Rmt(e) => CoreError::Rmt(e),
            FlowError::NotControl => CoreError::InvalidArgument("not a control PDU".into()),
        }
    }
}

/// Selects how a management PDU picks its lower flow (spec.md §4.9).
#[derive(Clone, Copy, Debug)]
pub enum MgmtTarget {
    /// Route via the PDUFT as if `address` were a data destination.
    Address(Address),
    /// Send directly out a specific lower (N-1) flow, bypassing the PDUFT.
    LowerFlow(pduft::FlowId),
}

struct Demux {
    flows: Mutex<HashMap<CepId, Arc<Flow>>>,
}

impl LocalDelivery for Demux {
    /// Receive-pipeline entry for PDUs addressed to this IPCP (spec.md §4.6).
    fn deliver_local(&self, pdu: Buffer) {
        let Ok((pci, header_len)) = Pci::decode(pdu.payload()) else {
            log::warn!("ipcp: dropping undecodable PDU");
            return;
        };
        let mut payload_buf = pdu;
        if payload_buf.pop_header(header_len).is_err() {
            log::warn!("ipcp: PDU shorter than its own declared header");
            return;
        }

        let flow = {
            let flows = self.flows.lock().unwrap();
            flows.get(&pci.dst_cep).cloned()
        };
        let Some(flow) = flow else {
            log::warn!("ipcp: no flow for cep-id {}, dropping", pci.dst_cep);
            return;
        };

        if pci.is_ctrl() {
            let _ = flow.receive_ctrl(&pci);
        } else if pci.pdu_type == header::PDU_TYPE_DT {
            flow.receive_data(&pci, payload_buf.payload());
        } else {
            log::warn!("ipcp: unrecognised pdu_type {:#x}, dropping", pci.pdu_type);
        }
    }
}

/// One IPC Process's data-transfer-layer core.
///
/// Owns the forwarding table, the RMT and the flow table (spec.md §2, §6.2).
pub struct Ipcp {
    own_addr: Mutex<Address>,
    pduft: Arc<PduForwardingTable>,
    rmt: Arc<Rmt>,
    demux: Arc<Demux>,
    next_flow_id: Mutex<FlowId>,
    /// Per-flow inbox the upper consumer reads from via [`Ipcp::sdu_read`],
    /// fed by each flow's `DeliverFn` (spec.md §4.6 in-order delivery).
    inboxes: Arc<Mutex<HashMap<CepId, VecDeque<Vec<u8>>>>>,
}

impl Ipcp {
    /// `create(ipcp)` (spec.md §6.2): builds a fresh core with no address
    /// assigned yet, no PDUFT entries and no flows.
    pub fn create() -> Arc<Ipcp> {
        let demux = Arc::new(Demux { flows: Mutex::new(HashMap::new()) });
        let pduft = Arc::new(PduForwardingTable::new());
        let rmt = Arc::new(Rmt::new(0, pduft.clone(), demux.clone()));
        Arc::new(Ipcp {
            own_addr: Mutex::new(0),
            pduft,
            rmt,
            demux,
            next_flow_id: Mutex::new(0),
            inboxes: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// `config(ipcp, "address", value)` (spec.md §6.2): sets own address.
    ///
    /// Only the address key is modelled; other RIB attributes belong to the
    /// out-of-scope management plane.
    pub fn set_address(&self, address: Address) {
        *self.own_addr.lock().unwrap() = address;
        self.rmt.set_own_address(address);
    }

    /// Current own address.
    pub fn address(&self) -> Address {
        *self.own_addr.lock().unwrap()
    }

    /// Registers a lower (N-1) flow the RMT can transmit through.
    pub fn register_lower_flow(&self, id: pduft::FlowId, flow: Arc<dyn LowerFlow>) {
        self.rmt.register_lower_flow(id, flow);
    }

    /// Unregisters a lower flow.
    pub fn unregister_lower_flow(&self, id: pduft::FlowId) {
        self.rmt.unregister_lower_flow(id);
        self.pduft.remove_flow(id);
    }

    /// `pduft_set(ipcp, address, flow)` (spec.md §6.2, §4.2).
    pub fn pduft_set(&self, address: Address, flow: pduft::FlowId) -> EntryId {
        self.pduft.set(address, flow)
    }

    /// `pduft_del(ipcp, entry)` (spec.md §6.2).
    pub fn pduft_del(&self, entry: EntryId) {
        self.pduft.delete(entry);
    }

    /// `pduft_flush(ipcp)` (spec.md §6.2).
    pub fn pduft_flush(&self) {
        self.pduft.flush();
    }

    /// `flow_init(ipcp, flow)` (spec.md §4.8, §6.2): called after the
    /// management plane has populated flow config and CEPs. Returns the new
    /// flow's id.
    pub fn flow_init(
        &self,
        remote_addr: Address,
        local_cep: CepId,
        remote_cep: CepId,
        qos_id: QosId,
        config: FlowConfig,
    ) -> Arc<Flow> {
        let id = {
            let mut next = self.next_flow_id.lock().unwrap();
            let id = *next;
            *next += 1;
            id
        };
        let inboxes = self.inboxes.clone();
        let deliver: DeliverFn = Box::new(move |payload: &[u8]| {
            inboxes
                .lock()
                .unwrap()
                .entry(local_cep)
                .or_default()
                .push_back(payload.to_vec());
        });
        let init = FlowInit {
            id,
            own_addr: self.address(),
            remote_addr,
            local_cep,
            remote_cep,
            qos_id,
            config,
            deliver,
        };
        let flow = Flow::new(init, self.rmt.clone());
        self.demux.flows.lock().unwrap().insert(local_cep, flow.clone());
        flow
    }

    /// `destroy` of a single flow: removes it from the demux table and its
    /// owned PDUFT entries (spec.md §5 "destroying a flow removes all
    /// entries it owns", §6.2).
    pub fn flow_destroy(&self, local_cep: CepId, flow_id: pduft::FlowId) {
        self.demux.flows.lock().unwrap().remove(&local_cep);
        self.pduft.remove_flow(flow_id);
        self.inboxes.lock().unwrap().remove(&local_cep);
    }

    /// `sdu_read(ipcp, flow)` (spec.md §6.2, §4.6): pops the oldest
    /// not-yet-read payload delivered to `local_cep`'s inbox, or `None` if
    /// none is queued.
    pub fn sdu_read(&self, local_cep: CepId) -> Option<Vec<u8>> {
        self.inboxes.lock().unwrap().get_mut(&local_cep)?.pop_front()
    }

    /// `sdu_write(ipcp, flow, buffer, may_block)` (spec.md §6.2, §4.5).
    pub fn sdu_write(&self, flow: &Flow, payload: &[u8], may_block: bool) -> Result<(), CoreError> {
        flow.send(payload, may_block).map_err(CoreError::from)
    }

    /// `sdu_rx(ipcp, buffer)` (spec.md §4.6): entry point for PDUs handed up
    /// by a lower flow. Non-local PDUs are forwarded via the RMT; local
    /// PDUs are demultiplexed to a flow by destination CEP-id.
    pub fn sdu_rx(&self, pdu: Buffer) {
        let Ok((pci, _)) = Pci::decode(pdu.payload()) else {
            log::warn!("ipcp: dropping undecodable PDU on receive");
            return;
        };
        if pci.dst_addr != self.address() {
            // Forwarding errors are swallowed by design (spec.md §4.6).
            let _ = self.rmt.transmit(pci.dst_addr, pdu, false);
            return;
        }
        self.demux.deliver_local(pdu);
    }

    /// `sdu_rx_consumed(flow, buffer)` (spec.md §6.2).
    pub fn sdu_rx_consumed(&self, flow: &Flow) {
        flow.sdu_rx_consumed();
    }

    /// `flow_get_stats(flow)` (spec.md §6.2).
    pub fn flow_get_stats(&self, flow: &Flow) -> FlowStats {
        flow.stats()
    }

    /// `mgmt_sdu_write(ipcp, header, buffer)` (spec.md §4.9, §6.2): builds a
    /// `MGMT` PDU with source = own address and hands it to the chosen
    /// lower flow, either by routing `destination` through the PDUFT or by
    /// direct flow selection when a local lower port is given.
    pub fn mgmt_sdu_write(&self, target: MgmtTarget, payload: &[u8]) -> Result<(), CoreError> {
        let dst_addr = match target {
            MgmtTarget::Address(addr) => addr,
            MgmtTarget::LowerFlow(_) => 0,
        };

        let pci = Pci {
            dst_addr,
            src_addr: self.address(),
            qos_id: 0,
            dst_cep: 0,
            src_cep: 0,
            pdu_type: header::PDU_TYPE_MGMT,
            flags: 0,
            length: payload.len() as u32,
            seq_num: 0,
            ctrl: None as Option<CtrlPci>,
        };
        let header_len = pci.encoded_len();
        let mut buf = Buffer::from_payload(payload, header_len);
        let mut header_bytes = vec![0u8; header_len];
        pci.encode(&mut header_bytes)?;
        buf.push_header(&header_bytes)?;

        match target {
            MgmtTarget::Address(addr) => self.rmt.transmit(addr, buf, false)?,
            MgmtTarget::LowerFlow(flow) => self.rmt.transmit_via(flow, buf, false)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtp::config::{DtcpConfig, FcConfig, RtxConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLower {
        sent: AtomicUsize,
    }
    impl LowerFlow for CountingLower {
        fn write(&self, _pdu: Buffer, _may_block: bool) -> Result<rmt::WriteOutcome, String> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(rmt::WriteOutcome::Sent)
        }
        fn wait_writable(&self) {}
    }

    fn reliable_config() -> FlowConfig {
        FlowConfig {
            dtcp_present: true,
            in_order_delivery: true,
            max_sdu_gap: 0,
            dtcp: DtcpConfig {
                flow_control: true,
                rtx_control: true,
                initial_a_ms: 0,
                fc: FcConfig { max_cwq_len: 8, initial_credit: 4 },
                rtx: RtxConfig { initial_tr_ms: 1000, data_rxms_max: 10, mpl_ms: 1000 },
            },
        }
    }

    #[test]
    fn loopback_flow_send_and_demux_to_receive_data() {
        let ipcp = Ipcp::create();
        ipcp.set_address(1);
        // remote_cep == local_cep so a self-addressed PDU demuxes back to
        // the same flow: own_addr == remote_addr loops it through the RMT
        // straight into the demux, which looks the flow up by dst_cep.
        let flow = ipcp.flow_init(1, 10, 10, 0, reliable_config());
        ipcp.sdu_write(&flow, b"hello", false).unwrap();
        assert_eq!(flow.stats().tx_pdus, 1);
        assert_eq!(flow.stats().rx_pdus, 1);
        assert_eq!(ipcp.sdu_read(10), Some(b"hello".to_vec()));
        assert_eq!(ipcp.sdu_read(10), None);
    }

    #[test]
    fn sdu_rx_forwards_non_local_pdus_via_rmt() {
        let ipcp = Ipcp::create();
        ipcp.set_address(1);
        let lower = Arc::new(CountingLower { sent: AtomicUsize::new(0) });
        ipcp.register_lower_flow(7, lower.clone());
        ipcp.pduft_set(2, 7);

        let pci = Pci {
            dst_addr: 2,
            src_addr: 9,
            qos_id: 0,
            dst_cep: 0,
            src_cep: 0,
            pdu_type: header::PDU_TYPE_DT,
            flags: 0,
            length: 0,
            seq_num: 0,
            ctrl: None,
        };
        let mut buf = Buffer::from_payload(&[], pci.encoded_len());
        let mut bytes = vec![0u8; pci.encoded_len()];
        pci.encode(&mut bytes).unwrap();
        buf.push_header(&bytes).unwrap();

        ipcp.sdu_rx(buf);
        assert_eq!(lower.sent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sdu_rx_drops_when_no_flow_matches_cep() {
        let ipcp = Ipcp::create();
        ipcp.set_address(1);
        let pci = Pci {
            dst_addr: 1,
            src_addr: 9,
            qos_id: 0,
            dst_cep: 999,
            src_cep: 0,
            pdu_type: header::PDU_TYPE_DT,
            flags: 0,
            length: 0,
            seq_num: 0,
            ctrl: None,
        };
        let mut buf = Buffer::from_payload(&[], pci.encoded_len());
        let mut bytes = vec![0u8; pci.encoded_len()];
        pci.encode(&mut bytes).unwrap();
        buf.push_header(&bytes).unwrap();
        // No panic, silent drop.
        ipcp.sdu_rx(buf);
    }
}
