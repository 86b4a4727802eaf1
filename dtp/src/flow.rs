//! Per-flow DTP/DTCP state machine (spec.md §4.5-§4.8).
//!
//! One `Flow` per (local CEP-id, remote CEP-id, remote address) triple
//! (spec.md §3). Adapted from the teacher's `src/dtp.rs` `Dtp` struct (send
//! path only, `failure`-derived `SendError`) and `src/dtcp.rs` `Dtcp`
//! (retransmission-queue bookkeeping), merged into one lock-guarded state
//! machine per spec.md's unified DTP-block data model and extended with the
//! full receive path and control-PDU handling `src/dtp.rs`/`src/dtcp.rs`
//! only sketch.
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use pdu::header::{self, AckSubtype, CtrlPci, Pci};
use pdu::{Address, Buffer, CepId, PduError, QosId, SeqNum};
use rina_timer::TimerSet;
use rmt::{Rmt, RmtError};

use crate::config::{FlowConfig, DEFAULT_DATA_RXMS_MAX, DEFAULT_INITIAL_TR_MS, DEFAULT_MPL_MS, MAX_SDU_GAP_UNRELIABLE};
use crate::policy::NackPolicy;
use crate::queues::{Cwq, RtxEntry, Rtxq, Seqq};
use crate::stats::FlowStats;

/// Identifies a flow for logging and as the [`pdu::FlowHandle`] carried in
/// buffer metadata (spec.md §4.1).
pub type FlowId = u64;

/// Callback invoked once per payload, in delivery order, by the receive
/// path's in-order-delivery step (spec.md §4.6 steps 2/10/11). Installed at
/// `flow_init` time; the facade crate is what actually consumes payloads,
/// `dtp` only guarantees the order and contents it is called with.
pub type DeliverFn = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Errors returned by [`Flow::send`]/[`Flow::receive_ctrl`] (spec.md §7).
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Backpressure; the caller retains ownership of the payload and must
    /// retry (spec.md §7).
    #[error("flow is backpressured")]
    WouldBlock,
    /// Header did not fit the buffer's reserved prefix.
    #[error("no header space: {0}")]
    NoHeaderSpace(#[from] PduError),
    /// The RMT could not deliver the PDU.
    #[error("rmt error: {0}")]
    Rmt(#[from] RmtError),
    /// A control PDU was handed to `receive_ctrl` without a control type.
    #[error("not a control PDU")]
    NotControl,
}

/// Parameters supplied by the management plane at `flow_init` time
/// (spec.md §4.8, §6.2).
pub struct FlowInit {
    pub id: FlowId,
    pub own_addr: Address,
    pub remote_addr: Address,
    pub local_cep: CepId,
    pub remote_cep: CepId,
    pub qos_id: QosId,
    pub config: FlowConfig,
    /// Called with each payload handed upward, in delivery order.
    pub deliver: DeliverFn,
}

struct State {
    set_drf: bool,
    next_seq_num_to_send: SeqNum,
    last_seq_num_sent: SeqNum,
    snd_lwe: SeqNum,
    snd_rwe: SeqNum,
    rcv_lwe: SeqNum,
    rcv_lwe_priv: SeqNum,
    rcv_rwe: SeqNum,
    max_seq_num_rcvd: Option<SeqNum>,
    last_snd_data_ack: SeqNum,
    next_snd_ctl_seq: SeqNum,
    last_ctrl_seq_num_rcvd: Option<SeqNum>,
    cwq: Cwq,
    rtxq: Rtxq,
    seqq: Seqq,
    rtx_tmr_int: Duration,
    mpl_r_a: Duration,
    stats: FlowStats,
}

/// A flow's DTP/DTCP state machine, guarded by a single per-flow lock
/// (spec.md §5: "Per-flow lock guards the entire DTP block").
pub struct Flow {
    pub id: FlowId,
    pub own_addr: Address,
    pub remote_addr: Address,
    pub local_cep: CepId,
    pub remote_cep: CepId,
    pub qos_id: QosId,
    config: FlowConfig,
    state: Mutex<State>,
    backpressure: Condvar,
    timers: TimerSet,
    rmt: Arc<Rmt>,
    nack_policy: NackPolicy,
    on_deliver: DeliverFn,
}

impl Flow {
    /// Initialises a flow (spec.md §4.8): derives `mpl_r_a`, applies
    /// defaults for zeroed inputs, seeds window edges from config, and
    /// installs the three timer callbacks.
    pub fn new(init: FlowInit, rmt: Arc<Rmt>) -> Arc<Flow> {
        let rtx = &init.config.dtcp.rtx;
        let initial_tr_ms = if rtx.initial_tr_ms == 0 { DEFAULT_INITIAL_TR_MS } else { rtx.initial_tr_ms };
        let data_rxms_max = if rtx.data_rxms_max == 0 { DEFAULT_DATA_RXMS_MAX } else { rtx.data_rxms_max };
        let mpl_ms = if rtx.mpl_ms == 0 { DEFAULT_MPL_MS } else { rtx.mpl_ms };
        let mpl_r_a = Duration::from_millis(mpl_ms + initial_tr_ms * data_rxms_max as u64 + init.config.dtcp.initial_a_ms);
        let rtx_tmr_int = Duration::from_millis(initial_tr_ms);

        let initial_credit = init.config.dtcp.fc.initial_credit;
        let state = Mutex::new(State {
            set_drf: true,
            next_seq_num_to_send: 0,
            last_seq_num_sent: 0,
            snd_lwe: 0,
            snd_rwe: initial_credit,
            rcv_lwe: 0,
            rcv_lwe_priv: 0,
            rcv_rwe: initial_credit,
            max_seq_num_rcvd: None,
            last_snd_data_ack: 0,
            next_snd_ctl_seq: 0,
            last_ctrl_seq_num_rcvd: None,
            cwq: Cwq::new(init.config.dtcp.fc.max_cwq_len),
            rtxq: Rtxq::new(crate::config::MAX_RTXQ_LEN),
            seqq: Seqq::new(crate::config::MAX_SEQQ_LEN),
            rtx_tmr_int,
            mpl_r_a,
            stats: FlowStats::default(),
        });

        Arc::new_cyclic(|weak: &Weak<Flow>| {
            let w_sender = weak.clone();
            let w_receiver = weak.clone();
            let w_rtx = weak.clone();
            let timers = TimerSet::new(
                move || {
                    if let Some(flow) = w_sender.upgrade() {
                        flow.on_sender_inactivity();
                    }
                },
                move || {
                    if let Some(flow) = w_receiver.upgrade() {
                        flow.on_receiver_inactivity();
                    }
                },
                move || {
                    if let Some(flow) = w_rtx.upgrade() {
                        flow.on_retransmission();
                    }
                },
            );
            Flow {
                id: init.id,
                own_addr: init.own_addr,
                remote_addr: init.remote_addr,
                local_cep: init.local_cep,
                remote_cep: init.remote_cep,
                qos_id: init.qos_id,
                config: init.config,
                state,
                backpressure: Condvar::new(),
                timers,
                rmt,
                nack_policy: NackPolicy::default(),
                on_deliver: init.deliver,
            }
        })
    }

    fn sender_inactivity_interval(&self, mpl_r_a: Duration) -> Duration {
        mpl_r_a * 3
    }

    fn receiver_inactivity_interval(&self, mpl_r_a: Duration) -> Duration {
        mpl_r_a * 2
    }

    /// DTP send path (spec.md §4.5).
    pub fn send(&self, payload: &[u8], may_block: bool) -> Result<(), FlowError> {
        let mut state = self.state.lock().unwrap();
        if self.config.dtcp_present {
            self.timers.rearm_sender_inactivity(self.sender_inactivity_interval(state.mpl_r_a));
        }

        loop {
            let window_closed = self.config.dtcp.flow_control && state.next_seq_num_to_send >= state.snd_rwe;
            let cwq_full = state.cwq.is_full();
            let rtx_full = self.config.dtcp.rtx_control && state.rtxq.is_full();
            if (window_closed && cwq_full) || rtx_full {
                if !may_block {
                    return Err(FlowError::WouldBlock);
                }
                state = self.backpressure.wait(state).unwrap();
                continue;
            }
            break;
        }

        let seq = state.next_seq_num_to_send;
        state.next_seq_num_to_send += 1;
        let drf = state.set_drf;
        state.set_drf = false;

        let pci = Pci {
            dst_addr: self.remote_addr,
            src_addr: self.own_addr,
            qos_id: self.qos_id,
            dst_cep: self.remote_cep,
            src_cep: self.local_cep,
            pdu_type: header::PDU_TYPE_DT,
            flags: if drf { header::FLAG_DRF } else { 0 },
            length: payload.len() as u32,
            seq_num: seq,
            ctrl: None,
        };
        let pdu = encode_pdu(&pci, payload)?;

        state.stats.tx_pdus += 1;
        state.stats.tx_bytes += payload.len() as u64;

        if !self.config.dtcp_present {
            drop(state);
            self.rmt.transmit(self.remote_addr, pdu, may_block)?;
            return Ok(());
        }

        if self.config.dtcp.flow_control && seq >= state.snd_rwe {
            state.cwq.push_back(seq, pdu);
            return Ok(());
        }

        state.snd_lwe = seq + 1;
        let to_transmit = if self.config.dtcp.rtx_control {
            let expiry = Instant::now() + state.rtx_tmr_int;
            let armed = state.rtxq.front().is_some();
            state.rtxq.push_back(RtxEntry { seq_num: seq, pdu: pdu.clone(), expiry });
            if !armed {
                self.timers.arm_retransmission(expiry);
            }
            pdu
        } else {
            pdu
        };
        drop(state);
        self.rmt.transmit(self.remote_addr, to_transmit, may_block)?;
        Ok(())
    }

    /// DTP receive path, data PDU branch (spec.md §4.6).
    ///
    /// `pci`/`payload` have already been classified as belonging to this
    /// flow and carrying `PDU_TYPE_DT` by the receive pipeline.
    pub fn receive_data(&self, pci: &Pci, payload: &[u8]) {
        let mut state = self.state.lock().unwrap();
        if self.config.dtcp_present {
            self.timers.rearm_receiver_inactivity(self.receiver_inactivity_interval(state.mpl_r_a));
        }

        let seq = pci.seq_num;

        if pci.drf() {
            state.rcv_lwe = seq + 1;
            state.rcv_lwe_priv = seq + 1;
            state.max_seq_num_rcvd = Some(seq);
            state.seqq.clear();
            state.stats.rx_pdus += 1;
            state.stats.rx_bytes += payload.len() as u64;
            let ctrl_pdu = self.sv_update(&mut state);
            drop(state);
            self.deliver(&[payload.to_vec()]);
            self.transmit_ctrl_opt(ctrl_pdu);
            return;
        }

        if seq < state.rcv_lwe_priv {
            state.stats.rx_err += 1;
            let ctrl_pdu = if self.config.dtcp.flow_control && state.rcv_lwe >= state.last_snd_data_ack {
                let pdu = self.sv_update(&mut state);
                state.last_snd_data_ack = state.rcv_lwe;
                pdu
            } else {
                None
            };
            drop(state);
            self.transmit_ctrl_opt(ctrl_pdu);
            return;
        }

        state.max_seq_num_rcvd = Some(state.max_seq_num_rcvd.map_or(seq, |m| m.max(seq)));
        let gap = seq - state.rcv_lwe_priv;
        let a_timeout_zero = self.config.dtcp.initial_a_ms == 0;
        let required = self.config.in_order_delivery || self.config.dtcp_present;
        let unreliable = self.config.max_sdu_gap == MAX_SDU_GAP_UNRELIABLE;
        let drop_pdu = !unreliable
            && required
            && a_timeout_zero
            && !self.config.dtcp.rtx_control
            && gap > self.config.max_sdu_gap as u64;

        if drop_pdu {
            state.stats.rx_err += 1;
            drop(state);
            return;
        }

        state.stats.rx_pdus += 1;
        state.stats.rx_bytes += payload.len() as u64;

        if seq == state.rcv_lwe_priv {
            state.rcv_lwe_priv = seq + 1;
            let mut base = state.rcv_lwe_priv;
            let max_sdu_gap = self.config.max_sdu_gap;
            let rest = state.seqq.drain_from(&mut base, max_sdu_gap);
            state.rcv_lwe_priv = base;
            state.rcv_lwe = state.rcv_lwe_priv;
            let ctrl_pdu = self.sv_update(&mut state);
            drop(state);
            let mut batch = vec![payload.to_vec()];
            batch.extend(rest.iter().map(|b| b.payload().to_vec()));
            self.deliver(&batch);
            self.transmit_ctrl_opt(ctrl_pdu);
            return;
        }

        if state.seqq.contains(seq) {
            state.stats.rx_err += 1;
            drop(state);
            return;
        }
        if state.seqq.is_full() {
            state.stats.dropped += 1;
            log::warn!("flow {}: seqq full, dropping seq {seq}", self.id);
            drop(state);
            return;
        }
        state.seqq.insert(seq, Buffer::from_payload(payload, 0));
        drop(state);
    }

    /// sv_update (spec.md §4.7): computes at most one control PDU after
    /// `rcv_lwe` may have advanced. Called with the lock held.
    fn sv_update(&self, state: &mut State) -> Option<Buffer> {
        if !self.config.dtcp_present {
            return None;
        }
        let flow_control = self.config.dtcp.flow_control;
        let rtx_control = self.config.dtcp.rtx_control;
        if flow_control {
            state.rcv_rwe = state.rcv_lwe + self.config.dtcp.fc.initial_credit;
        }
        let (ack, fc) = if rtx_control {
            (Some(AckSubtype::Ack), flow_control)
        } else if flow_control {
            (None, true)
        } else {
            return None;
        };
        let seq = state.next_snd_ctl_seq;
        state.next_snd_ctl_seq += 1;
        let pci = Pci {
            dst_addr: self.remote_addr,
            src_addr: self.own_addr,
            qos_id: self.qos_id,
            dst_cep: self.remote_cep,
            src_cep: self.local_cep,
            pdu_type: Pci::ctrl_type(fc, ack),
            flags: 0,
            length: 0,
            seq_num: seq,
            ctrl: Some(CtrlPci {
                last_ctrl_seq_rcvd: state.last_ctrl_seq_num_rcvd.unwrap_or(0),
                ack_nack_seq_num: state.rcv_lwe.saturating_sub(1),
                new_lwe: state.rcv_lwe,
                new_rwe: state.rcv_rwe,
                my_lwe: state.snd_lwe,
                my_rwe: state.snd_rwe,
            }),
        };
        encode_pdu(&pci, &[]).ok()
    }

    /// Control-PDU handling, `sdu_rx_ctrl` (spec.md §4.7).
    pub fn receive_ctrl(&self, pci: &Pci) -> Result<(), FlowError> {
        if !pci.is_ctrl() {
            return Err(FlowError::NotControl);
        }
        let ctrl = pci.ctrl.as_ref().ok_or(FlowError::NotControl)?;
        let mut state = self.state.lock().unwrap();

        match state.last_ctrl_seq_num_rcvd {
            Some(last) if pci.seq_num <= last => {
                state.stats.rx_err += 1;
                return Ok(());
            }
            _ => {
                state.last_ctrl_seq_num_rcvd = Some(pci.seq_num);
            }
        }

        let mut to_transmit = Vec::new();
        if pci.fc_bit() {
            if ctrl.new_rwe < state.snd_rwe {
                log::warn!("flow {}: broken peer, new_rwe {} < snd_rwe {}", self.id, ctrl.new_rwe, state.snd_rwe);
            } else {
                state.snd_rwe = ctrl.new_rwe;
                while state.snd_lwe < state.snd_rwe {
                    let Some((seq, pdu)) = state.cwq.pop_front() else { break };
                    state.snd_lwe = seq + 1;
                    state.last_seq_num_sent = seq;
                    if self.config.dtcp.rtx_control {
                        let expiry = Instant::now() + state.rtx_tmr_int;
                        let armed = state.rtxq.front().is_some();
                        state.rtxq.push_back(RtxEntry { seq_num: seq, pdu: pdu.clone(), expiry });
                        if !armed {
                            self.timers.arm_retransmission(expiry);
                        }
                    }
                    to_transmit.push(pdu);
                }
            }
        }

        if pci.ack_bit() {
            match pci.ack_subtype() {
                AckSubtype::Ack => {
                    state.rtxq.remove_up_to(ctrl.ack_nack_seq_num);
                    match state.rtxq.front() {
                        None => self.timers.cancel_retransmission(),
                        Some(entry) => self.timers.arm_retransmission(entry.expiry),
                    }
                }
                subtype => self.nack_policy.handle(self.id, subtype),
            }
        }

        drop(state);
        for pdu in to_transmit {
            let _ = self.rmt.transmit(self.remote_addr, pdu, false);
        }
        self.backpressure.notify_all();
        Ok(())
    }

    fn on_sender_inactivity(&self) {
        let mut state = self.state.lock().unwrap();
        state.set_drf = true;
        log::debug!("flow {}: sender inactivity timeout, next PDU will carry DRF", self.id);
    }

    fn on_receiver_inactivity(&self) {
        log::debug!("flow {}: receiver inactivity timeout (stub, no action)", self.id);
    }

    /// Retransmission-timer handler (spec.md §4.3): collects the batch to
    /// retransmit under the lock, rearms, then transmits after releasing it.
    fn on_retransmission(&self) {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let interval = state.rtx_tmr_int;
        let mut batch = Vec::new();
        for entry in state.rtxq.due_mut(now) {
            batch.push(entry.pdu.clone());
            entry.expiry = now + interval;
        }
        let next = state.rtxq.front().map(|e| e.expiry);
        drop(state);
        if let Some(deadline) = next {
            self.timers.arm_retransmission(deadline);
        }
        for pdu in batch {
            let _ = self.rmt.transmit(self.remote_addr, pdu, false);
        }
    }

    fn deliver(&self, payloads: &[Vec<u8>]) {
        for payload in payloads {
            (self.on_deliver)(payload);
        }
    }

    fn transmit_ctrl_opt(&self, pdu: Option<Buffer>) {
        if let Some(pdu) = pdu {
            let _ = self.rmt.transmit(self.remote_addr, pdu, false);
        }
    }

    /// Current statistics snapshot (spec.md §6.2 `flow_get_stats`).
    pub fn stats(&self) -> FlowStats {
        self.state.lock().unwrap().stats
    }

    /// `sdu_rx_consumed` (spec.md §6.2): the upper layer has consumed an
    /// enqueued PDU; advance the receive window and emit an ACK if needed.
    pub fn sdu_rx_consumed(&self) {
        let mut state = self.state.lock().unwrap();
        if state.rcv_lwe == state.rcv_lwe_priv {
            return;
        }
        state.rcv_lwe = state.rcv_lwe_priv;
        let ctrl_pdu = self.sv_update(&mut state);
        drop(state);
        self.transmit_ctrl_opt(ctrl_pdu);
    }
}

fn encode_pdu(pci: &Pci, payload: &[u8]) -> Result<Buffer, PduError> {
    let header_len = pci.encoded_len();
    let mut buf = Buffer::from_payload(payload, header_len);
    let mut header_bytes = vec![0u8; header_len];
    pci.encode(&mut header_bytes)?;
    buf.push_header(&header_bytes)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pduft::PduForwardingTable;
    use rmt::{LocalDelivery, LowerFlow, Rmt, WriteOutcome};

    struct NullLocal;
    impl LocalDelivery for NullLocal {
        fn deliver_local(&self, _pdu: Buffer) {}
    }

    struct CapturingLower {
        sent: Mutex<Vec<Buffer>>,
    }
    impl LowerFlow for CapturingLower {
        fn write(&self, pdu: Buffer, _may_block: bool) -> Result<WriteOutcome, String> {
            self.sent.lock().unwrap().push(pdu);
            Ok(WriteOutcome::Sent)
        }
        fn wait_writable(&self) {}
    }

    /// A `DeliverFn` that records every payload it's called with, in order.
    fn collector() -> (Arc<Mutex<Vec<Vec<u8>>>>, DeliverFn) {
        let store = Arc::new(Mutex::new(Vec::new()));
        let sink = store.clone();
        let cb: DeliverFn = Box::new(move |payload: &[u8]| sink.lock().unwrap().push(payload.to_vec()));
        (store, cb)
    }

    fn no_op_deliver() -> DeliverFn {
        Box::new(|_: &[u8]| {})
    }

    fn reliable_flow(rmt: Arc<Rmt>, deliver: DeliverFn) -> Arc<Flow> {
        let config = FlowConfig {
            dtcp_present: true,
            in_order_delivery: true,
            max_sdu_gap: 0,
            dtcp: crate::config::DtcpConfig {
                flow_control: true,
                rtx_control: true,
                initial_a_ms: 0,
                fc: crate::config::FcConfig { max_cwq_len: 8, initial_credit: 4 },
                rtx: crate::config::RtxConfig { initial_tr_ms: 1000, data_rxms_max: 10, mpl_ms: 1000 },
            },
        };
        Flow::new(
            FlowInit { id: 1, own_addr: 1, remote_addr: 2, local_cep: 10, remote_cep: 20, qos_id: 0, config, deliver },
            rmt,
        )
    }

    fn setup() -> (Arc<Rmt>, Arc<CapturingLower>, Arc<Flow>) {
        let pduft = Arc::new(PduForwardingTable::new());
        pduft.set(2, 1);
        let rmt = Arc::new(Rmt::new(1, pduft, Arc::new(NullLocal)));
        let lower = Arc::new(CapturingLower { sent: Mutex::new(vec![]) });
        rmt.register_lower_flow(1, lower.clone());
        let flow = reliable_flow(rmt.clone(), no_op_deliver());
        (rmt, lower, flow)
    }

    #[test]
    fn scenario_in_order_reliable_delivery_and_ack() {
        let (_rmt, lower, flow) = setup();
        for payload in [&b"p0"[..], b"p1", b"p2", b"p3"] {
            flow.send(payload, false).unwrap();
        }
        assert_eq!(lower.sent.lock().unwrap().len(), 4);
        {
            let state = flow.state.lock().unwrap();
            assert_eq!(state.snd_rwe, 4);
            assert_eq!(state.snd_lwe, 4);
            assert_eq!(state.rtxq.len(), 4);
        }

        let ack_ctrl = Pci {
            dst_addr: 1,
            src_addr: 2,
            qos_id: 0,
            dst_cep: 10,
            src_cep: 20,
            pdu_type: Pci::ctrl_type(true, Some(AckSubtype::Ack)),
            flags: 0,
            length: 0,
            seq_num: 0,
            ctrl: Some(CtrlPci {
                last_ctrl_seq_rcvd: 0,
                ack_nack_seq_num: 3,
                new_lwe: 0,
                new_rwe: 8,
                my_lwe: 0,
                my_rwe: 0,
            }),
        };
        flow.receive_ctrl(&ack_ctrl).unwrap();
        let state = flow.state.lock().unwrap();
        assert!(state.rtxq.is_empty());
        assert_eq!(state.snd_rwe, 8);
    }

    #[test]
    fn scenario_closed_window_queueing_then_fc_drain() {
        let (_rmt, lower, flow) = setup();
        for i in 0..6 {
            flow.send(format!("p{i}").as_bytes(), false).unwrap();
        }
        assert_eq!(lower.sent.lock().unwrap().len(), 4);
        {
            let state = flow.state.lock().unwrap();
            assert_eq!(state.cwq.len(), 2);
            assert_eq!(state.snd_lwe, 4);
        }

        let fc_ctrl = Pci {
            dst_addr: 1,
            src_addr: 2,
            qos_id: 0,
            dst_cep: 10,
            src_cep: 20,
            pdu_type: Pci::ctrl_type(true, None),
            flags: 0,
            length: 0,
            seq_num: 1,
            ctrl: Some(CtrlPci { last_ctrl_seq_rcvd: 0, ack_nack_seq_num: 0, new_lwe: 0, new_rwe: 6, my_lwe: 0, my_rwe: 0 }),
        };
        flow.receive_ctrl(&fc_ctrl).unwrap();
        assert_eq!(lower.sent.lock().unwrap().len(), 6);
        let state = flow.state.lock().unwrap();
        assert!(state.cwq.is_empty());
        assert_eq!(state.snd_lwe, 6);
        assert_eq!(state.rtxq.len(), 6);
    }

    fn unreliable_reorder_flow(rmt: Arc<Rmt>, max_sdu_gap: u32, deliver: DeliverFn) -> Arc<Flow> {
        let config = FlowConfig {
            dtcp_present: false,
            in_order_delivery: true,
            max_sdu_gap,
            dtcp: crate::config::DtcpConfig::default(),
        };
        Flow::new(
            FlowInit { id: 2, own_addr: 1, remote_addr: 2, local_cep: 10, remote_cep: 20, qos_id: 0, config, deliver },
            rmt,
        )
    }

    fn data_pci(seq: SeqNum, drf: bool) -> Pci {
        Pci {
            dst_addr: 1,
            src_addr: 2,
            qos_id: 0,
            dst_cep: 10,
            src_cep: 20,
            pdu_type: header::PDU_TYPE_DT,
            flags: if drf { header::FLAG_DRF } else { 0 },
            length: 1,
            seq_num: seq,
            ctrl: None,
        }
    }

    #[test]
    fn scenario_reorder_then_catch_up() {
        let pduft = Arc::new(PduForwardingTable::new());
        let rmt = Arc::new(Rmt::new(1, pduft, Arc::new(NullLocal)));
        let (delivered, deliver) = collector();
        let flow = unreliable_reorder_flow(rmt, 2, deliver);

        flow.receive_data(&data_pci(0, false), b"0");
        {
            let state = flow.state.lock().unwrap();
            assert_eq!(state.rcv_lwe_priv, 1);
        }
        flow.receive_data(&data_pci(2, false), b"2");
        flow.receive_data(&data_pci(3, false), b"3");
        {
            let state = flow.state.lock().unwrap();
            assert_eq!(state.seqq.len(), 2);
            assert_eq!(state.rcv_lwe_priv, 1);
        }
        flow.receive_data(&data_pci(1, false), b"1");
        let state = flow.state.lock().unwrap();
        assert_eq!(state.rcv_lwe_priv, 4);
        assert!(state.seqq.is_empty());
        drop(state);
        assert_eq!(
            delivered.lock().unwrap().as_slice(),
            &[b"0".to_vec(), b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]
        );
    }

    #[test]
    fn scenario_gap_beyond_tolerance_is_dropped() {
        let pduft = Arc::new(PduForwardingTable::new());
        let rmt = Arc::new(Rmt::new(1, pduft, Arc::new(NullLocal)));
        let (delivered, deliver) = collector();
        let flow = unreliable_reorder_flow(rmt, 1, deliver);

        flow.receive_data(&data_pci(0, false), b"0");
        flow.receive_data(&data_pci(5, false), b"5");
        let state = flow.state.lock().unwrap();
        assert_eq!(state.rcv_lwe_priv, 1);
        assert_eq!(state.stats.rx_err, 1);
        assert!(state.seqq.is_empty());
        drop(state);
        assert_eq!(delivered.lock().unwrap().as_slice(), &[b"0".to_vec()]);
    }

    #[test]
    fn scenario_drf_reset_discards_seqq_and_jumps_forward() {
        let pduft = Arc::new(PduForwardingTable::new());
        let rmt = Arc::new(Rmt::new(1, pduft, Arc::new(NullLocal)));
        let (delivered, deliver) = collector();
        let flow = unreliable_reorder_flow(rmt, 2, deliver);

        flow.receive_data(&data_pci(0, false), b"0");
        flow.receive_data(&data_pci(2, false), b"2");
        flow.receive_data(&data_pci(20, true), b"20");
        let state = flow.state.lock().unwrap();
        assert_eq!(state.rcv_lwe, 21);
        assert_eq!(state.rcv_lwe_priv, 21);
        assert_eq!(state.max_seq_num_rcvd, Some(20));
        assert!(state.seqq.is_empty());
        drop(state);
        assert_eq!(delivered.lock().unwrap().as_slice(), &[b"0".to_vec(), b"20".to_vec()]);
    }
}
