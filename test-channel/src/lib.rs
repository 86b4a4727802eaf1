//! Lossy synchronous lower flow for DTP/RMT scenario tests (spec.md §8,
//! SPEC_FULL.md §1.4).
//!
//! Ported from the teacher's async-std `test-channel` crate: the same px/pq
//! loss-and-duplication model, but implemented directly against
//! [`rmt::LowerFlow`] instead of an async `Channel`, since every other crate
//! in this workspace is now synchronous.
#![deny(missing_docs)]
use pdu::Buffer;
use rand::rngs::OsRng;
use rand::Rng;
use rmt::{LowerFlow, WriteOutcome};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

type Queue = Arc<Mutex<VecDeque<Buffer>>>;

/// One end of a [`LossyChannelBuilder::split`] pair. Implements
/// [`LowerFlow`] so it can be registered directly with an `Rmt` via
/// `register_lower_flow`.
#[derive(Clone)]
pub struct LossyLoopback {
    px: f64,
    pq: f64,
    out: Queue,
    inc: Queue,
}

impl LowerFlow for LossyLoopback {
    fn write(&self, pdu: Buffer, _may_block: bool) -> Result<WriteOutcome, String> {
        let fate: f64 = OsRng.gen();
        let mut out = self.out.lock().unwrap();
        if fate < self.px {
            out.push_back(pdu.clone());
        }
        if fate < self.pq {
            out.push_back(pdu);
        }
        Ok(WriteOutcome::Sent)
    }

    fn wait_writable(&self) {}
}

impl LossyLoopback {
    /// Pops the next PDU delivered to this end, if any. The test harness
    /// calls this in a pump loop and feeds the result to the receiving
    /// side's `sdu_rx`.
    pub fn try_recv(&self) -> Option<Buffer> {
        self.inc.lock().unwrap().pop_front()
    }
}

/// Builds a duplex pair of lossy lower flows.
pub struct LossyChannelBuilder {
    px: f64,
    pq: f64,
}

impl LossyChannelBuilder {
    /// Creates a new lossy channel.
    ///
    /// The `px` parameter is the probability of a packet getting
    /// transmitted. The `pq` parameter is the probability of a packet
    /// getting duplicated.
    ///
    /// Through the combination of `px` and `pq` this can model a reliable
    /// link (px=1.0, pq=0.0), a partition (px=0.0, pq=0.0), a link that
    /// duplicates every packet (px=1.0, pq=1.0), or anything in between.
    pub fn new(px: f64, pq: f64) -> Self {
        assert!((0.0..=1.0).contains(&px));
        assert!((0.0..=1.0).contains(&pq));
        LossyChannelBuilder { px, pq }
    }

    /// Splits into two ends; PDUs written into one arrive (subject to loss
    /// and duplication) at the other's [`LossyLoopback::try_recv`].
    pub fn split(&self) -> (LossyLoopback, LossyLoopback) {
        let q1: Queue = Default::default();
        let q2: Queue = Default::default();
        let a = LossyLoopback { px: self.px, pq: self.pq, out: q1.clone(), inc: q2.clone() };
        let b = LossyLoopback { px: self.px, pq: self.pq, out: q2, inc: q1 };
        (a, b)
    }

    /// Probability of an error condition occurring, for tests that want to
    /// assert roughly-expected-count behaviour over many iterations.
    pub fn probability(&self, cond: Tx) -> f64 {
        match cond {
            Tx::Success => self.px * (1.0 - self.pq),
            Tx::Delay => (1.0 - self.px) * self.pq,
            Tx::Duplicate => self.px * self.pq,
            Tx::Drop => (1.0 - self.px) * (1.0 - self.pq),
        }
    }
}

/// Enumerates the error conditions a single write can land in.
pub enum Tx {
    /// Successful, single transmission.
    Success,
    /// Packet is delayed (queued but not yet delivered with the original).
    Delay,
    /// Packet will be received twice.
    Duplicate,
    /// Packet is dropped.
    Drop,
}

impl std::fmt::Display for LossyChannelBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "p(transmission) = {}", self.px)?;
        writeln!(f, "p(duplicate) = {}", self.pq)?;
        writeln!(f, "p(success) = {}", self.probability(Tx::Success))?;
        writeln!(f, "p(delay) = {}", self.probability(Tx::Delay))?;
        writeln!(f, "p(duplicate only) = {}", self.probability(Tx::Duplicate))?;
        writeln!(f, "p(drop) = {}", self.probability(Tx::Drop))?;
        Ok(())
    }
}
