//! Bounded per-flow queues: closed-window (`cwq`), retransmission (`rtxq`)
//! and sequencing/reorder (`seqq`) (spec.md §3, §4.5-§4.6, §9).
//!
//! spec.md names an "intrusive list link" embedded in the buffer for these
//! queues. This implementation instead backs them with `VecDeque`/sorted
//! `Vec`, which spec.md §9 explicitly allows given the 64-entry bound
//! ("either way... O(n) in queue length... is acceptable") — see
//! DESIGN.md for this Open Question's resolution.
use std::collections::VecDeque;
use std::time::Instant;

use pdu::{Buffer, SeqNum};

/// Closed-window queue: PDUs that outran the send window, held in arrival
/// (and hence sequence-number) order.
#[derive(Default)]
pub struct Cwq {
    items: VecDeque<(SeqNum, Buffer)>,
    max_len: usize,
}

impl Cwq {
    pub fn new(max_len: usize) -> Self {
        Cwq { items: VecDeque::new(), max_len }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.max_len
    }

    pub fn push_back(&mut self, seq_num: SeqNum, pdu: Buffer) {
        self.items.push_back((seq_num, pdu));
    }

    pub fn pop_front(&mut self) -> Option<(SeqNum, Buffer)> {
        self.items.pop_front()
    }
}

/// One retransmission-queue entry: the cloned PDU plus its current
/// retransmission-expiry deadline. spec.md §3 invariant: `rtxq` is sorted
/// by increasing send sequence number, and each entry's expiry is
/// monotonically non-decreasing along that order.
pub struct RtxEntry {
    pub seq_num: SeqNum,
    pub pdu: Buffer,
    pub expiry: Instant,
}

#[derive(Default)]
pub struct Rtxq {
    items: VecDeque<RtxEntry>,
    max_len: usize,
}

impl Rtxq {
    pub fn new(max_len: usize) -> Self {
        Rtxq { items: VecDeque::new(), max_len }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.max_len
    }

    /// Appends an entry. The send path only ever appends in increasing
    /// `seq_num` order (spec.md §4.5 step 9), which preserves the sort
    /// invariant.
    pub fn push_back(&mut self, entry: RtxEntry) {
        self.items.push_back(entry);
    }

    pub fn front(&self) -> Option<&RtxEntry> {
        self.items.front()
    }

    /// Removes every entry with `seq_num <= ack` (spec.md §4.7 step 4).
    pub fn remove_up_to(&mut self, ack: SeqNum) {
        while matches!(self.items.front(), Some(e) if e.seq_num <= ack) {
            self.items.pop_front();
        }
    }

    /// Iterates the entries whose `expiry <= now`, from the front, without
    /// removing them: the retransmission-timer handler clones each and
    /// advances its deadline in place (spec.md §4.3).
    pub fn due_mut(&mut self, now: Instant) -> impl Iterator<Item = &mut RtxEntry> {
        self.items.iter_mut().take_while(move |e| e.expiry <= now)
    }
}

/// Sequencing (reorder) queue: out-of-order arrivals awaiting their
/// predecessor, sorted strictly by ascending sequence number with no
/// duplicates (spec.md §3, §4.6).
#[derive(Default)]
pub struct Seqq {
    items: Vec<(SeqNum, Buffer)>,
    max_len: usize,
}

impl Seqq {
    pub fn new(max_len: usize) -> Self {
        Seqq { items: Vec::new(), max_len }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.max_len
    }

    pub fn contains(&self, seq_num: SeqNum) -> bool {
        self.items.binary_search_by_key(&seq_num, |(s, _)| *s).is_ok()
    }

    /// Inserts `pdu` at its sorted position. Callers must already have
    /// checked `contains`/`is_full`.
    pub fn insert(&mut self, seq_num: SeqNum, pdu: Buffer) {
        let pos = self.items.partition_point(|(s, _)| *s < seq_num);
        self.items.insert(pos, (seq_num, pdu));
    }

    /// Drops every entry (used on a DRF reset, spec.md §8 scenario 5:
    /// "any contents of seqq logically discarded").
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Pops every leading entry reachable from `base` within
    /// `max_sdu_gap`, advancing `base` past each (spec.md §4.6 step 10).
    pub fn drain_from(&mut self, base: &mut SeqNum, max_sdu_gap: u32) -> Vec<Buffer> {
        let mut drained = Vec::new();
        while let Some(&(seq, _)) = self.items.first() {
            if seq.saturating_sub(*base) <= max_sdu_gap as u64 {
                let (seq, pdu) = self.items.remove(0);
                *base = seq + 1;
                drained.push(pdu);
            } else {
                break;
            }
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seqq_sorts_and_rejects_duplicates() {
        let mut q = Seqq::new(8);
        q.insert(5, Buffer::from_payload(b"a", 0));
        q.insert(2, Buffer::from_payload(b"b", 0));
        q.insert(3, Buffer::from_payload(b"c", 0));
        assert!(q.contains(2));
        assert!(!q.contains(4));
        let mut base = 1;
        let drained = q.drain_from(&mut base, 0);
        // base starts at 1; front is seq 2, gap = 2-1 = 1 > 0 so nothing drains
        assert!(drained.is_empty());
        assert_eq!(base, 1);
    }

    #[test]
    fn seqq_drains_contiguous_run_within_gap_tolerance() {
        let mut q = Seqq::new(8);
        q.insert(2, Buffer::from_payload(b"a", 0));
        q.insert(3, Buffer::from_payload(b"b", 0));
        let mut base = 2;
        let drained = q.drain_from(&mut base, 2);
        assert_eq!(drained.len(), 2);
        assert_eq!(base, 4);
        assert!(q.is_empty());
    }

    #[test]
    fn rtxq_remove_up_to_trims_the_front() {
        let mut q = Rtxq::new(64);
        let now = Instant::now();
        for seq in 0..4 {
            q.push_back(RtxEntry { seq_num: seq, pdu: Buffer::from_payload(b"x", 0), expiry: now });
        }
        q.remove_up_to(1);
        assert_eq!(q.front().unwrap().seq_num, 2);
        q.remove_up_to(10);
        assert!(q.is_empty());
    }
}
