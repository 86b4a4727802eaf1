//! PDU buffer and wire header.
//!
//! `Buffer` is the reference-counted PDU container named in spec.md §4.1: a
//! shared byte storage plus a per-clone header-reserve window, metadata for
//! the retransmission-queue expiry and owning-flow back-reference, and a
//! `push_header`/`pop_header` pair for prepending/consuming the PCI.
//!
//! Adapted from the teacher's `src/packet.rs` (which carried a single fixed
//! 12-byte header and no reserve area) generalised to a variable-length,
//! growable-from-the-front header region so DTP can fill in the PCI after
//! allocation without a second allocation.
#![deny(missing_docs)]
use std::sync::Arc;
use std::time::Instant;

pub mod header;
pub mod ratelimit;
mod width;

pub use header::{AckSubtype, Address, CepId, CtrlPci, Pci, PduLen, QosId, SeqNum};
pub use ratelimit::RateLimitedLog;

/// Errors surfaced by the PDU buffer and wire codec (spec.md §7).
#[derive(Debug, thiserror::Error)]
pub enum PduError {
    /// `push_header` would write before the start of the allocation.
    #[error("buffer lacks reserved header space")]
    OutOfHeaderSpace,
    /// `pop_header` would advance past the end of the available data.
    #[error("buffer shorter than the header being popped")]
    Truncated,
    /// A PCI field's value does not fit the flavour's configured width.
    #[error("value {value} does not fit in a {width}-byte field")]
    FieldOverflow {
        /// The value that did not fit.
        value: u64,
        /// The configured flavour width, in bytes.
        width: usize,
    },
}

/// Opaque identifier of the flow that owns a buffer, used as the
/// transmit-completion back-reference named in spec.md §4.1. Deliberately
/// not a `Weak<Flow>` here: the `pdu` crate sits below `dtp` in the
/// dependency order of spec.md §2 and must not know about flows.
pub type FlowHandle = u64;

/// Metadata carried alongside the wire bytes, not itself part of the wire
/// format (spec.md §4.1).
#[derive(Clone, Debug, Default)]
pub struct BufferMeta {
    /// Retransmission-queue expiry deadline, set when a clone is appended to
    /// `rtxq` (spec.md §4.5 step 9, §4.3 retransmission timer).
    pub expiry: Option<Instant>,
    /// Back-reference to the owning flow, used by transmit-completion
    /// notifications (spec.md §4.1).
    pub owner: Option<FlowHandle>,
}

/// A reference-counted PDU buffer with a header-reserve prefix.
///
/// Cloning is `Arc::clone` plus a metadata copy: O(1) and safe to call from
/// a timer or receive interrupt context (spec.md §4.1, §5).
///
/// The spec additionally names an "intrusive list link" on the buffer for
/// `cwq`/`rtxq`/`seqq` membership. This implementation instead holds those
/// queues as plain `VecDeque`/sorted `Vec` (see `dtp::queues`), which spec.md
/// §9 allows ("ring buffers... either way... O(n) in queue length... is
/// acceptable" given the 64-entry bound) — so no link field is carried here;
/// see DESIGN.md for this Open Question's resolution.
#[derive(Clone, Debug)]
pub struct Buffer {
    storage: Arc<Vec<u8>>,
    start: usize,
    end: usize,
    /// Per-clone metadata; each clone owns its own.
    pub meta: BufferMeta,
}

impl Buffer {
    /// Allocates a buffer with `header_reserve` bytes of headroom before
    /// `data_len` bytes of payload, all zeroed.
    pub fn allocate(data_len: usize, header_reserve: usize) -> Self {
        let total = header_reserve + data_len;
        let storage = vec![0u8; total];
        Buffer {
            storage: Arc::new(storage),
            start: header_reserve,
            end: total,
            meta: BufferMeta::default(),
        }
    }

    /// Allocates a buffer from existing payload bytes with `header_reserve`
    /// bytes of headroom.
    pub fn from_payload(payload: &[u8], header_reserve: usize) -> Self {
        let mut buf = Buffer::allocate(payload.len(), header_reserve);
        buf.payload_mut().copy_from_slice(payload);
        buf
    }

    /// Current payload (everything after the header window), read-only.
    pub fn payload(&self) -> &[u8] {
        &self.storage[self.start..self.end]
    }

    /// Current payload, mutable. Panics if this buffer is shared — callers
    /// must fill payload bytes before cloning into a queue.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let (start, end) = (self.start, self.end);
        Arc::get_mut(&mut self.storage)
            .expect("payload_mut called on a shared Buffer")
            [start..end]
            .as_mut()
    }

    /// Number of bytes of unused header space still reserved before the
    /// current payload window.
    pub fn header_room(&self) -> usize {
        self.start
    }

    /// Length of the current payload window.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// `true` if the payload window is empty.
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Reserves `len` bytes immediately before the current payload window
    /// and writes `header` into them, moving the window start backwards.
    ///
    /// Fails with [`PduError::OutOfHeaderSpace`] if fewer than `len` bytes
    /// of headroom remain. Requires unique ownership of the storage (no
    /// prior clones) since it mutates bytes in place.
    pub fn push_header(&mut self, header: &[u8]) -> Result<(), PduError> {
        if header.len() > self.start {
            return Err(PduError::OutOfHeaderSpace);
        }
        let new_start = self.start - header.len();
        Arc::get_mut(&mut self.storage)
            .expect("push_header called on a shared Buffer")[new_start..self.start]
            .copy_from_slice(header);
        self.start = new_start;
        Ok(())
    }

    /// Advances the payload pointer past `len` header bytes, returning them.
    ///
    /// Fails with [`PduError::Truncated`] if fewer than `len` bytes remain.
    /// Safe to call on a shared buffer: it only adjusts this clone's window.
    pub fn pop_header(&mut self, len: usize) -> Result<&[u8], PduError> {
        if self.end - self.start < len {
            return Err(PduError::Truncated);
        }
        let header_start = self.start;
        self.start += len;
        Ok(&self.storage[header_start..header_start + len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_pop_header_round_trips() {
        let mut buf = Buffer::from_payload(b"hello", 8);
        assert_eq!(buf.payload(), b"hello");
        buf.push_header(&[1, 2, 3]).unwrap();
        assert_eq!(buf.payload(), &[1, 2, 3, b'h', b'e', b'l', b'l', b'o']);
        let popped = buf.pop_header(3).unwrap().to_vec();
        assert_eq!(popped, vec![1, 2, 3]);
        assert_eq!(buf.payload(), b"hello");
    }

    #[test]
    fn push_header_fails_when_headroom_exhausted() {
        let mut buf = Buffer::allocate(4, 2);
        assert!(matches!(
            buf.push_header(&[0u8; 3]),
            Err(PduError::OutOfHeaderSpace)
        ));
    }

    #[test]
    fn pop_header_fails_when_buffer_too_short() {
        let mut buf = Buffer::allocate(2, 0);
        assert!(matches!(buf.pop_header(3), Err(PduError::Truncated)));
    }

    #[test]
    fn clone_is_independent_for_pop_header() {
        let mut buf = Buffer::from_payload(b"abcdef", 0);
        let mut clone = buf.clone();
        buf.pop_header(2).unwrap();
        assert_eq!(buf.payload(), b"cdef");
        assert_eq!(clone.payload(), b"abcdef");
        clone.pop_header(1).unwrap();
        assert_eq!(clone.payload(), b"bcdef");
    }
}
