//! PDU Forwarding Table (spec.md §4.2).
//!
//! Maps a destination address to the lower flow chosen to reach it. Every
//! entry is owned by the flow it points at so that destroying a flow can
//! remove every entry it owns in one pass (spec.md §9 "cyclic ownership").
//!
//! Grounded on the teacher's `dtp/src/dtp.rs` `InnerDtpSocket`, which keeps
//! an analogous `Mutex<HashMap<Channel, usize>>` lookup table plus a
//! `Mutex<Slab<..>>` of the underlying state — generalised here to a single
//! table-wide lock serialising all four operations, as spec.md §4.2 and §5
//! require ("All operations are serialised under a single table-wide mutual
//! exclusion primitive").
#![deny(missing_docs)]
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Opaque identifier of a lower flow. The forwarding table never looks
/// inside it; it is supplied and interpreted entirely by the RMT.
pub type FlowId = u64;

/// Address type, matches `pdu::header::Address`.
pub type Address = u64;

/// Handle to one forwarding-table entry, returned by [`PduForwardingTable::set`]
/// and accepted by [`PduForwardingTable::delete`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct EntryId(u64);

struct Entry {
    address: Address,
    flow: FlowId,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    by_addr: HashMap<Address, EntryId>,
    by_flow: HashMap<FlowId, HashSet<EntryId>>,
    entries: HashMap<EntryId, Entry>,
}

impl Inner {
    fn remove_entry(&mut self, id: EntryId) {
        if let Some(entry) = self.entries.remove(&id) {
            self.by_addr.remove(&entry.address);
            if let Some(owned) = self.by_flow.get_mut(&entry.flow) {
                owned.remove(&id);
                if owned.is_empty() {
                    self.by_flow.remove(&entry.flow);
                }
            }
        }
    }
}

/// The PDU forwarding table.
#[derive(Default)]
pub struct PduForwardingTable {
    inner: Mutex<Inner>,
}

impl PduForwardingTable {
    /// Creates an empty forwarding table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts a route to `address` via `flow`.
    ///
    /// Idempotent for the same `(address, flow)` pair — calling it twice
    /// leaves exactly one entry. If another flow currently owns the route
    /// to `address`, ownership transfers to `flow`.
    pub fn set(&self, address: Address, flow: FlowId) -> EntryId {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&existing) = inner.by_addr.get(&address) {
            let current_flow = inner.entries[&existing].flow;
            if current_flow == flow {
                return existing;
            }
            inner.remove_entry(existing);
        }
        let id = EntryId(inner.next_id);
        inner.next_id += 1;
        inner.by_addr.insert(address, id);
        inner.by_flow.entry(flow).or_default().insert(id);
        inner.entries.insert(id, Entry { address, flow });
        id
    }

    /// Looks up the flow currently routing to `address`. Pure query, never
    /// allocates.
    pub fn lookup(&self, address: Address) -> Option<FlowId> {
        let inner = self.inner.lock().unwrap();
        inner
            .by_addr
            .get(&address)
            .map(|id| inner.entries[id].flow)
    }

    /// Removes a single entry.
    pub fn delete(&self, entry: EntryId) {
        self.inner.lock().unwrap().remove_entry(entry);
    }

    /// Removes all entries.
    pub fn flush(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = Inner::default();
    }

    /// Removes every entry owned by `flow`. Called on flow destruction
    /// (spec.md §5 "destroying a flow removes all entries it owns").
    pub fn remove_flow(&self, flow: FlowId) {
        let mut inner = self.inner.lock().unwrap();
        let owned: Vec<EntryId> = inner
            .by_flow
            .get(&flow)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        for id in owned {
            inner.remove_entry(id);
        }
    }

    /// Number of live entries. Test/diagnostic helper.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// `true` if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let t = PduForwardingTable::new();
        let e = t.set(42, 1);
        assert_eq!(t.lookup(42), Some(1));
        t.delete(e);
        assert_eq!(t.lookup(42), None);
    }

    #[test]
    fn flush_clears_all() {
        let t = PduForwardingTable::new();
        t.set(1, 10);
        t.set(2, 20);
        t.flush();
        assert_eq!(t.lookup(1), None);
        assert_eq!(t.lookup(2), None);
        assert!(t.is_empty());
    }

    #[test]
    fn set_is_idempotent_for_same_address_and_flow() {
        let t = PduForwardingTable::new();
        let e1 = t.set(42, 1);
        let e2 = t.set(42, 1);
        assert_eq!(e1, e2);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn set_transfers_ownership_on_route_change() {
        let t = PduForwardingTable::new();
        t.set(42, 1);
        t.set(42, 2);
        assert_eq!(t.lookup(42), Some(2));
        assert_eq!(t.len(), 1);
        // entry no longer owned by flow 1
        t.remove_flow(1);
        assert_eq!(t.lookup(42), Some(2));
    }

    #[test]
    fn remove_flow_deletes_every_owned_entry() {
        let t = PduForwardingTable::new();
        t.set(1, 99);
        t.set(2, 99);
        t.set(3, 100);
        t.remove_flow(99);
        assert_eq!(t.lookup(1), None);
        assert_eq!(t.lookup(2), None);
        assert_eq!(t.lookup(3), Some(100));
        assert_eq!(t.len(), 1);
    }
}
