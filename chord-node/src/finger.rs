// This file is part of chord-dht.
// Copyright (C) 2026 The chord-dht Authors
// SPDX-License-Identifier: Apache-2.0
// Licensed under the Apache License, Version 2.0 (the "License");
// You may not use this file except in compliance with the License.
// You may obtain a copy of the License at
// http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The per-node finger table: a cache of `m` routing pointers
//! that accelerates lookups to O(log N) hops. Staleness is tolerated here —
//! the owner always re-checks `(predecessor, self]` before answering a
//! client, so a stale finger only costs an extra hop, never a wrong answer.

use chord_id::{Id, Ring};
use chord_proto::{FingerEntry, NodeRef};

pub struct FingerTable {
    ring: Ring,
    owner: NodeRef,
    /// `entries[i].0` is `start_i`, `entries[i].1` is `node_i`.
    entries: Vec<(Id, NodeRef)>,
    /// Rolling index consumed one-per-tick by `fix_fingers`.
    next: usize,
}

impl FingerTable {
    /// `new(owner_id)`: constructs `m` entries with `start_i`
    /// precomputed; all `node_i` initially point to `initial` (either the
    /// owner itself, for a solo ring, or the bootstrap successor, when
    /// joining).
    pub fn new(ring: Ring, owner: NodeRef, initial: NodeRef) -> Self {
        let m = ring.m() as usize;
        let entries = (0..m)
            .map(|i| (ring.add_pow2(owner.id, i as u32), initial.clone()))
            .collect();
        Self { ring, owner, entries, next: 0 }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn start(&self, i: usize) -> Id {
        self.entries[i].0
    }

    /// `set_entry(i, node_ref)`.
    pub fn set_entry(&mut self, i: usize, node: NodeRef) {
        self.entries[i].1 = node;
    }

    /// `get_entry(i) -> FingerEntry`.
    pub fn get_entry(&self, i: usize) -> FingerEntry {
        let (start, node) = &self.entries[i];
        FingerEntry { index: i as u32, start: *start, node: node.clone() }
    }

    /// A read-only snapshot of every entry, for `NodeInfo`.
    pub fn snapshot(&self) -> Vec<FingerEntry> {
        (0..self.entries.len()).map(|i| self.get_entry(i)).collect()
    }

    /// The next index `fix_fingers` should refresh, advancing the rolling
    /// cursor round-robin.
    pub fn next_fix_index(&mut self) -> usize {
        let i = self.next;
        self.next = (self.next + 1) % self.entries.len().max(1);
        i
    }

    /// `closest_preceding(target) -> NodeRef`: scans indices
    /// from `m-1` down to `0`, returning the first `node_i` whose id lies in
    /// the open arc `(owner.id, target)`. Falls back to the owner itself if
    /// none qualify.
    pub fn closest_preceding(&self, target: Id) -> NodeRef {
        for (_, node) in self.entries.iter().rev() {
            if self.ring.in_open(node.id, self.owner.id, target) {
                return node.clone();
            }
        }
        self.owner.clone()
    }

    /// Every distinct finger entry that precedes `target` in `(owner,
    /// target)`, ordered from farthest to nearest (same scan order as
    /// `closest_preceding`), for the lookup-failure fallback chain: try the
    /// next entry down the finger table when the first candidate is
    /// unreachable.
    pub fn candidates_preceding(&self, target: Id) -> Vec<NodeRef> {
        let mut seen = std::collections::HashSet::new();
        self.entries
            .iter()
            .rev()
            .map(|(_, node)| node)
            .filter(|node| self.ring.in_open(node.id, self.owner.id, target))
            .filter(|node| seen.insert(node.id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64, addr: &str) -> NodeRef {
        NodeRef { id: Id(ethnum::U256::from(id)), addr: addr.to_string() }
    }

    #[test]
    fn new_table_initializes_all_entries_to_initial() {
        let ring = Ring::new(8);
        let owner = node(10, "owner");
        let bootstrap_succ = node(50, "succ");
        let table = FingerTable::new(ring, owner.clone(), bootstrap_succ.clone());
        assert_eq!(table.len(), 8);
        for i in 0..8 {
            assert_eq!(table.get_entry(i).node, bootstrap_succ);
            assert_eq!(table.start(i), ring.add_pow2(owner.id, i as u32));
        }
    }

    #[test]
    fn closest_preceding_falls_back_to_owner() {
        let ring = Ring::new(8);
        let owner = node(10, "owner");
        let table = FingerTable::new(ring, owner.clone(), owner.clone());
        assert_eq!(table.closest_preceding(Id(ethnum::U256::from(200u64))), owner);
    }

    #[test]
    fn closest_preceding_picks_farthest_qualifying_entry() {
        let ring = Ring::new(8);
        let owner = node(10, "owner");
        let mut table = FingerTable::new(ring, owner.clone(), owner.clone());
        // place a finger at 100 that qualifies for target 150.
        table.set_entry(4, node(100, "n100")); // start_4 = 10+16=26, but we override directly
        let closest = table.closest_preceding(Id(ethnum::U256::from(150u64)));
        assert_eq!(closest.id, Id(ethnum::U256::from(100u64)));
    }

    #[test]
    fn fix_index_round_robins() {
        let ring = Ring::new(8);
        let owner = node(10, "owner");
        let mut table = FingerTable::new(ring, owner.clone(), owner);
        let seq: Vec<usize> = (0..10).map(|_| table.next_fix_index()).collect();
        assert_eq!(seq, vec![0, 1, 2, 3, 4, 5, 6, 7, 0, 1]);
    }
}
