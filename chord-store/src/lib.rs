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

#![deny(unreachable_pub)]
//! The per-node local key store: a map from key string to
//! [`StoredValue`], ordered by the key's ring `Id` so that ownership-range
//! queries read naturally off the same space `find_successor` routes over.

use chord_id::{Id, Ring};
use chord_proto::{LogicalTimestamp, StoredValue};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::debug;

/// Outcome of a `put`/`delete` attempt, used by the caller to decide whether
/// to replicate the write onward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write's timestamp (tie-broken by origin) was newer; applied.
    Applied,
    /// The write's timestamp was `<=` the stored one; dropped, per a
    /// strict-`>` last-writer-wins policy.
    Stale,
}

#[derive(Clone, Debug)]
enum Entry {
    Value(StoredValue),
    /// A delete that has happened; retained so a late, stale `put` for the
    /// same key cannot resurrect an older value. Governed by the same
    /// timestamp rule as `put`.
    Tombstone {
        timestamp: LogicalTimestamp,
        origin: Id,
    },
}

impl Entry {
    fn timestamp(&self) -> LogicalTimestamp {
        match self {
            Entry::Value(v) => v.timestamp,
            Entry::Tombstone { timestamp, .. } => *timestamp,
        }
    }

    fn origin(&self) -> Id {
        match self {
            Entry::Value(v) => v.origin,
            Entry::Tombstone { origin, .. } => *origin,
        }
    }

    fn accepts(&self, ts: LogicalTimestamp, origin: Id) -> bool {
        (ts, origin) > (self.timestamp(), self.origin())
    }
}

/// The local key store for one node.
///
/// Single-key operations (`put`/`get`/`delete`) are atomic: the whole map is
/// behind one [`parking_lot::RwLock`], so a write observes and commits under
/// one critical section. Range operations (`range_owned_by`) take a read
/// lock once and produce an owned snapshot, so they never observe a torn
/// view of the map.
pub struct LocalStore {
    ring: Ring,
    map: RwLock<BTreeMap<Id, (String, Entry)>>,
}

impl LocalStore {
    pub fn new(ring: Ring) -> Self {
        Self {
            ring,
            map: RwLock::new(BTreeMap::new()),
        }
    }

    fn key_id(&self, key: &str) -> Id {
        self.ring.hash_key(key)
    }

    /// `put(key, bytes, ts) -> inserts or replaces iff ts > existing.ts`
    ///, ties broken by `origin`.
    pub fn put(&self, key: &str, bytes: Vec<u8>, timestamp: LogicalTimestamp, origin: Id) -> WriteOutcome {
        let id = self.key_id(key);
        let mut map = self.map.write();
        if let Some((_, existing)) = map.get(&id) {
            if !existing.accepts(timestamp, origin) {
                debug!(key, "dropping stale write");
                return WriteOutcome::Stale;
            }
        }
        map.insert(
            id,
            (
                key.to_string(),
                Entry::Value(StoredValue { bytes, timestamp, origin }),
            ),
        );
        WriteOutcome::Applied
    }

    /// `get(key) -> Option<StoredValue>`. Returns `None` for
    /// both an absent key and a tombstoned one.
    pub fn get(&self, key: &str) -> Option<StoredValue> {
        let id = self.key_id(key);
        match &self.map.read().get(&id)?.1 {
            Entry::Value(v) => Some(v.clone()),
            Entry::Tombstone { .. } => None,
        }
    }

    /// `delete(key, ts)`: tombstones the key under the same
    /// timestamp rule as `put`.
    pub fn delete(&self, key: &str, timestamp: LogicalTimestamp, origin: Id) -> WriteOutcome {
        let id = self.key_id(key);
        let mut map = self.map.write();
        if let Some((_, existing)) = map.get(&id) {
            if !existing.accepts(timestamp, origin) {
                return WriteOutcome::Stale;
            }
        }
        map.insert(id, (key.to_string(), Entry::Tombstone { timestamp, origin }));
        WriteOutcome::Applied
    }

    /// Inserts a key directly with caller-supplied metadata, used when
    /// accepting a bulk `transfer_range` payload from a peer rather than a
    /// single client write; still obeys the last-writer-wins rule so a
    /// transfer can never regress a key that was already written locally
    /// with a newer timestamp (e.g. via replication racing a transfer).
    pub fn put_raw(&self, key: &str, value: StoredValue) -> WriteOutcome {
        let id = self.key_id(key);
        let mut map = self.map.write();
        if let Some((_, existing)) = map.get(&id) {
            if !existing.accepts(value.timestamp, value.origin) {
                return WriteOutcome::Stale;
            }
        }
        map.insert(id, (key.to_string(), Entry::Value(value)));
        WriteOutcome::Applied
    }

    /// `range_owned_by(pred_id, self_id) -> Iterator<(key, StoredValue)>`
    ///: every live (non-tombstoned) key whose id is in
    /// `(pred_id, self_id]`.
    pub fn range_owned_by(&self, pred_id: Id, self_id: Id) -> Vec<(String, StoredValue)> {
        self.map
            .read()
            .iter()
            .filter(|(id, _)| self.ring.in_right_closed(**id, pred_id, self_id))
            .filter_map(|(_, (key, entry))| match entry {
                Entry::Value(v) => Some((key.clone(), v.clone())),
                Entry::Tombstone { .. } => None,
            })
            .collect()
    }

    /// `prune_range(pred_id, self_id)`: removes every entry
    /// (value or tombstone) whose id has fallen outside `(pred_id, self_id]`
    /// because the owned arc shrank.
    pub fn prune_range(&self, pred_id: Id, self_id: Id) -> usize {
        let mut map = self.map.write();
        let to_remove: Vec<Id> = map
            .keys()
            .filter(|id| !self.ring.in_right_closed(**id, pred_id, self_id))
            .copied()
            .collect();
        for id in &to_remove {
            map.remove(id);
        }
        to_remove.len()
    }

    /// Number of live (non-tombstoned) keys, for diagnostics.
    pub fn len(&self) -> usize {
        self.map
            .read()
            .values()
            .filter(|(_, e)| matches!(e, Entry::Value(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chord_id::Ring;

    fn store() -> LocalStore {
        LocalStore::new(Ring::new(8))
    }

    #[test]
    fn put_then_get_round_trips() {
        let s = store();
        assert_eq!(
            s.put("hello", b"world".to_vec(), LogicalTimestamp(1), Id::ZERO),
            WriteOutcome::Applied
        );
        assert_eq!(s.get("hello").unwrap().bytes, b"world");
    }

    #[test]
    fn stale_write_is_dropped() {
        let s = store();
        s.put("k", b"v1".to_vec(), LogicalTimestamp(5), Id::ZERO);
        assert_eq!(
            s.put("k", b"v2".to_vec(), LogicalTimestamp(3), Id::ZERO),
            WriteOutcome::Stale
        );
        assert_eq!(s.get("k").unwrap().bytes, b"v1");
    }

    #[test]
    fn equal_timestamp_is_dropped_not_replaced() {
        let s = store();
        s.put("k", b"v1".to_vec(), LogicalTimestamp(5), Id::ZERO);
        let outcome = s.put("k", b"v2".to_vec(), LogicalTimestamp(5), Id::ZERO);
        assert_eq!(outcome, WriteOutcome::Stale);
        assert_eq!(s.get("k").unwrap().bytes, b"v1");
    }

    #[test]
    fn delete_then_get_returns_none_and_blocks_stale_resurrection() {
        let s = store();
        s.put("k", b"v1".to_vec(), LogicalTimestamp(1), Id::ZERO);
        s.delete("k", LogicalTimestamp(2), Id::ZERO);
        assert!(s.get("k").is_none());
        // a late put with an older timestamp must not resurrect the key.
        let outcome = s.put("k", b"stale".to_vec(), LogicalTimestamp(1), Id::ZERO);
        assert_eq!(outcome, WriteOutcome::Stale);
        assert!(s.get("k").is_none());
    }

    #[test]
    fn range_owned_by_respects_wrap_around() {
        let s = store();
        let ring = Ring::new(8);
        // pick keys and learn their hashed ids so the test is deterministic
        // regardless of the hash function's exact output.
        for k in ["a", "b", "c", "d"] {
            s.put(k, k.as_bytes().to_vec(), LogicalTimestamp(1), Id::ZERO);
        }
        let all_ids: Vec<Id> = ["a", "b", "c", "d"].iter().map(|k| ring.hash_key(k)).collect();
        let mut sorted = all_ids.clone();
        sorted.sort();
        // arc covering the whole ring should return everything.
        let everything = s.range_owned_by(sorted[0], sorted[0]);
        assert_eq!(everything.len(), 4);
    }

    #[test]
    fn prune_range_removes_entries_outside_arc() {
        let s = store();
        let ring = Ring::new(8);
        s.put("only-key", b"v".to_vec(), LogicalTimestamp(1), Id::ZERO);
        let id = ring.hash_key("only-key");
        assert_eq!(s.len(), 1);
        // an arc that starts and ends exactly one hop past `id`, clockwise,
        // excludes `id` itself: (id+1, id+2].
        let pred = ring.add_pow2(id, 0);
        let bound = ring.add_pow2(pred, 1);
        assert!(!ring.in_right_closed(id, pred, bound));
        let removed = s.prune_range(pred, bound);
        assert_eq!(removed, 1);
        assert_eq!(s.len(), 0);
    }
}
