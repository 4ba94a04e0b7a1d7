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

//! Replication: pushing owned writes to the `R` nodes following
//! the owner in the ring, and reconciling the replica set as the successor
//! list changes. The wire protocol has no dedicated "replicate" RPC kind, so
//! a replication push reuses `Put`/`Delete` with their `replicate` field
//! set, so the receiver stores the owner's original timestamp rather than
//! minting its own.

use chord_client::PeerHandleCache;
use chord_id::Id;
use chord_proto::{ChordError, LogicalTimestamp, NodeRef, StoredValue};
use std::collections::HashSet;
use tracing::warn;

/// Splits a successor-list transition into the replica ids that are new
/// (need a full key range pushed to them) and the ones dropped (no longer
/// replicas of anything this node owns). Pure and independently testable;
/// `reconcile_replicas` is the only caller.
pub fn diff_replica_sets(old: &[Id], new: &[Id]) -> (Vec<Id>, Vec<Id>) {
    let old_set: HashSet<Id> = old.iter().copied().collect();
    let new_set: HashSet<Id> = new.iter().copied().collect();
    let added = new.iter().copied().filter(|id| !old_set.contains(id)).collect();
    let removed = old.iter().copied().filter(|id| !new_set.contains(id)).collect();
    (added, removed)
}

/// Pushes one write to every replica, returning the number that
/// acknowledged. Unreachable replicas are logged and skipped rather than
/// failing the whole push — `write_mode` interprets the count.
pub async fn push_write(
    peers: &PeerHandleCache,
    replicas: &[NodeRef],
    from: &NodeRef,
    key: &str,
    value: &StoredValue,
) -> usize {
    let mut acked = 0;
    for replica in replicas {
        if replica.id == from.id {
            continue;
        }
        let handle = peers.get_or_insert(replica);
        match handle
            .replicate_put(from.clone(), key.to_string(), value.bytes.clone(), value.timestamp, value.origin)
            .await
        {
            Ok(()) => acked += 1,
            Err(e) => warn!(peer = %replica, key, error = %e, "replica write failed"),
        }
    }
    acked
}

/// Replication counterpart for a delete: the same acknowledgement policy
/// applies to deletes as to writes.
pub async fn push_delete(
    peers: &PeerHandleCache,
    replicas: &[NodeRef],
    from: &NodeRef,
    key: &str,
    timestamp: LogicalTimestamp,
    origin: Id,
) -> usize {
    let mut acked = 0;
    for replica in replicas {
        if replica.id == from.id {
            continue;
        }
        let handle = peers.get_or_insert(replica);
        match handle.replicate_delete(from.clone(), key.to_string(), timestamp, origin).await {
            Ok(()) => acked += 1,
            Err(e) => warn!(peer = %replica, key, error = %e, "replica delete failed"),
        }
    }
    acked
}

/// Pushes a full key range to a single newly-added replica, one key at a
/// time since the wire protocol has no bulk-put.
pub async fn backfill(
    peers: &PeerHandleCache,
    replica: &NodeRef,
    from: &NodeRef,
    entries: &[(String, StoredValue)],
) -> Result<(), ChordError> {
    let handle = peers.get_or_insert(replica);
    for (key, value) in entries {
        handle
            .replicate_put(from.clone(), key.clone(), value.bytes.clone(), value.timestamp, value.origin)
            .await?;
    }
    Ok(())
}

/// Required acknowledgement count for a given write mode:
/// `Async` needs none before the owner acks, `SyncR` needs all `r`
/// replicas, `QuorumW` needs `w - 1` (the owner itself counts as the first
/// of `w`).
pub fn required_acks(mode: chord_proto::WriteMode, r: usize, w: usize) -> usize {
    match mode {
        chord_proto::WriteMode::Async => 0,
        chord_proto::WriteMode::SyncR => r,
        chord_proto::WriteMode::QuorumW => w.saturating_sub(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(v: u64) -> Id {
        Id(ethnum::U256::from(v))
    }

    #[test]
    fn diff_identifies_added_and_removed() {
        let old = vec![id(1), id(2), id(3)];
        let new = vec![id(2), id(3), id(4)];
        let (added, removed) = diff_replica_sets(&old, &new);
        assert_eq!(added, vec![id(4)]);
        assert_eq!(removed, vec![id(1)]);
    }

    #[test]
    fn diff_is_empty_when_sets_match() {
        let old = vec![id(1), id(2)];
        let new = vec![id(2), id(1)];
        let (added, removed) = diff_replica_sets(&old, &new);
        assert!(added.is_empty());
        assert!(removed.is_empty());
    }

    #[test]
    fn required_acks_matches_write_mode() {
        assert_eq!(required_acks(chord_proto::WriteMode::Async, 3, 3), 0);
        assert_eq!(required_acks(chord_proto::WriteMode::SyncR, 3, 3), 3);
        assert_eq!(required_acks(chord_proto::WriteMode::QuorumW, 3, 2), 1);
    }
}
