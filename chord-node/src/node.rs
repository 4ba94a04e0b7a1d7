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

//! The node state machine: membership transitions, the
//! lookup/read/write operations, and the periodic routines the maintenance
//! scheduler drives. Routing state (predecessor, successor list, finger
//! table) lives behind one [`parking_lot::RwLock`], so stabilization and lookups never observe a
//! torn view of each other's updates.

use crate::config::NodeConfig;
use crate::finger::FingerTable;
use crate::replication;
use chord_client::PeerHandleCache;
use chord_id::{Id, Ring};
use chord_proto::{ChordError, LogicalTimestamp, NodeRef, StoredValue};
use chord_store::LocalStore;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

struct RoutingState {
    predecessor: Option<NodeRef>,
    successor_list: Vec<NodeRef>,
    fingers: FingerTable,
}

/// One ring member: its routing state, local key store, peer cache, and
/// configuration. Every async method here is safe to call concurrently —
/// any mutation of routing state takes the single routing lock for the
/// shortest span that keeps it consistent.
pub struct Node {
    pub self_ref: NodeRef,
    ring: Ring,
    config: NodeConfig,
    routing: RwLock<RoutingState>,
    store: LocalStore,
    peers: PeerHandleCache,
    /// Monotonic write counter, the source of `LogicalTimestamp` values this
    /// node mints as an owner: a single per-node counter that only ever
    /// increases, which is monotonic per key a fortiori.
    clock: AtomicU64,
    /// Replica set as of the last reconciliation, for diffing against the
    /// current successor list. Only the maintenance loop
    /// mutates this, so a plain lock (rather than folding it into
    /// `routing`) is sufficient.
    last_replica_set: RwLock<Vec<Id>>,
}

impl Node {
    /// `create()`: a solo ring. `predecessor` is absent, the
    /// successor list is `[self; S]`, and every finger points at `self`.
    pub fn new(config: NodeConfig) -> Self {
        let ring = Ring::new(config.m);
        let self_ref = NodeRef {
            id: ring.hash_addr(&config.listen_addr),
            addr: config.listen_addr.clone(),
        };
        let fingers = FingerTable::new(ring, self_ref.clone(), self_ref.clone());
        let successor_list = vec![self_ref.clone(); config.successor_list_length_s];
        let peers = PeerHandleCache::new(config.peer_cache_capacity, config.rpc_deadline);
        let store = LocalStore::new(ring);
        Self {
            self_ref,
            ring,
            config,
            routing: RwLock::new(RoutingState { predecessor: None, successor_list, fingers }),
            store,
            peers,
            clock: AtomicU64::new(0),
            last_replica_set: RwLock::new(Vec::new()),
        }
    }

    pub fn ring(&self) -> Ring {
        self.ring
    }

    /// `join(bootstrap_addr)`: resolves our own successor
    /// through an existing ring member, seeds the successor list and finger
    /// table naively from it, and pulls the key range we're about to own.
    /// Our own `stabilize` loop (once the maintenance scheduler starts)
    /// notifies that successor, which adopts us as its predecessor — this
    /// method does not push that notification itself.
    pub async fn join(&self, bootstrap_addr: &str) -> Result<(), ChordError> {
        let bootstrap = NodeRef { id: self.ring.hash_addr(bootstrap_addr), addr: bootstrap_addr.to_string() };
        if bootstrap.id == self.self_ref.id && bootstrap.addr != self.self_ref.addr {
            return Err(ChordError::Invariant(format!(
                "address {} hashes to the same id as this node; reject duplicate id at bootstrap",
                bootstrap.addr
            )));
        }

        let handle = self.peers.get_or_insert(&bootstrap);
        let successor = handle.find_successor(self.self_ref.clone(), self.self_ref.id).await?;
        if successor.id == self.self_ref.id && successor.addr != self.self_ref.addr {
            return Err(ChordError::Invariant(format!(
                "address {} hashes to the same id as this node; reject duplicate id at bootstrap",
                successor.addr
            )));
        }

        let succ_handle = self.peers.get_or_insert(&successor);
        let mut successor_list = vec![successor.clone()];
        if let Ok(list) = succ_handle.get_successor_list(self.self_ref.clone()).await {
            successor_list.extend(list.into_iter().filter(|n| n.id != self.self_ref.id));
        }
        successor_list.dedup_by(|a, b| a.id == b.id);
        successor_list.truncate(self.config.successor_list_length_s);
        while successor_list.len() < self.config.successor_list_length_s {
            successor_list.push(successor.clone());
        }

        let fingers = FingerTable::new(self.ring, self.self_ref.clone(), successor.clone());

        {
            let mut r = self.routing.write();
            r.predecessor = None;
            r.successor_list = successor_list;
            r.fingers = fingers;
        }

        // pull the range we're about to own. `pred_id` is ignored by the
        // callee (it has no way to know our predecessor yet); it derives
        // the arc from its own predecessor instead. See `handle_transfer_range`.
        let entries = succ_handle.transfer_range(self.self_ref.clone(), self.self_ref.id, self.self_ref.id).await?;
        for (key, value) in entries {
            self.store.put_raw(&key, value);
        }

        info!(successor = %successor, "joined ring");
        Ok(())
    }

    /// `leave()`: pushes owned keys to our successor and
    /// accelerates our predecessor's adoption by our successor. Does not
    /// stop serving requests itself — the caller (e.g. the CLI on SIGTERM)
    /// is responsible for shutting down the server after this returns.
    pub async fn leave(&self) -> Result<(), ChordError> {
        let (predecessor, successor) = {
            let r = self.routing.read();
            (r.predecessor.clone(), r.successor_list[0].clone())
        };
        if successor.id == self.self_ref.id {
            return Ok(());
        }
        let pred_arc_start = predecessor.as_ref().map(|p| p.id).unwrap_or(self.self_ref.id);
        let owned = self.store.range_owned_by(pred_arc_start, self.self_ref.id);
        let succ_handle = self.peers.get_or_insert(&successor);
        for (key, value) in owned {
            if let Err(e) = succ_handle
                .replicate_put(self.self_ref.clone(), key.clone(), value.bytes.clone(), value.timestamp, value.origin)
                .await
            {
                warn!(key, error = %e, "failed to hand off key while leaving");
            }
        }
        if let Some(p) = predecessor {
            if p.id != successor.id {
                let _ = succ_handle.notify(self.self_ref.clone(), p).await;
            }
        }
        Ok(())
    }

    fn owns(&self, id: Id) -> bool {
        let r = self.routing.read();
        match &r.predecessor {
            Some(p) => self.ring.in_right_closed(id, p.id, self.self_ref.id),
            // no predecessor: either we are alone (own everything) or we
            // just joined and have not yet been adopted (own nothing yet,
            // deferring to eventual consistency rather than wrongly
            // claiming the whole ring out from under its real owner).
            None => r.successor_list.first().map(|s| s.id == self.self_ref.id).unwrap_or(true),
        }
    }

    fn replicas(&self) -> Vec<NodeRef> {
        let r = self.routing.read();
        r.successor_list.iter().take(self.config.replication_factor_r).cloned().collect()
    }

    fn next_timestamp(&self) -> LogicalTimestamp {
        LogicalTimestamp(self.clock.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// `find_successor(id)`: answers directly if we own `id`,
    /// otherwise forwards to the closest preceding finger, recursively.
    /// `hops`/`last_hop` bound the chain and guard against routing cycles.
    pub async fn find_successor(&self, id: Id) -> Result<NodeRef, ChordError> {
        self.find_successor_inner(id, 0, None).await
    }

    pub(crate) async fn find_successor_inner(
        &self,
        id: Id,
        hops: u32,
        last_hop: Option<Id>,
    ) -> Result<NodeRef, ChordError> {
        let (self_id, successor, candidates) = {
            let r = self.routing.read();
            (self.self_ref.id, r.successor_list[0].clone(), r.fingers.candidates_preceding(id))
        };
        if self.ring.in_right_closed(id, self_id, successor.id) {
            return Ok(successor);
        }
        if hops as u64 > u64::from(self.ring.m()) + 2 {
            return Err(ChordError::LookupFailed { target: id, attempted: hops as usize });
        }

        for candidate in candidates {
            if candidate.id == self_id || Some(candidate.id) == last_hop {
                continue;
            }
            let handle = self.peers.get_or_insert(&candidate);
            match handle.find_successor_chained(self.self_ref.clone(), id, hops + 1, Some(self_id)).await {
                Ok(node) => return Ok(node),
                Err(ChordError::PeerUnreachable(_)) => continue,
                Err(other) => return Err(other),
            }
        }

        if successor.id != self_id && Some(successor.id) != last_hop {
            let handle = self.peers.get_or_insert(&successor);
            if let Ok(node) = handle.find_successor_chained(self.self_ref.clone(), id, hops + 1, Some(self_id)).await {
                return Ok(node);
            }
        }

        Err(ChordError::LookupFailed { target: id, attempted: hops as usize + 1 })
    }

    pub fn get_predecessor(&self) -> Option<NodeRef> {
        self.routing.read().predecessor.clone()
    }

    pub fn get_successor_list(&self) -> Vec<NodeRef> {
        self.routing.read().successor_list.clone()
    }

    /// `notify(candidate)`: adopts `candidate` as our
    /// predecessor iff we have none, or `candidate` lies strictly between
    /// our current predecessor and us. Idempotent: re-notifying with the
    /// already-adopted candidate is a no-op.
    pub fn notify(&self, candidate: NodeRef) {
        let mut r = self.routing.write();
        let adopt = match &r.predecessor {
            None => true,
            Some(p) => self.ring.in_open(candidate.id, p.id, self.self_ref.id),
        };
        if adopt {
            if r.predecessor.as_ref().map(|p| p.id) != Some(candidate.id) {
                info!(predecessor = %candidate, "adopted new predecessor");
            }
            r.predecessor = Some(candidate);
        }
    }

    /// `stabilize()`: asks our successor for its predecessor,
    /// adopts it as our own successor if it lies strictly between us and
    /// our current successor, then notifies our (possibly updated)
    /// successor of ourselves and refreshes the rest of the successor list.
    pub async fn stabilize(&self) {
        let successor = { self.routing.read().successor_list[0].clone() };
        if successor.id != self.self_ref.id {
            let handle = self.peers.get_or_insert(&successor);
            match handle.get_predecessor(self.self_ref.clone()).await {
                Ok(Some(candidate)) => {
                    if self.ring.in_open(candidate.id, self.self_ref.id, successor.id) {
                        let mut r = self.routing.write();
                        if r.successor_list.first().map(|s| s.id) == Some(successor.id) {
                            r.successor_list[0] = candidate;
                        }
                    }
                }
                Ok(None) => {}
                Err(ChordError::PeerUnreachable(_)) => {
                    self.handle_successor_failure(&successor).await;
                    self.reconcile_replicas().await;
                    return;
                }
                Err(_) => {}
            }
        }

        let successor = { self.routing.read().successor_list[0].clone() };
        if successor.id != self.self_ref.id {
            let handle = self.peers.get_or_insert(&successor);
            let _ = handle.notify(self.self_ref.clone(), self.self_ref.clone()).await;
            if let Ok(list) = handle.get_successor_list(self.self_ref.clone()).await {
                let mut spliced = vec![successor.clone()];
                spliced.extend(list.into_iter().filter(|n| n.id != self.self_ref.id));
                spliced.dedup_by(|a, b| a.id == b.id);
                spliced.truncate(self.config.successor_list_length_s);
                while spliced.len() < self.config.successor_list_length_s {
                    spliced.push(spliced.last().cloned().unwrap_or_else(|| self.self_ref.clone()));
                }
                let mut r = self.routing.write();
                r.successor_list = spliced;
            }
        }

        self.reconcile_replicas().await;
    }

    /// Evicts a suspect successor (two consecutive failures) from the front
    /// of the successor list, replacing it from the
    /// remainder of the list or, failing that, a fresh `find_successor`.
    async fn handle_successor_failure(&self, failed: &NodeRef) {
        let handle = self.peers.get_or_insert(failed);
        if !handle.is_suspect() {
            return;
        }
        let fallback = {
            let r = self.routing.read();
            r.successor_list.iter().skip(1).find(|n| n.id != self.self_ref.id).cloned()
        };
        let replacement = match fallback {
            Some(c) => c,
            None => match self.find_successor_inner(self.ring.add_pow2(self.self_ref.id, 0), 0, Some(failed.id)).await
            {
                Ok(n) if n.id != failed.id => n,
                _ => self.self_ref.clone(),
            },
        };
        let mut r = self.routing.write();
        if r.successor_list.first().map(|s| s.id) == Some(failed.id) {
            r.successor_list.remove(0);
            if !r.successor_list.iter().any(|n| n.id == replacement.id) {
                r.successor_list.insert(0, replacement);
            }
            while r.successor_list.len() < self.config.successor_list_length_s {
                let filler = r.successor_list.last().cloned().unwrap_or_else(|| self.self_ref.clone());
                r.successor_list.push(filler);
            }
        }
        warn!(failed = %failed, "evicted suspect successor");
    }

    /// `fix_fingers()`: refreshes one finger entry per call,
    /// round-robin, by resolving its `start` through a fresh lookup.
    pub async fn fix_fingers(&self) {
        let (index, start) = {
            let mut r = self.routing.write();
            let index = r.fingers.next_fix_index();
            (index, r.fingers.start(index))
        };
        if let Ok(node) = self.find_successor(start).await {
            let mut r = self.routing.write();
            r.fingers.set_entry(index, node);
        }
    }

    /// `check_predecessor()`: pings our predecessor; once it
    /// is suspect, we forget it, leaving room for a fresher one to notify
    /// us in.
    pub async fn check_predecessor(&self) {
        let predecessor = { self.routing.read().predecessor.clone() };
        let Some(p) = predecessor else { return };
        if p.id == self.self_ref.id {
            return;
        }
        let handle = self.peers.get_or_insert(&p);
        if handle.ping(self.self_ref.clone()).await.is_err() && handle.is_suspect() {
            let mut r = self.routing.write();
            if r.predecessor.as_ref().map(|x| x.id) == Some(p.id) {
                r.predecessor = None;
                warn!(dead = %p, "forgot unreachable predecessor");
            }
        }
    }

    /// Reconciles the owner's replica set against the current successor
    /// list: backfills nodes newly added to it and prunes the
    /// local store once the owned arc has shrunk.
    pub async fn reconcile_replicas(&self) {
        let current: Vec<NodeRef> = self.replicas();
        let current_ids: Vec<Id> = current.iter().map(|n| n.id).collect();
        let previous = { self.last_replica_set.read().clone() };
        let (added, _removed) = replication::diff_replica_sets(&previous, &current_ids);

        if !added.is_empty() {
            let pred_arc_start = {
                let r = self.routing.read();
                r.predecessor.as_ref().map(|p| p.id).unwrap_or(self.self_ref.id)
            };
            let owned = self.store.range_owned_by(pred_arc_start, self.self_ref.id);
            for new_replica_id in &added {
                if let Some(node) = current.iter().find(|n| n.id == *new_replica_id) {
                    if let Err(e) = replication::backfill(&self.peers, node, &self.self_ref, &owned).await {
                        warn!(peer = %node, error = %e, "failed to backfill new replica");
                    }
                }
            }
        }

        *self.last_replica_set.write() = current_ids;

        let pred_arc_start = {
            let r = self.routing.read();
            r.predecessor.as_ref().map(|p| p.id).unwrap_or(self.self_ref.id)
        };
        let pruned = self.store.prune_range(pred_arc_start, self.self_ref.id);
        if pruned > 0 {
            info!(pruned, "pruned keys outside owned range");
        }
    }

    /// `put(key, bytes)`: serves locally if we own the
    /// key, replicating to `R` successors per the configured write mode,
    /// otherwise forwards to the owner.
    pub async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), ChordError> {
        let target = self.ring.hash_key(key);
        if self.owns(target) {
            let timestamp = self.next_timestamp();
            let origin = self.self_ref.id;
            self.store.put(key, bytes.clone(), timestamp, origin);
            let value = StoredValue { bytes, timestamp, origin };
            self.apply_write_mode(key, &value).await?;
            return Ok(());
        }
        let owner = self.find_successor(target).await?;
        if owner.id == self.self_ref.id {
            return Err(ChordError::Invariant("routing resolved to self but self disclaims ownership".into()));
        }
        self.peers.get_or_insert(&owner).put(self.self_ref.clone(), key.to_string(), bytes).await
    }

    /// Handles a `Put` RPC landing on this node: a plain write if `self`
    /// owns the key, a replication push if `replicate` carries metadata.
    pub async fn handle_put_rpc(
        &self,
        key: &str,
        bytes: Vec<u8>,
        replicate: Option<(LogicalTimestamp, Id)>,
    ) -> Result<(), ChordError> {
        match replicate {
            Some((timestamp, origin)) => {
                self.store.put_raw(key, StoredValue { bytes, timestamp, origin });
                Ok(())
            }
            None => self.put(key, bytes).await,
        }
    }

    async fn apply_write_mode(&self, key: &str, value: &StoredValue) -> Result<(), ChordError> {
        let replicas = self.replicas();
        let required = replication::required_acks(self.config.write_mode, self.config.replication_factor_r, self.config.write_quorum_w);
        let acked = replication::push_write(&self.peers, &replicas, &self.self_ref, key, value).await;
        if required == 0 {
            // async mode: the owner already acked by storing locally;
            // replication above happens inline but its outcome never gates
            // this write's success.
            return Ok(());
        }
        if acked < required {
            return Err(ChordError::ReplicationShortfall { key: key.to_string(), acked, required });
        }
        Ok(())
    }

    /// `get(key)`: serves locally if we own the key,
    /// otherwise routes to the owner. Falls back to the owner's own
    /// successor — one of its `R` replicas — if the owner itself is
    /// unreachable.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ChordError> {
        let target = self.ring.hash_key(key);
        if self.owns(target) {
            return Ok(self.store.get(key).map(|v| v.bytes));
        }
        let owner = self.find_successor(target).await?;
        if owner.id == self.self_ref.id {
            return Ok(self.store.get(key).map(|v| v.bytes));
        }
        match self.peers.get_or_insert(&owner).get(self.self_ref.clone(), key.to_string()).await {
            Ok(bytes) => Ok(bytes),
            Err(ChordError::PeerUnreachable(_)) => {
                let next = self.ring.add_pow2(owner.id, 0);
                if let Ok(replica) = self.find_successor_inner(next, 0, Some(owner.id)).await {
                    if replica.id == self.self_ref.id {
                        return Ok(self.store.get(key).map(|v| v.bytes));
                    }
                    if replica.id != owner.id {
                        if let Ok(bytes) = self.peers.get_or_insert(&replica).get(self.self_ref.clone(), key.to_string()).await {
                            return Ok(bytes);
                        }
                    }
                }
                Err(ChordError::PeerUnreachable(owner.to_string()))
            }
            Err(other) => Err(other),
        }
    }

    /// `delete(key)`: mirrors `put`.
    pub async fn delete(&self, key: &str) -> Result<(), ChordError> {
        let target = self.ring.hash_key(key);
        if self.owns(target) {
            let timestamp = self.next_timestamp();
            let origin = self.self_ref.id;
            self.store.delete(key, timestamp, origin);
            let replicas = self.replicas();
            let required = replication::required_acks(self.config.write_mode, self.config.replication_factor_r, self.config.write_quorum_w);
            let acked = replication::push_delete(&self.peers, &replicas, &self.self_ref, key, timestamp, origin).await;
            if required > 0 && acked < required {
                return Err(ChordError::ReplicationShortfall { key: key.to_string(), acked, required });
            }
            return Ok(());
        }
        let owner = self.find_successor(target).await?;
        if owner.id == self.self_ref.id {
            return Err(ChordError::Invariant("routing resolved to self but self disclaims ownership".into()));
        }
        self.peers.get_or_insert(&owner).delete(self.self_ref.clone(), key.to_string()).await
    }

    /// Handles a `Delete` RPC landing on this node, mirroring
    /// `handle_put_rpc`.
    pub async fn handle_delete_rpc(
        &self,
        key: &str,
        replicate: Option<(LogicalTimestamp, Id)>,
    ) -> Result<(), ChordError> {
        match replicate {
            Some((timestamp, origin)) => {
                self.store.delete(key, timestamp, origin);
                Ok(())
            }
            None => self.delete(key).await,
        }
    }

    /// `transfer_range(pred_id_guess, self_id)`: called by a
    /// joining node on its new successor. `pred_id_guess` is accepted for
    /// wire-schema completeness but unused — the joining node cannot yet
    /// know its own predecessor, so the callee derives the arc from *its
    /// own* predecessor instead (or, absent one, from its own id, meaning
    /// "everything I currently own").
    pub fn transfer_range(&self, requester_self_id: Id) -> Vec<(String, StoredValue)> {
        let pred_arc_start = {
            let r = self.routing.read();
            r.predecessor.as_ref().map(|p| p.id).unwrap_or(self.self_ref.id)
        };
        self.store.range_owned_by(pred_arc_start, requester_self_id)
    }

    pub fn info(&self) -> chord_proto::NodeInfo {
        let r = self.routing.read();
        chord_proto::NodeInfo {
            id: self.self_ref.id,
            addr: self.self_ref.addr.clone(),
            predecessor: r.predecessor.clone(),
            successor_list: r.successor_list.clone(),
            fingers: r.fingers.snapshot(),
        }
    }
}
