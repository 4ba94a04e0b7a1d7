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
//! Peer handle / RPC client: one typed request/response
//! exchange with a single remote node, plus the health tracking that feeds
//! the maintenance scheduler's suspect/dead peer decisions.

use chord_id::Id;
use chord_proto::{ChordError, NodeRef, RpcRequest, RpcResponse, StoredValue};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A single, typed exchange with one remote node.
///
/// Updates a per-peer "last-ok" timestamp on success and tracks
/// consecutive failures: two in a row flip the peer into the "suspect"
/// state, after which calls use a reduced timeout and a
/// single retry rather than the normal single-attempt path.
pub struct PeerHandle {
    target: NodeRef,
    client: reqwest::Client,
    avg_rtt_millis: AtomicU32,
    consecutive_failures: AtomicU32,
    last_ok_millis: AtomicU32,
    epoch: std::time::Instant,
}

const SUSPECT_THRESHOLD: u32 = 2;

impl PeerHandle {
    pub fn new(target: NodeRef, deadline: Duration) -> Self {
        Self {
            target,
            client: reqwest::Client::new(),
            // seed the rolling average so the first call uses the
            // configured default deadline (2x this seed, configurable).
            avg_rtt_millis: AtomicU32::new((deadline.as_millis() / 2).max(1) as u32),
            consecutive_failures: AtomicU32::new(0),
            last_ok_millis: AtomicU32::new(0),
            epoch: std::time::Instant::now(),
        }
    }

    pub fn target(&self) -> &NodeRef {
        &self.target
    }

    /// Whether this peer has failed two consecutive calls within the
    /// current maintenance cycle.
    pub fn is_suspect(&self) -> bool {
        self.consecutive_failures.load(Ordering::Relaxed) >= SUSPECT_THRESHOLD
    }

    /// Time elapsed since the last successful call, if there has been one.
    pub fn last_ok_elapsed(&self) -> Option<Duration> {
        let last = self.last_ok_millis.load(Ordering::Relaxed);
        if last == 0 {
            None
        } else {
            Some(self.epoch.elapsed().saturating_sub(Duration::from_millis(u64::from(last))))
        }
    }

    fn effective_deadline(&self) -> Duration {
        let avg = self.avg_rtt_millis.load(Ordering::Relaxed).max(1);
        let computed = Duration::from_millis(u64::from(avg) * 2);
        computed.max(Duration::from_millis(20))
    }

    fn record_success(&self, rtt: Duration) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let prev = self.avg_rtt_millis.load(Ordering::Relaxed) as f64;
        let sample = rtt.as_millis() as f64;
        let updated = (prev * 0.8 + sample * 0.2).max(1.0) as u32;
        self.avg_rtt_millis.store(updated, Ordering::Relaxed);
        let now_millis = self.epoch.elapsed().as_millis() as u32;
        self.last_ok_millis.store(now_millis, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    async fn attempt(&self, request: &RpcRequest, timeout: Duration) -> Result<RpcResponse, ChordError> {
        let started = std::time::Instant::now();
        let result = self
            .client
            .post(format!("http://{}/rpc", self.target.addr))
            .timeout(timeout)
            .json(request)
            .send()
            .await;
        match result {
            Ok(resp) => match resp.json::<RpcResponse>().await {
                Ok(RpcResponse::Error { error }) => {
                    // a well-formed error response is not a transport
                    // failure: the peer is alive and answered.
                    self.record_success(started.elapsed());
                    Err(error)
                }
                Ok(other) => {
                    self.record_success(started.elapsed());
                    Ok(other)
                }
                Err(e) => {
                    self.record_failure();
                    Err(ChordError::Malformed(e.to_string()))
                }
            },
            Err(e) => {
                self.record_failure();
                Err(ChordError::PeerUnreachable(format!("{}: {e}", self.target.addr)))
            }
        }
    }

    /// Issues one RPC, honoring the suspect-state reduced-timeout-plus-retry
    /// policy.
    pub async fn call(&self, request: RpcRequest) -> Result<RpcResponse, ChordError> {
        if self.is_suspect() {
            let reduced = self.effective_deadline() / 2;
            match self.attempt(&request, reduced).await {
                Ok(r) => Ok(r),
                Err(ChordError::PeerUnreachable(_)) => {
                    debug!(peer = %self.target, "suspect peer retry");
                    self.attempt(&request, reduced).await
                }
                Err(other) => Err(other),
            }
        } else {
            self.attempt(&request, self.effective_deadline()).await
        }
    }

    /// Starts a fresh lookup (`hops: 0, last_hop: None`).
    pub async fn find_successor(&self, from: NodeRef, id: Id) -> Result<NodeRef, ChordError> {
        self.find_successor_chained(from, id, 0, None).await
    }

    /// Forwards an in-flight lookup, carrying its hop count and the last
    /// hop visited so the remote node can detect routing cycles.
    pub async fn find_successor_chained(
        &self,
        from: NodeRef,
        id: Id,
        hops: u32,
        last_hop: Option<Id>,
    ) -> Result<NodeRef, ChordError> {
        match self
            .call(RpcRequest::FindSuccessor { from, id, hops, last_hop })
            .await?
        {
            RpcResponse::Successor { node } => Ok(node),
            _ => Err(ChordError::Malformed("unexpected response to find_successor".into())),
        }
    }

    pub async fn get_predecessor(&self, from: NodeRef) -> Result<Option<NodeRef>, ChordError> {
        match self.call(RpcRequest::GetPredecessor { from }).await? {
            RpcResponse::Predecessor { node } => Ok(node),
            _ => Err(ChordError::Malformed("unexpected response to get_predecessor".into())),
        }
    }

    pub async fn notify(&self, from: NodeRef, candidate: NodeRef) -> Result<(), ChordError> {
        match self.call(RpcRequest::Notify { from, candidate }).await? {
            RpcResponse::Notified => Ok(()),
            _ => Err(ChordError::Malformed("unexpected response to notify".into())),
        }
    }

    pub async fn get_successor_list(&self, from: NodeRef) -> Result<Vec<NodeRef>, ChordError> {
        match self.call(RpcRequest::GetSuccessorList { from }).await? {
            RpcResponse::SuccessorList { nodes } => Ok(nodes),
            _ => Err(ChordError::Malformed("unexpected response to get_successor_list".into())),
        }
    }

    pub async fn put(&self, from: NodeRef, key: String, bytes: Vec<u8>) -> Result<(), ChordError> {
        match self.call(RpcRequest::Put { from, key, bytes, replicate: None }).await? {
            RpcResponse::Wrote { .. } => Ok(()),
            _ => Err(ChordError::Malformed("unexpected response to put".into())),
        }
    }

    /// Pushes a write carrying its original owner-assigned timestamp and
    /// origin, for replicating an already-accepted write to a successor
    /// rather than minting a fresh one at the receiver.
    pub async fn replicate_put(
        &self,
        from: NodeRef,
        key: String,
        bytes: Vec<u8>,
        timestamp: chord_proto::LogicalTimestamp,
        origin: Id,
    ) -> Result<(), ChordError> {
        match self
            .call(RpcRequest::Put { from, key, bytes, replicate: Some((timestamp, origin)) })
            .await?
        {
            RpcResponse::Wrote { .. } => Ok(()),
            _ => Err(ChordError::Malformed("unexpected response to put".into())),
        }
    }

    pub async fn get(&self, from: NodeRef, key: String) -> Result<Option<Vec<u8>>, ChordError> {
        match self.call(RpcRequest::Get { from, key }).await? {
            RpcResponse::Value { bytes } => Ok(bytes),
            _ => Err(ChordError::Malformed("unexpected response to get".into())),
        }
    }

    pub async fn delete(&self, from: NodeRef, key: String) -> Result<(), ChordError> {
        match self.call(RpcRequest::Delete { from, key, replicate: None }).await? {
            RpcResponse::Deleted { .. } => Ok(()),
            _ => Err(ChordError::Malformed("unexpected response to delete".into())),
        }
    }

    /// Replication counterpart to [`PeerHandle::delete`]; see
    /// [`PeerHandle::replicate_put`].
    pub async fn replicate_delete(
        &self,
        from: NodeRef,
        key: String,
        timestamp: chord_proto::LogicalTimestamp,
        origin: Id,
    ) -> Result<(), ChordError> {
        match self
            .call(RpcRequest::Delete { from, key, replicate: Some((timestamp, origin)) })
            .await?
        {
            RpcResponse::Deleted { .. } => Ok(()),
            _ => Err(ChordError::Malformed("unexpected response to delete".into())),
        }
    }

    pub async fn transfer_range(
        &self,
        from: NodeRef,
        pred_id: Id,
        self_id: Id,
    ) -> Result<Vec<(String, StoredValue)>, ChordError> {
        match self.call(RpcRequest::TransferRange { from, pred_id, self_id }).await? {
            RpcResponse::Transferred { entries } => Ok(entries),
            _ => Err(ChordError::Malformed("unexpected response to transfer_range".into())),
        }
    }

    pub async fn ping(&self, from: NodeRef) -> Result<(), ChordError> {
        match self.call(RpcRequest::Ping { from }).await? {
            RpcResponse::Pong => Ok(()),
            _ => Err(ChordError::Malformed("unexpected response to ping".into())),
        }
    }
}

/// A bounded cache of [`PeerHandle`]s, one per peer, evicted LRU: connections
/// are shared per peer, with a max of one handle per peer id.
pub struct PeerHandleCache {
    deadline: Duration,
    handles: Mutex<LruCache<Id, Arc<PeerHandle>>>,
}

impl PeerHandleCache {
    pub fn new(capacity: usize, deadline: Duration) -> Self {
        Self {
            deadline,
            handles: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("capacity must be nonzero"),
            )),
        }
    }

    /// Returns the cached handle for `node`, redialing (constructing a
    /// fresh handle) if none is cached or the cached one is for a stale
    /// address — the handle "must transparently redial after
    /// `PeerUnreachable`" by virtue of `reqwest::Client`
    /// re-establishing connections per request on failure.
    pub fn get_or_insert(&self, node: &NodeRef) -> Arc<PeerHandle> {
        let mut handles = self.handles.lock();
        if let Some(existing) = handles.get(&node.id) {
            if existing.target.addr == node.addr {
                return existing.clone();
            }
        }
        let handle = Arc::new(PeerHandle::new(node.clone(), self.deadline));
        if let Some((_, evicted)) = handles.push(node.id, handle.clone()) {
            if evicted.target.id != node.id {
                warn!(peer = %evicted.target, "evicted peer handle from LRU cache");
            }
        }
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64, addr: &str) -> NodeRef {
        NodeRef {
            id: Id(ethnum::U256::from(id)),
            addr: addr.to_string(),
        }
    }

    #[tokio::test]
    async fn unreachable_peer_surfaces_peer_unreachable() {
        let handle = PeerHandle::new(node(1, "127.0.0.1:1"), Duration::from_millis(200));
        let err = handle
            .find_successor(node(2, "127.0.0.1:2"), Id::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, ChordError::PeerUnreachable(_)));
        assert!(handle.is_suspect() == false, "one failure alone is not yet suspect");
    }

    #[tokio::test]
    async fn two_failures_mark_suspect() {
        let handle = PeerHandle::new(node(1, "127.0.0.1:1"), Duration::from_millis(50));
        let _ = handle.ping(node(2, "127.0.0.1:2")).await;
        let _ = handle.ping(node(2, "127.0.0.1:2")).await;
        assert!(handle.is_suspect());
    }

    #[test]
    fn cache_evicts_lru_beyond_capacity() {
        let cache = PeerHandleCache::new(1, Duration::from_secs(1));
        let a = cache.get_or_insert(&node(1, "http://a"));
        let b = cache.get_or_insert(&node(2, "http://b"));
        let a_again = cache.get_or_insert(&node(1, "http://a"));
        assert!(!Arc::ptr_eq(&a, &a_again), "evicted peer gets a fresh handle");
        assert_eq!(b.target().addr, "http://b");
    }
}
