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
//! Wire types, RPC schema, and the shared error taxonomy.
//!
//! Every peer-to-peer call in the ring is one of the [`RpcRequest`] variants
//! below, answered by the matching [`RpcResponse`] variant — a single
//! tagged-variants-of-a-request enum dispatched on `kind`, in place of
//! per-message subclasses.
//! The HTTP transport (`chord-client`/`chord-node`) and the in-memory test
//! transport both speak this same schema, just over different wires.

use chord_id::Id;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A remote (or local) node's stable identity: its ring `Id` and its
/// transport address. Identity is the `id`; two `NodeRef`s with
/// the same `id` are considered the same node even if `addr` differs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeRef {
    pub id: Id,
    pub addr: String,
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for NodeRef {}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

/// A monotonically increasing per-key write counter, used to
/// resolve replica conflicts. Ties are broken by `origin` node id, larger
/// id wins, so replicas converge deterministically even when two writes land
/// at the same logical time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogicalTimestamp(pub u64);

impl LogicalTimestamp {
    pub fn next(self) -> Self {
        LogicalTimestamp(self.0 + 1)
    }
}

/// A value in the local key store, plus the write metadata needed to
/// resolve conflicting replicas.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredValue {
    pub bytes: Vec<u8>,
    pub timestamp: LogicalTimestamp,
    /// The node that first accepted this write. Diagnostic only;
    /// also used to break timestamp ties deterministically.
    pub origin: Id,
}

impl StoredValue {
    /// Whether `self` should be replaced by a write carrying `other_ts` from
    /// `other_origin`, under a strict-`>` policy (a write whose timestamp
    /// equals the stored one is dropped, not applied) with ties additionally
    /// broken by origin id so replicas converge deterministically even if
    /// two origins raced at the same timestamp.
    pub fn should_replace_with(&self, other_ts: LogicalTimestamp, other_origin: Id) -> bool {
        (other_ts, other_origin) > (self.timestamp, self.origin)
    }
}

/// A single finger table entry: `node_i` is the node this
/// entry currently believes is responsible for `start_i`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FingerEntry {
    pub index: u32,
    pub start: Id,
    pub node: NodeRef,
}

/// Acknowledgement of a write. Carries no payload; its
/// presence (rather than an error) is the acknowledgement.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Ack;

/// Snapshot of a node's routing state, returned by the client-facing
/// `info()` operation for operators and tests.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: Id,
    pub addr: String,
    pub predecessor: Option<NodeRef>,
    pub successor_list: Vec<NodeRef>,
    pub fingers: Vec<FingerEntry>,
}

/// The write-acknowledgement policy a ring is configured with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Owner acks immediately; replicas are updated in the background.
    Async,
    /// Owner acks after all `R` replicas ack (or a timeout).
    SyncR,
    /// Owner acks after `W - 1` replicas ack, `W` configured.
    QuorumW,
}

/// The error taxonomy shared by every crate in the workspace so that peers,
/// clients, and the storage layer all report failures the same way.
#[derive(Clone, Debug, thiserror::Error, Serialize, Deserialize)]
pub enum ChordError {
    /// Transport failure or timeout reaching a specific peer. Recoverable
    /// by routing around the peer.
    #[error("peer {0} unreachable")]
    PeerUnreachable(String),

    /// `find_successor` exhausted all routing candidates.
    #[error("lookup for id {target} failed after exhausting {attempted} candidate(s)")]
    LookupFailed { target: Id, attempted: usize },

    /// An RPC landed on a node that does not own the target key; `hint` is
    /// the best-known owner the node can suggest.
    #[error("not owner of {key}, try {hint:?}")]
    NotOwner { key: String, hint: Option<NodeRef> },

    /// A write whose timestamp was `<=` the stored one; dropped at the
    /// storage layer, but reported as success to the writer under
    /// last-writer-wins semantics — surfaced here only for
    /// diagnostics, never to a client.
    #[error("stale write for {0}")]
    StaleWrite(String),

    /// Fewer than the required number of replicas acknowledged within the
    /// deadline (`sync_r`/`quorum_w` modes only); retryable.
    #[error("replication shortfall for {key}: {acked}/{required} replicas acked")]
    ReplicationShortfall {
        key: String,
        acked: usize,
        required: usize,
    },

    /// An RPC payload failed validation; connection-local, never retried.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// A node-internal invariant was violated (e.g. predecessor id equal to
    /// self id in a non-solo ring). Fatal for the node that observed it:
    /// the maintenance loop stops scheduling further ticks rather than
    /// silently continuing in a corrupted state.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// One request across the peer wire protocol. `from` identifies
/// the caller; the payload is kind-specific.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RpcRequest {
    /// `hops` and `last_hop` exist only to bound the recursive routing chain
    ///. A client issuing a fresh lookup always sets `hops: 0,
    /// last_hop: None`; each forwarding node increments `hops` and records
    /// its own id as `last_hop` before forwarding further.
    FindSuccessor {
        from: NodeRef,
        id: Id,
        hops: u32,
        last_hop: Option<Id>,
    },
    GetPredecessor { from: NodeRef },
    Notify { from: NodeRef, candidate: NodeRef },
    GetSuccessorList { from: NodeRef },
    /// `replicate` is `None` for a plain client/peer write, which the
    /// receiving owner timestamps itself. It carries the owner's original
    /// `(timestamp, origin)` when this `Put` is a replication push rather
    /// than a fresh write — the replica must store that metadata verbatim
    /// rather than minting its own, or replicas would never agree with
    /// their owner.
    Put {
        from: NodeRef,
        key: String,
        bytes: Vec<u8>,
        replicate: Option<(LogicalTimestamp, Id)>,
    },
    Get { from: NodeRef, key: String },
    Delete {
        from: NodeRef,
        key: String,
        replicate: Option<(LogicalTimestamp, Id)>,
    },
    TransferRange { from: NodeRef, pred_id: Id, self_id: Id },
    Ping { from: NodeRef },
}

/// The response matching an [`RpcRequest`] variant.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RpcResponse {
    Successor { node: NodeRef },
    Predecessor { node: Option<NodeRef> },
    Notified,
    SuccessorList { nodes: Vec<NodeRef> },
    Wrote { ack: Ack },
    Value { bytes: Option<Vec<u8>> },
    Deleted { ack: Ack },
    Transferred { entries: Vec<(String, StoredValue)> },
    Pong,
    Error { error: ChordError },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_ties_break_on_origin() {
        let v = StoredValue {
            bytes: vec![1],
            timestamp: LogicalTimestamp(5),
            origin: Id::ZERO,
        };
        // same timestamp, higher origin id: still replaces under (ts, origin) lexicographic order.
        let higher_origin = chord_id::Id(ethnum::U256::from(7u32));
        assert!(v.should_replace_with(LogicalTimestamp(5), higher_origin));
        // strictly lower timestamp never replaces, regardless of origin.
        assert!(!v.should_replace_with(LogicalTimestamp(4), higher_origin));
        // equal timestamp and equal-or-lower origin does not replace (strict `>` policy).
        assert!(!v.should_replace_with(LogicalTimestamp(5), Id::ZERO));
    }

    #[test]
    fn rpc_request_round_trips_through_json() {
        let req = RpcRequest::FindSuccessor {
            from: NodeRef { id: Id::ZERO, addr: "127.0.0.1:9000".into() },
            id: Id::ZERO,
            hops: 0,
            last_hop: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: RpcRequest = serde_json::from_str(&json).unwrap();
        match back {
            RpcRequest::FindSuccessor { id, .. } => assert_eq!(id, Id::ZERO),
            _ => panic!("wrong variant"),
        }
    }
}
