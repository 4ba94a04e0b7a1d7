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

//! Node configuration. `listen_addr` is the only field without a
//! sane default; every other field falls back to a documented default.

use chord_proto::WriteMode;
use std::time::Duration;

/// Configuration for one ring node. Construct with [`NodeConfig::new`] and
/// adjust fields directly — this is a plain data struct, not a builder,
/// since every field is `pub` and cheap to set.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Address this node binds to and is addressed by; `self.id =
    /// hash_addr(listen_addr)`.
    pub listen_addr: String,
    /// Address of an existing ring member to join through. Absent means
    /// create a solo ring.
    pub bootstrap_peer: Option<String>,
    /// Identifier bit-width. Default 160, a production-realistic value;
    /// tests typically use 8.
    pub m: u32,
    /// Replication factor `R`: number of successors each owned key is
    /// copied to. Default 3.
    pub replication_factor_r: usize,
    /// Successor list length `S`. Default `r + 1`.
    pub successor_list_length_s: usize,
    /// Base maintenance tick period `T_base`. Default 250ms.
    pub maintenance_period_t_base: Duration,
    /// Default peer RPC deadline. Default 2s.
    pub rpc_deadline: Duration,
    /// Write acknowledgement policy. Default `SyncR`.
    pub write_mode: WriteMode,
    /// Write quorum `W`, used only when `write_mode == QuorumW`. Default
    /// `r`.
    pub write_quorum_w: usize,
    /// Capacity of the peer-handle LRU cache.
    pub peer_cache_capacity: usize,
}

impl NodeConfig {
    pub fn new(listen_addr: impl Into<String>) -> Self {
        let r = 3;
        Self {
            listen_addr: listen_addr.into(),
            bootstrap_peer: None,
            m: 160,
            replication_factor_r: r,
            successor_list_length_s: r + 1,
            maintenance_period_t_base: Duration::from_millis(250),
            rpc_deadline: Duration::from_secs(2),
            write_mode: WriteMode::SyncR,
            write_quorum_w: r,
            peer_cache_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_production_sized() {
        let cfg = NodeConfig::new("127.0.0.1:9000");
        assert_eq!(cfg.m, 160);
        assert_eq!(cfg.replication_factor_r, 3);
        assert_eq!(cfg.successor_list_length_s, 4);
        assert_eq!(cfg.maintenance_period_t_base, Duration::from_millis(250));
        assert_eq!(cfg.rpc_deadline, Duration::from_secs(2));
        assert_eq!(cfg.write_mode, WriteMode::SyncR);
        assert_eq!(cfg.write_quorum_w, 3);
    }
}
