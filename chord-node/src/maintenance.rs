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

//! The periodic maintenance loop: `stabilize` and
//! `fix_fingers` every `T_base`, `check_predecessor` every `2 * T_base`.
//! Replica reconciliation piggybacks on `stabilize` rather than running on
//! its own tick, since it only ever needs to react to a successor-list
//! change that `stabilize` itself just computed.

use crate::node::Node;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Owns the three periodic tasks for one [`Node`]. Dropping this (or
/// calling [`MaintenanceScheduler::stop`]) aborts them.
pub struct MaintenanceScheduler {
    handles: Vec<JoinHandle<()>>,
}

impl MaintenanceScheduler {
    /// Spawns the stabilize/fix_fingers/check_predecessor loops on the
    /// current Tokio runtime.
    pub fn start(node: Arc<Node>, period: Duration) -> Self {
        let mut handles = Vec::with_capacity(3);

        let stabilize_node = node.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                stabilize_node.stabilize().await;
            }
        }));

        let fingers_node = node.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                fingers_node.fix_fingers().await;
            }
        }));

        let predecessor_node = node;
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period * 2);
            loop {
                interval.tick().await;
                predecessor_node.check_predecessor().await;
            }
        }));

        Self { handles }
    }

    /// Aborts every maintenance task, leaving the node otherwise
    /// functional (it continues serving RPCs; it simply stops healing its
    /// own routing state).
    pub fn stop(self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl Drop for MaintenanceScheduler {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
