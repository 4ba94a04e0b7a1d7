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

//! The node crate: routing/membership state machine ([`node`]), the
//! per-node finger table ([`finger`]), the periodic maintenance loop
//! ([`maintenance`]), replica bookkeeping ([`replication`]), the HTTP
//! transport ([`server`]), and node [`config`].

pub mod config;
pub mod finger;
pub mod maintenance;
pub mod node;
pub mod replication;
pub mod server;

pub use config::NodeConfig;
pub use maintenance::MaintenanceScheduler;
pub use node::Node;
