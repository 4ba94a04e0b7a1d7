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
use chord_node::{MaintenanceScheduler, Node, NodeConfig};
use chord_proto::WriteMode;
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, info, warn};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliWriteMode {
    Async,
    SyncR,
    QuorumW,
}

impl From<CliWriteMode> for WriteMode {
    fn from(mode: CliWriteMode) -> Self {
        match mode {
            CliWriteMode::Async => WriteMode::Async,
            CliWriteMode::SyncR => WriteMode::SyncR,
            CliWriteMode::QuorumW => WriteMode::QuorumW,
        }
    }
}

#[derive(Parser, Debug)]
struct Args {
    /// Address this node binds to and is addressed by in the ring.
    #[arg(long, env = "CHORD_LISTEN_ADDR")]
    listen_addr: String,
    /// Address of an existing ring member to join through. Omit to start a
    /// solo ring.
    #[arg(long, env = "CHORD_BOOTSTRAP_PEER")]
    bootstrap_peer: Option<String>,
    /// Identifier bit-width.
    #[arg(long, default_value_t = 160, env = "CHORD_M")]
    m: u32,
    /// Replication factor `R`.
    #[arg(long, default_value_t = 3, env = "CHORD_REPLICATION_FACTOR_R")]
    replication_factor_r: usize,
    /// Successor list length `S`; defaults to `r + 1` if unset.
    #[arg(long, env = "CHORD_SUCCESSOR_LIST_LENGTH_S")]
    successor_list_length_s: Option<usize>,
    /// Base maintenance tick period, in milliseconds.
    #[arg(long, default_value_t = 250, env = "CHORD_MAINTENANCE_PERIOD_MS")]
    maintenance_period_ms: u64,
    /// Per-peer RPC deadline, in milliseconds.
    #[arg(long, default_value_t = 2000, env = "CHORD_RPC_DEADLINE_MS")]
    rpc_deadline_ms: u64,
    /// Write acknowledgement policy.
    #[arg(long, value_enum, default_value_t = CliWriteMode::SyncR, env = "CHORD_WRITE_MODE")]
    write_mode: CliWriteMode,
    /// Write quorum `W`, used only when `--write-mode quorum-w`.
    #[arg(long, env = "CHORD_WRITE_QUORUM_W")]
    write_quorum_w: Option<usize>,
    /// Peer-handle LRU cache capacity.
    #[arg(long, default_value_t = 256, env = "CHORD_PEER_CACHE_CAPACITY")]
    peer_cache_capacity: usize,
    #[arg(short, long, env = "CHORD_VERBOSE")]
    verbose: bool,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let r = args.replication_factor_r;
    let mut config = NodeConfig::new(args.listen_addr.clone());
    config.m = args.m;
    config.replication_factor_r = r;
    config.successor_list_length_s = args.successor_list_length_s.unwrap_or(r + 1);
    config.maintenance_period_t_base = Duration::from_millis(args.maintenance_period_ms);
    config.rpc_deadline = Duration::from_millis(args.rpc_deadline_ms);
    config.write_mode = args.write_mode.into();
    config.write_quorum_w = args.write_quorum_w.unwrap_or(r);
    config.peer_cache_capacity = args.peer_cache_capacity;

    let node = Arc::new(Node::new(config.clone()));
    info!(id = %node.self_ref.id, addr = %node.self_ref.addr, "starting node");

    if let Some(bootstrap) = &args.bootstrap_peer {
        info!(bootstrap, "joining ring");
        node.join(bootstrap).await.map_err(|e| std::io::Error::other(e.to_string()))?;
    } else {
        info!("starting solo ring");
    }

    let maintenance = MaintenanceScheduler::start(node.clone(), config.maintenance_period_t_base);
    let (server, port) = chord_node::server::serve(node.clone(), &args.listen_addr)?;
    info!(port, "listening for rpc");

    let server_handle = server.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal, leaving ring");
            if let Err(e) = node.leave().await {
                warn!(error = %e, "graceful leave failed");
            }
            server_handle.stop(true).await;
        }
    });

    server.await?;
    maintenance.stop();
    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    Registry::default()
        .with(tracing_subscriber::fmt::layer().with_filter(Targets::new().with_default(level)))
        .try_init()
        .ok();
}
