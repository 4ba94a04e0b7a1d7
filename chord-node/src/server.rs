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

//! The HTTP transport: a single `POST /rpc` endpoint dispatching
//! on [`RpcRequest`]'s `kind` tag, plus `GET /health` and `GET /info` for
//! operators.

use crate::node::Node;
use actix_web::dev::Server;
use actix_web::middleware::Logger;
use actix_web::web::{self, Data};
use actix_web::{App, HttpResponse, HttpServer};
use chord_proto::{ChordError, RpcRequest, RpcResponse};
use std::sync::Arc;
use tracing::debug;

async fn rpc(node: Data<Arc<Node>>, request: web::Json<RpcRequest>) -> HttpResponse {
    let response = dispatch(&node, request.into_inner()).await;
    match response {
        Ok(r) => HttpResponse::Ok().json(r),
        Err(error) => {
            debug!(%error, "rpc handler returned an error");
            HttpResponse::Ok().json(RpcResponse::Error { error })
        }
    }
}

async fn dispatch(node: &Node, request: RpcRequest) -> Result<RpcResponse, ChordError> {
    match request {
        RpcRequest::FindSuccessor { id, hops, last_hop, .. } => {
            let successor = node.find_successor_inner(id, hops, last_hop).await?;
            Ok(RpcResponse::Successor { node: successor })
        }
        RpcRequest::GetPredecessor { .. } => {
            Ok(RpcResponse::Predecessor { node: node.get_predecessor() })
        }
        RpcRequest::Notify { candidate, .. } => {
            node.notify(candidate);
            Ok(RpcResponse::Notified)
        }
        RpcRequest::GetSuccessorList { .. } => {
            Ok(RpcResponse::SuccessorList { nodes: node.get_successor_list() })
        }
        RpcRequest::Put { key, bytes, replicate, .. } => {
            node.handle_put_rpc(&key, bytes, replicate).await?;
            Ok(RpcResponse::Wrote { ack: chord_proto::Ack })
        }
        RpcRequest::Get { key, .. } => {
            let bytes = node.get(&key).await?;
            Ok(RpcResponse::Value { bytes })
        }
        RpcRequest::Delete { key, replicate, .. } => {
            node.handle_delete_rpc(&key, replicate).await?;
            Ok(RpcResponse::Deleted { ack: chord_proto::Ack })
        }
        RpcRequest::TransferRange { self_id, .. } => {
            Ok(RpcResponse::Transferred { entries: node.transfer_range(self_id) })
        }
        RpcRequest::Ping { .. } => Ok(RpcResponse::Pong),
    }
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

async fn info(node: Data<Arc<Node>>) -> HttpResponse {
    HttpResponse::Ok().json(node.info())
}

/// Binds and starts the actix-web server for `node`. Returns the running
/// [`Server`] handle and the port actually bound (useful in tests that bind
/// to port 0).
pub fn serve(node: Arc<Node>, listen_addr: &str) -> std::io::Result<(Server, u16)> {
    let http_server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(node.clone()))
            .route("/rpc", web::post().to(rpc))
            .route("/health", web::get().to(health))
            .route("/info", web::get().to(info))
            .wrap(Logger::new("%a %r; took %Ts"))
    })
    .bind(listen_addr)?;
    let port = http_server.addrs()[0].port();
    Ok((http_server.run(), port))
}
