//   Copyright 2025 The Tether Project
//   SPDX-License-Identifier: BSD-3-Clause

//! HTTP surface consumed by the workspace-proxy collaborator.
//!
//! Authentication happens upstream; by the time a request reaches this
//! router it is trusted. The coordinate endpoint upgrades to a websocket and
//! bridges binary messages onto an in-memory duplex stream served as a
//! multi-agent peer, so the websocket speaks the exact framed protocol of
//! every other coordinator stream.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use log::*;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use uuid::Uuid;

use crate::{coordinator::Coordinator, node::PeerId};

const LOG_TARGET: &str = "tether::coordinator::http";

const BRIDGE_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub struct AgentIsLegacyResponse {
    pub found: bool,
    pub legacy: bool,
}

pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/workspaceagents/:agent_id/legacy", get(agent_is_legacy))
        .route("/workspaceproxies/me/coordinate", get(proxy_coordinate))
        .route("/debug/coordinator", get(debug_dump))
        .with_state(coordinator)
}

async fn agent_is_legacy(
    State(coordinator): State<Arc<Coordinator>>,
    Path(agent_id): Path<String>,
) -> Response {
    let Ok(agent_id) = agent_id.parse::<PeerId>() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "message": "Missing UUID in URL." })),
        )
            .into_response();
    };
    let node = coordinator.node_of(agent_id);
    Json(AgentIsLegacyResponse {
        found: node.is_some(),
        legacy: node.map(|node| node.has_legacy_addr()).unwrap_or(false),
    })
    .into_response()
}

async fn proxy_coordinate(
    State(coordinator): State<Arc<Coordinator>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| proxy_session(socket, coordinator))
}

async fn proxy_session(socket: WebSocket, coordinator: Arc<Coordinator>) {
    let peer_id = Uuid::new_v4();
    let (bridge, stream) = tokio::io::duplex(BRIDGE_BUFFER_SIZE);

    let serve = tokio::spawn(async move {
        coordinator.serve_multi_agent_stream(stream, peer_id).await
    });

    pump_websocket(socket, bridge, peer_id).await;

    // Dropping our end of the bridge is EOF for the serve loop.
    match serve.await {
        Ok(Ok(())) => {},
        Ok(Err(err)) => {
            debug!(target: LOG_TARGET, "Workspace proxy session '{}' ended: {}", peer_id, err)
        },
        Err(err) => {
            error!(target: LOG_TARGET, "Workspace proxy session '{}' panicked: {}", peer_id, err)
        },
    }
}

/// Shovels bytes between websocket binary messages and the bridge stream
/// until either side closes. Message boundaries carry no meaning; the framed
/// protocol delimits itself.
async fn pump_websocket(socket: WebSocket, bridge: DuplexStream, peer_id: PeerId) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (mut bridge_read, mut bridge_write) = tokio::io::split(bridge);
    let mut buf = vec![0u8; 4096];
    loop {
        tokio::select! {
            message = ws_stream.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    if bridge_write.write_all(&data).await.is_err() {
                        break;
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                // Pings and pongs are handled by axum; text is not part of
                // this protocol.
                Some(Ok(_)) => {},
                Some(Err(err)) => {
                    debug!(target: LOG_TARGET, "Websocket error for proxy '{}': {}", peer_id, err);
                    break;
                },
            },
            read = bridge_read.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    if ws_sink.send(Message::Binary(buf[..n].to_vec())).await.is_err() {
                        break;
                    }
                },
                Err(err) => {
                    debug!(target: LOG_TARGET, "Bridge read failed for proxy '{}': {}", peer_id, err);
                    break;
                },
            },
        }
    }
}

async fn debug_dump(State(coordinator): State<Arc<Coordinator>>) -> Response {
    match coordinator.debug_snapshot() {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => {
            error!(target: LOG_TARGET, "Failed to snapshot coordinator state: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        },
    }
}
