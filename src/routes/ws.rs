//! WebSocket handler — protocol dispatch and audience selection.
//!
//! DESIGN
//! ======
//! On upgrade, the connection gets an id and a per-connection outbound
//! channel, then enters a `select!` loop:
//! - inbound client messages → parse + dispatch to a service
//! - broadcast messages from peers → forward to the socket
//! - identification grace timer → anonymous auto-identify
//!
//! Service calls are pure business logic returning data; this layer owns
//! all outbound concerns as a list of `Outbound` values with an audience
//! (sender / others / all) and applies them after the handler returns.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → Connecting: sender registered, grace timer armed
//! 2. `identify` (or timeout / first message) → Active: scene snapshot sent
//! 3. Mutations → ack to sender + broadcast to the room
//! 4. Close → token ghosted, `user.disconnected` broadcast

use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::protocol::{ClientMessage, ErrorKind, ServerMessage};
use crate::services::persistence::env_parse;
use crate::services::presence::ConnCtx;
use crate::services::{battlemap, broadcast, grid, presence};
use crate::state::{AppState, UserToken};

const DEFAULT_IDENTIFY_GRACE_SECS: u64 = 5;

// =============================================================================
// OUTBOUND
// =============================================================================

/// Who receives a message produced by a handler. `All` reaches the sender
/// through its own broadcast channel; `Sender` goes straight down the
/// socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Audience {
    Sender,
    Others,
    All,
}

pub(crate) struct Outbound {
    pub(crate) audience: Audience,
    pub(crate) message: ServerMessage,
}

impl Outbound {
    fn sender(message: ServerMessage) -> Self {
        Self { audience: Audience::Sender, message }
    }

    fn others(message: ServerMessage) -> Self {
        Self { audience: Audience::Others, message }
    }

    fn all(message: ServerMessage) -> Self {
        Self { audience: Audience::All, message }
    }
}

// =============================================================================
// UPGRADE + CONNECTION
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();

    // Per-connection channel for messages broadcast by peers.
    let (client_tx, mut client_rx) = mpsc::channel::<ServerMessage>(256);
    state.session.write().await.clients.insert(conn_id, client_tx);
    info!(%conn_id, "ws: client connected");

    let grace = Duration::from_secs(env_parse("IDENTIFY_GRACE_SECS", DEFAULT_IDENTIFY_GRACE_SECS));
    let identify_deadline = tokio::time::sleep(grace);
    tokio::pin!(identify_deadline);

    let mut ctx: Option<ConnCtx> = None;

    loop {
        tokio::select! {
            () = &mut identify_deadline, if ctx.is_none() => {
                info!(%conn_id, "ws: identification grace expired; auto-identifying");
                let outs = identify_connection(&state, conn_id, &mut ctx, None, false, false, false).await;
                if deliver(&mut socket, &state, conn_id, outs).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let outs = process_inbound_text(&state, conn_id, &mut ctx, &text).await;
                        if deliver(&mut socket, &state, conn_id, outs).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(message) = client_rx.recv() => {
                if send_message(&mut socket, &message).await.is_err() {
                    break;
                }
            }
        }
    }

    state.session.write().await.clients.remove(&conn_id);
    if let Some(ctx) = &ctx {
        if let Some(token) = presence::disconnect(&state, ctx).await {
            broadcast::fanout(&state, &ServerMessage::UserDisconnected { user: token }, Some(conn_id)).await;
        }
    }
    info!(%conn_id, "ws: client disconnected");
}

// =============================================================================
// INBOUND PROCESSING
// =============================================================================

/// Parse and process one inbound text message, returning the outbound set.
///
/// Kept free of socket I/O so tests can drive the full dispatch path.
pub(crate) async fn process_inbound_text(
    state: &AppState,
    conn_id: Uuid,
    ctx: &mut Option<ConnCtx>,
    text: &str,
) -> Vec<Outbound> {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(%conn_id, error = %e, "ws: malformed inbound message");
            return vec![Outbound::sender(ServerMessage::ack_error(
                None,
                ErrorKind::InvalidInput,
                format!("malformed message: {e}"),
            ))];
        }
    };

    if !matches!(msg, ClientMessage::PositionUpdate { .. }) {
        info!(%conn_id, kind = msg.kind(), "ws: recv");
    }

    if let ClientMessage::Identify { persistent_id, is_display, suppress_presence, allow_mutations } = msg {
        if ctx.is_some() {
            warn!(%conn_id, "ws: duplicate identify ignored");
            return Vec::new();
        }
        return identify_connection(state, conn_id, ctx, persistent_id, is_display, suppress_presence, allow_mutations)
            .await;
    }

    // Anything else before identification counts as the anonymous fallback,
    // same as letting the grace timer fire.
    let mut outs = Vec::new();
    if ctx.is_none() {
        outs = identify_connection(state, conn_id, ctx, None, false, false, false).await;
    }
    let Some(ctx) = ctx.as_ref() else {
        return outs;
    };

    outs.extend(dispatch(state, ctx, msg).await);
    outs
}

/// Resolve identity, register the token, and assemble the scene snapshot
/// a newly active connection needs to render without waiting for deltas.
async fn identify_connection(
    state: &AppState,
    conn_id: Uuid,
    ctx_slot: &mut Option<ConnCtx>,
    persistent_id: Option<String>,
    is_display: bool,
    suppress_presence: bool,
    allow_mutations: bool,
) -> Vec<Outbound> {
    let ctx = ConnCtx::resolve(conn_id, persistent_id, is_display, suppress_presence, allow_mutations);
    info!(
        %conn_id,
        persistent_id = %ctx.persistent_id,
        is_display = ctx.is_display,
        can_mutate = ctx.can_mutate,
        "ws: identified"
    );

    let outcome = presence::identify(state, &ctx).await;
    let mut outs = Vec::new();
    if let Some(token) = &outcome.token {
        if outcome.reconnected {
            outs.push(Outbound::others(ServerMessage::UserReconnected { user: token.clone() }));
        } else {
            outs.push(Outbound::others(ServerMessage::UserJoined { user: token.clone() }));
        }
        outs.push(Outbound::sender(ServerMessage::UserConnected { user: token.clone() }));
    }

    {
        let session = state.session.read().await;
        let others: Vec<UserToken> = session
            .users
            .iter()
            .filter(|&(id, token)| *id != conn_id && !token.is_display)
            .map(|(_, token)| token.clone())
            .collect();
        let covers = session
            .active_battlemap
            .and_then(|id| session.battlemaps.get(&id))
            .map(crate::state::Battlemap::visible_covers)
            .unwrap_or_default();

        outs.push(Outbound::sender(ServerMessage::AllUsers { users: others }));
        outs.push(Outbound::sender(ServerMessage::AllCovers { covers }));
        outs.push(Outbound::sender(ServerMessage::DisconnectedUsers {
            users: session.ghosts.values().cloned().collect(),
        }));
        outs.push(Outbound::sender(ServerMessage::BattlemapList {
            battlemaps: broadcast::list_entries(&session),
        }));
        outs.push(Outbound::sender(ServerMessage::BattlemapActive {
            battlemap_id: session.active_battlemap,
        }));
    }

    *ctx_slot = Some(ctx);
    outs
}

// =============================================================================
// DISPATCH
// =============================================================================

fn ack_err(request_id: Option<Uuid>, e: &battlemap::GatewayError) -> Outbound {
    Outbound::sender(ServerMessage::ack_error(request_id, e.kind(), e.to_string()))
}

#[allow(clippy::too_many_lines)]
async fn dispatch(state: &AppState, ctx: &ConnCtx, msg: ClientMessage) -> Vec<Outbound> {
    let can = ctx.can_mutate;
    match msg {
        // Covered before dispatch.
        ClientMessage::Identify { .. } => Vec::new(),

        ClientMessage::BattlemapGet { request_id, battlemap_id } => {
            match battlemap::get(state, battlemap_id).await {
                Ok(snapshot) => vec![Outbound::sender(ServerMessage::ack_battlemap(request_id, snapshot))],
                Err(e) => vec![ack_err(request_id, &e)],
            }
        }
        ClientMessage::BattlemapCreate { request_id, name, map_path } => {
            match battlemap::create(state, can, &name, map_path).await {
                Ok(id) => vec![
                    Outbound::sender(ServerMessage::ack_created(request_id, id)),
                    Outbound::all(broadcast::list_message(state).await),
                ],
                Err(e) => vec![ack_err(request_id, &e)],
            }
        }
        ClientMessage::BattlemapRename { request_id, battlemap_id, name } => {
            match battlemap::rename(state, can, battlemap_id, &name).await {
                Ok(()) => vec![
                    Outbound::sender(ServerMessage::ack_ok(request_id)),
                    Outbound::all(broadcast::list_message(state).await),
                ],
                Err(e) => vec![ack_err(request_id, &e)],
            }
        }
        ClientMessage::BattlemapDelete { request_id, battlemap_id } => {
            match battlemap::delete(state, can, battlemap_id).await {
                Ok(active_changed) => {
                    let mut outs = vec![
                        Outbound::sender(ServerMessage::ack_ok(request_id)),
                        Outbound::all(broadcast::list_message(state).await),
                    ];
                    if active_changed {
                        outs.push(Outbound::all(broadcast::active_message(state).await));
                    }
                    outs
                }
                Err(e) => vec![ack_err(request_id, &e)],
            }
        }
        ClientMessage::BattlemapReorder { request_id, ordered_ids } => {
            match battlemap::reorder(state, can, &ordered_ids).await {
                Ok(()) => vec![
                    Outbound::sender(ServerMessage::ack_ok(request_id)),
                    Outbound::all(broadcast::list_message(state).await),
                ],
                Err(e) => vec![ack_err(request_id, &e)],
            }
        }
        ClientMessage::BattlemapSetActive { request_id, battlemap_id } => {
            match battlemap::set_active(state, can, battlemap_id).await {
                Ok(()) => vec![
                    Outbound::sender(ServerMessage::ack_ok(request_id)),
                    Outbound::all(broadcast::active_message(state).await),
                ],
                Err(e) => vec![ack_err(request_id, &e)],
            }
        }

        ClientMessage::FloorAdd { request_id, battlemap_id, name } => {
            match battlemap::add_floor(state, can, battlemap_id, &name).await {
                Ok((floor_id, snapshot)) => vec![
                    Outbound::sender(ServerMessage::ack_created(request_id, floor_id)),
                    Outbound::all(ServerMessage::BattlemapUpdated { battlemap: snapshot }),
                ],
                Err(e) => vec![ack_err(request_id, &e)],
            }
        }
        ClientMessage::FloorRename { request_id, battlemap_id, floor_id, name } => {
            match battlemap::rename_floor(state, can, battlemap_id, floor_id, &name).await {
                Ok(snapshot) => vec![
                    Outbound::sender(ServerMessage::ack_ok(request_id)),
                    Outbound::all(ServerMessage::BattlemapUpdated { battlemap: snapshot }),
                ],
                Err(e) => vec![ack_err(request_id, &e)],
            }
        }
        ClientMessage::FloorDelete { request_id, battlemap_id, floor_id } => {
            match battlemap::delete_floor(state, can, battlemap_id, floor_id).await {
                Ok(snapshot) => vec![
                    Outbound::sender(ServerMessage::ack_ok(request_id)),
                    Outbound::all(ServerMessage::BattlemapUpdated { battlemap: snapshot }),
                ],
                Err(e) => vec![ack_err(request_id, &e)],
            }
        }
        ClientMessage::FloorSetActive { request_id, battlemap_id, floor_id } => {
            match battlemap::set_active_floor(state, can, battlemap_id, floor_id).await {
                Ok(snapshot) => vec![
                    Outbound::sender(ServerMessage::ack_ok(request_id)),
                    Outbound::all(ServerMessage::BattlemapUpdated { battlemap: snapshot }),
                ],
                Err(e) => vec![ack_err(request_id, &e)],
            }
        }
        ClientMessage::MapPathUpdate { request_id, battlemap_id, floor_id, map_path } => {
            match battlemap::update_map_path(state, can, battlemap_id, floor_id, map_path).await {
                Ok((snapshot, affected_active)) => {
                    // Fresh image on the shown floor may need grid detection.
                    let snapshot = if affected_active {
                        grid::reconcile(state, battlemap_id).await.unwrap_or(snapshot)
                    } else {
                        snapshot
                    };
                    vec![
                        Outbound::sender(ServerMessage::ack_ok(request_id)),
                        Outbound::all(ServerMessage::BattlemapUpdated { battlemap: snapshot }),
                    ]
                }
                Err(e) => vec![ack_err(request_id, &e)],
            }
        }

        ClientMessage::SettingsUpdate { request_id, battlemap_id, grid_scale, grid_offset_x, grid_offset_y } => {
            match battlemap::update_settings(state, can, battlemap_id, grid_scale, grid_offset_x, grid_offset_y).await
            {
                Ok(snapshot) => vec![
                    Outbound::sender(ServerMessage::ack_ok(request_id)),
                    Outbound::all(ServerMessage::BattlemapUpdated { battlemap: snapshot }),
                ],
                Err(e) => vec![ack_err(request_id, &e)],
            }
        }
        ClientMessage::GridDataUpdate { request_id, battlemap_id, grid_data } => {
            match battlemap::update_grid_data(state, can, battlemap_id, grid_data).await {
                Ok(snapshot) => vec![
                    Outbound::sender(ServerMessage::ack_ok(request_id)),
                    Outbound::all(ServerMessage::BattlemapUpdated { battlemap: snapshot }),
                ],
                Err(e) => vec![ack_err(request_id, &e)],
            }
        }

        ClientMessage::CoverAdd { request_id, battlemap_id, floor_id, cover } => {
            match battlemap::add_cover(state, can, battlemap_id, floor_id, cover).await {
                Ok((cover_id, snapshot)) => vec![
                    Outbound::sender(ServerMessage::ack_created(request_id, cover_id)),
                    Outbound::all(ServerMessage::BattlemapUpdated { battlemap: snapshot }),
                ],
                Err(e) => vec![ack_err(request_id, &e)],
            }
        }
        ClientMessage::CoverUpdate { request_id, battlemap_id, cover_id, updates } => {
            match battlemap::update_cover(state, can, battlemap_id, cover_id, &updates).await {
                Ok(snapshot) => vec![
                    Outbound::sender(ServerMessage::ack_ok(request_id)),
                    Outbound::all(ServerMessage::BattlemapUpdated { battlemap: snapshot }),
                ],
                Err(e) => vec![ack_err(request_id, &e)],
            }
        }
        ClientMessage::CoverRemove { request_id, battlemap_id, cover_id } => {
            match battlemap::remove_cover(state, can, battlemap_id, cover_id).await {
                Ok(snapshot) => vec![
                    Outbound::sender(ServerMessage::ack_ok(request_id)),
                    Outbound::all(ServerMessage::BattlemapUpdated { battlemap: snapshot }),
                ],
                Err(e) => vec![ack_err(request_id, &e)],
            }
        }

        ClientMessage::PositionUpdate { token_id, position } => {
            match presence::move_token(state, ctx.conn_id, token_id.as_deref(), position).await {
                Some(persistent_id) => {
                    vec![Outbound::others(ServerMessage::UserMoved { persistent_id, position })]
                }
                // Fire-and-forget: nothing to move, nothing to say.
                None => Vec::new(),
            }
        }
        ClientMessage::TokenAdd { color, position, size, avatar } => {
            let token = presence::add_token(state, color, position, size, avatar).await;
            vec![Outbound::all(ServerMessage::TokenAdded { user: token })]
        }
        ClientMessage::TokenRemove { persistent_user_id } => {
            match presence::remove_token(state, can, &persistent_user_id).await {
                Ok(persistent_id) => vec![Outbound::all(ServerMessage::TokenRemoved { persistent_id })],
                Err(e) => vec![ack_err(None, &e)],
            }
        }
    }
}

// =============================================================================
// TRANSPORT
// =============================================================================

async fn deliver(
    socket: &mut WebSocket,
    state: &AppState,
    conn_id: Uuid,
    outbounds: Vec<Outbound>,
) -> Result<(), ()> {
    for out in outbounds {
        match out.audience {
            Audience::Sender => send_message(socket, &out.message).await?,
            Audience::Others => broadcast::fanout(state, &out.message, Some(conn_id)).await,
            Audience::All => broadcast::fanout(state, &out.message, None).await,
        }
    }
    Ok(())
}

async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), ()> {
    let json = match serde_json::to_string(message) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize message");
            return Err(());
        }
    };
    if !matches!(message, ServerMessage::UserMoved { .. }) {
        info!(kind = message.kind(), "ws: send");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
