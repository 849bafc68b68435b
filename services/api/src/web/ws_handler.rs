//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a signaling WebSocket
//! connection. It registers the user in the presence registry, pumps
//! outbound messages from the registry channel into the socket, and feeds
//! inbound frames to the signaling router.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{SinkExt, StreamExt};
use tracing::{info, warn};

use hostline_core::domain::AuthContext;

use crate::web::{
    protocol::{ClientMessage, ServerMessage},
    state::AppState,
};

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, ctx))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, ctx: AuthContext) {
    let user_id = ctx.user_id;
    info!(%user_id, "signaling connection established");

    let (mut sink, mut stream) = socket.split();

    // --- 1. Registration Phase ---
    // Registering hands us the outbound channel; a reconnect from the same
    // user replaces the old entry, whose writer task then winds down on its
    // own when the channel closes.
    let (conn_id, mut outbound) = app_state.presence.register(user_id).await;
    app_state
        .presence
        .broadcast_except(user_id, ServerMessage::UserOnline { user_id })
        .await;

    // --- 2. Writer Task ---
    // Drains the presence channel into the socket so any task in the process
    // can push to this client without touching the socket directly.
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    warn!("failed to serialize server message: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // --- 3. Main Message Loop ---
    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => app_state.signaling.route(user_id, client_msg).await,
                Err(e) => {
                    app_state
                        .signaling
                        .report_parse_failure(user_id, &e.to_string())
                        .await;
                }
            },
            Message::Close(_) => {
                info!(%user_id, "client sent close message");
                break;
            }
            _ => {}
        }
    }

    // --- 4. Cleanup ---
    // Only announce offline if this connection was still the registered one;
    // a superseded socket must not mark the reconnected user offline.
    let went_offline = app_state.presence.unregister(user_id, conn_id).await;
    if went_offline {
        app_state
            .presence
            .broadcast_except(user_id, ServerMessage::UserOffline { user_id })
            .await;
    }
    writer.abort();
    info!(%user_id, went_offline, "signaling connection closed");
}
