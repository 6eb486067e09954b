//! WebSocket endpoint: upgrades, per-connection writer task, reader loop.
//!
//! The writer task owns the socket sink and drains the client's outbound
//! queue with a 5 s write deadline; a missed deadline closes the connection.

use crate::api::AppState;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

const WRITE_DEADLINE: Duration = Duration::from_secs(5);
pub const DASHBOARD_ROOM: &str = "dashboard";

pub async fn dashboard_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let client = state.bus.subscribe(DASHBOARD_ROOM, tx);

    // Writer: drains the outbound queue; a slow or dead peer is dropped.
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let send = tokio::time::timeout(WRITE_DEADLINE, sink.send(Message::Text(message)));
            match send.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(error = %e, "ws send failed");
                    break;
                }
                Err(_) => {
                    debug!("ws write deadline exceeded, closing");
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    // Reader: pings + activity tracking.
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if let Some(reply) = state.bus.handle_message(DASHBOARD_ROOM, client, &text) {
                    // Reply goes through the same queue as broadcasts so the
                    // per-connection ordering guarantee holds.
                    state.bus.send_direct(DASHBOARD_ROOM, client, reply);
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                state.bus.record_activity(DASHBOARD_ROOM, client);
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    state.bus.disconnect(DASHBOARD_ROOM, client);
    writer.abort();
}
