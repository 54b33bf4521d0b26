//! WebSocket push of live location updates to dashboard observers.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};
use tracking::Subscription;

use crate::state::AppState;

/// Upgrade to a WebSocket and stream every published update as JSON text.
pub async fn live_updates(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let subscription = state.broadcaster.subscribe();
    ws.on_upgrade(move |socket| forward(socket, subscription))
}

async fn forward(socket: WebSocket, mut subscription: Subscription) {
    let observer = subscription.id();
    let (mut sender, mut receiver) = socket.split();
    debug!("Dashboard observer {} connected", observer);

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Failed to encode live update: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    if subscription.missed() > 0 {
        debug!(
            "Dashboard observer {} missed {} updates while connected",
            observer,
            subscription.missed()
        );
    }
    debug!("Dashboard observer {} disconnected", observer);
}
