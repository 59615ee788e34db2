// WebSocket transport for the broadcast hub
// Bridges one socket to one hub viewer: outbox to socket, socket to on_message

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::broadcast::BroadcastHub;
use crate::context::AppContext;

/// WebSocket upgrade handler
pub async fn handler(ws: WebSocketUpgrade, State(context): State<Arc<AppContext>>) -> Response {
    let hub = context.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<BroadcastHub>) {
    let (outbox, mut inbox) = mpsc::channel::<String>(hub.queue_capacity());
    let id = hub.register(outbox);
    hub.open(id);

    let (mut sender, mut receiver) = socket.split();

    // Ends when the hub drops this viewer's outbox or the peer goes away
    let mut send_task = tokio::spawn(async move {
        while let Some(text) = inbox.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let recv_hub = hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => {
                    if let Err(err) = recv_hub.on_message(id, &text) {
                        debug!(connection = %id, error = %err, "Ignoring client message");
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    hub.unregister(id);
    debug!(connection = %id, "WebSocket closed");
}
