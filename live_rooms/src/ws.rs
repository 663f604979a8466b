use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{FutureExt, SinkExt, StreamExt};
use room_api::ClientEvent;
use tracing::{debug, error, warn};

use crate::channel::ConnId;
use crate::engine::ChatEngine;

/// Drive one WebSocket connection until either side goes away.
///
/// Outbound events are written by a dedicated task so a slow socket only
/// backs up its own queue. Disconnect cleanup runs however the read loop
/// ends.
pub async fn handle_socket(stream: WebSocket, engine: Arc<ChatEngine>) {
    let (mut sender, mut receiver) = stream.split();
    let (channel, mut events) = engine.connect();
    let conn = channel.conn();
    drop(channel);

    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(event.as_ref()) {
                Ok(text) => text,
                Err(err) => {
                    warn!(%conn, "encoding {}: {err}", event.name());
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => process_frame(&engine, conn, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(%conn, "socket error: {err}");
                break;
            }
        }
    }

    engine.disconnect(conn);
    writer.abort();
}

/// Decode and handle one text frame. Panics are contained to the frame.
pub async fn process_frame(engine: &ChatEngine, conn: ConnId, text: &str) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(err) => {
            let operation = operation_name(text);
            engine.report(conn, &operation, "BAD_REQUEST", &err.to_string());
            return;
        }
    };
    let operation = event.operation();
    if AssertUnwindSafe(engine.handle(conn, event))
        .catch_unwind()
        .await
        .is_err()
    {
        error!(%conn, operation, "panic while handling event");
        engine.report(conn, operation, "INTERNAL", "internal error");
    }
}

/// Best-effort event name of a frame that failed to decode.
fn operation_name(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("event").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| "unknown".into())
}
