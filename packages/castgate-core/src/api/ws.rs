//! WebSocket handler for real-time client communication.
//!
//! On connect the client receives the current session snapshot, then every
//! [`BroadcastEvent`](crate::events::BroadcastEvent) as JSON text. Clients
//! (an out-of-process discovery controller, a player, a UI) may send
//! collaborator callbacks back on the same socket.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use crate::api::AppState;
use crate::session::{SessionEvent, SessionSnapshot};

/// Incoming WebSocket message envelope.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum WsIncoming {
    Event { payload: SessionEvent },
    Heartbeat,
}

/// Messages the server sends that are not broadcast events.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum WsOutgoing {
    InitialState { payload: SessionSnapshot },
    HeartbeatAck,
    Error { message: String },
}

impl WsOutgoing {
    fn to_message(&self) -> Option<Message> {
        serde_json::to_string(self)
            .ok()
            .map(|s| Message::Text(s.into()))
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut broadcast_rx = state.hub.subscribe();

    let conn_guard = state.ws_manager.register();
    let cancel_token = conn_guard.cancel_token().clone();

    log::info!("[WS] New connection established: {}", conn_guard.id());

    let initial = WsOutgoing::InitialState {
        payload: state.machine.snapshot(),
    };
    if let Some(msg) = initial.to_message() {
        if sender.send(msg).await.is_err() {
            log::warn!("[WS] Failed to send initial state, client disconnected");
            return;
        }
    }

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log::info!("[WS] Connection force-closed: {}", conn_guard.id());
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<WsIncoming>(&text) {
                            Ok(WsIncoming::Event { payload }) => {
                                log::debug!("[WS] {} -> {:?}", conn_guard.id(), payload);
                                conn_guard.record_event();
                                state.machine.dispatch(payload);
                                None
                            }
                            Ok(WsIncoming::Heartbeat) => Some(WsOutgoing::HeartbeatAck),
                            Err(e) => Some(WsOutgoing::Error {
                                message: format!("Invalid message: {}", e),
                            }),
                        };
                        if let Some(msg) = reply.and_then(|r| r.to_message()) {
                            let _ = sender.send(msg).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            event = broadcast_rx.recv() => {
                match event {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("[WS] {} lagged, skipped {} event(s)", conn_guard.id(), skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incoming_event_envelope_parses() {
        let msg: WsIncoming = serde_json::from_str(
            r#"{"type":"EVENT","payload":{"type":"connectionRequest","mac":"aa:bb","name":"Phone"}}"#,
        )
        .unwrap();

        match msg {
            WsIncoming::Event {
                payload: SessionEvent::ConnectionRequest { mac, name },
            } => {
                assert_eq!(mac, "aa:bb");
                assert_eq!(name, "Phone");
            }
            other => panic!("unexpected message: {other:?}"),
        }

        assert!(matches!(
            serde_json::from_str::<WsIncoming>(r#"{"type":"HEARTBEAT"}"#).unwrap(),
            WsIncoming::Heartbeat
        ));
    }
}
