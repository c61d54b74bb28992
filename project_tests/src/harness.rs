//! WebSocket test harness: a minimal push server speaking the subscriber
//! protocol over a real socket, plus client helpers built on
//! `tokio-tungstenite`.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{tungstenite::protocol::Message as WsMessage, MaybeTlsStream, WebSocketStream};

use lib_common::core::broadcaster::{Frame, StreamBroadcaster};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Binds an ephemeral port, serves the subscriber protocol, and returns the
/// address. The server task lives until the test's runtime shuts down.
pub async fn spawn_push_server(broadcaster: Arc<StreamBroadcaster>) -> SocketAddr {
    let app = Router::new().route("/ws", get(ws_handler)).with_state(broadcaster);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(broadcaster): State<Arc<StreamBroadcaster>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, broadcaster))
}

async fn next_frame(subscription: &mut Option<(usize, mpsc::Receiver<Frame>)>) -> Option<Frame> {
    match subscription {
        Some((_, rx)) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn handle_socket(mut socket: WebSocket, broadcaster: Arc<StreamBroadcaster>) {
    let mut subscription: Option<(usize, mpsc::Receiver<Frame>)> = None;
    let greeting = serde_json::json!({ "type": "connection", "message": "connected" });
    if socket.send(Message::Text(greeting.to_string().into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.next() => {
                let Some(Ok(message)) = incoming else { break };
                match message {
                    Message::Text(text) => {
                        let parsed: serde_json::Value =
                            serde_json::from_str(&text).unwrap_or_default();
                        match parsed["type"].as_str() {
                            Some("subscribe") => {
                                if subscription.is_none() {
                                    subscription = Some(broadcaster.subscribe());
                                }
                                let ack = serde_json::json!({ "type": "subscription_confirmed" });
                                if socket.send(Message::Text(ack.to_string().into())).await.is_err() {
                                    break;
                                }
                            }
                            Some("ping") => {
                                let pong = serde_json::json!({ "type": "pong" });
                                if socket.send(Message::Text(pong.to_string().into())).await.is_err() {
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            frame = next_frame(&mut subscription) => {
                match frame {
                    Some(frame) => {
                        if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    if let Some((id, _)) = subscription {
        broadcaster.unsubscribe(id);
    }
}

pub async fn ws_connect(addr: SocketAddr) -> WsClient {
    let (stream, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("websocket connect");
    stream
}

pub async fn send_json(client: &mut WsClient, value: serde_json::Value) {
    client
        .send(WsMessage::Text(value.to_string().into()))
        .await
        .expect("websocket send");
}

/// Receives the next text frame as JSON, failing the test after two seconds.
pub async fn recv_json(client: &mut WsClient) -> serde_json::Value {
    let deadline = Duration::from_secs(2);
    loop {
        let message = tokio::time::timeout(deadline, client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let WsMessage::Text(text) = message {
            return serde_json::from_str(&text).expect("frame is JSON");
        }
    }
}
