//! WebSocket push channel and monitoring read API.
//!
//! Subscriber protocol (JSON, `type` discriminator): the server greets with
//! `connection`; `subscribe` is acknowledged with `subscription_confirmed`
//! and followed by `stock_updates` batch pushes; `ping` answers `pong`;
//! `status` answers with the latest component health.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{Any, CorsLayer};

use lib_common::core::broadcaster::Frame;
use lib_common::models::{BackupSystem, BackupType, HealthRecord};
use lib_common::monitoring::store::StoreError;

use crate::sync_logic::state::AppState;

pub async fn run(port: u16, state: AppState, mut shutdown: broadcast::Receiver<()>) {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/monitoring/health", get(monitoring_health))
        .route("/api/monitoring/integrity", get(monitoring_integrity))
        .route("/api/monitoring/backups", get(monitoring_backups))
        .route("/api/monitoring/alerts", get(monitoring_alerts))
        .route("/api/backups/{system}", post(trigger_backup))
        .route("/api/alerts/{id}/acknowledge", post(acknowledge_alert))
        .route("/api/alerts/{id}/resolve", post(resolve_alert))
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    log::info!("downstream server listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            log::error!("failed to bind downstream server on {}: {}", addr, err);
            return;
        }
    };
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            log::info!("downstream server shutting down");
        })
        .await
    {
        log::error!("downstream server error: {}", err);
    }
}

/// Errors surfaced by the monitoring API as JSON with a proper status code.
enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownAlert(id) => ApiError::NotFound(format!("no alert with id {}", id)),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn monitoring_health(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    Json(state.store.health_records(query.limit.unwrap_or(100)).await)
}

async fn monitoring_integrity(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    Json(state.store.integrity_reports(query.limit.unwrap_or(100)).await)
}

async fn monitoring_backups(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    Json(state.store.backup_records(query.limit.unwrap_or(100)).await)
}

async fn monitoring_alerts(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.alerts().await)
}

/// Manual backup trigger. Always runs, regardless of the 24h auto window.
async fn trigger_backup(
    State(state): State<AppState>,
    Path(system): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let system = match system.as_str() {
        "timeseries" => BackupSystem::Timeseries,
        "records" => BackupSystem::Records,
        other => {
            return Err(ApiError::BadRequest(format!(
                "unknown backup system '{}' (expected 'timeseries' or 'records')",
                other
            )))
        }
    };
    let record = state.backups.backup(system, BackupType::Full).await;
    Ok(Json(record))
}

async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.dispatcher.acknowledge(&id).await?))
}

async fn resolve_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.dispatcher.resolve(&id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Subscribe,
    Ping,
    Status,
}

#[derive(Debug, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Connection { message: String },
    SubscriptionConfirmed { message: String },
    Pong,
    Status { data: HashMap<String, HealthRecord>, connections: serde_json::Value },
    Error { error: String },
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(err) => {
            log::error!("failed to serialize server message: {}", err);
            true
        }
    }
}

/// Pending frames for a subscribed client; parks forever until subscribed.
async fn next_frame(subscription: &mut Option<(usize, mpsc::Receiver<Frame>)>) -> Option<Frame> {
    match subscription {
        Some((_, rx)) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut subscription: Option<(usize, mpsc::Receiver<Frame>)> = None;

    if !send_message(
        &mut socket,
        &ServerMessage::Connection { message: "connected to tick stream".into() },
    )
    .await
    {
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.next() => {
                let Some(Ok(message)) = incoming else { break };
                match message {
                    Message::Text(text) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Subscribe) => {
                                if subscription.is_none() {
                                    subscription = Some(state.broadcaster.subscribe());
                                }
                                if !send_message(
                                    &mut socket,
                                    &ServerMessage::SubscriptionConfirmed {
                                        message: "subscribed to stock updates".into(),
                                    },
                                )
                                .await
                                {
                                    break;
                                }
                            }
                            Ok(ClientMessage::Ping) => {
                                if !send_message(&mut socket, &ServerMessage::Pong).await {
                                    break;
                                }
                            }
                            Ok(ClientMessage::Status) => {
                                let data = state.store.latest_health().await;
                                let connections = serde_json::json!({
                                    (state.source_supervisor.endpoint()):
                                        state.source_supervisor.current_state(),
                                    (state.sink_supervisor.endpoint()):
                                        state.sink_supervisor.current_state(),
                                });
                                if !send_message(
                                    &mut socket,
                                    &ServerMessage::Status { data, connections },
                                )
                                .await
                                {
                                    break;
                                }
                            }
                            Err(err) => {
                                let reply = ServerMessage::Error {
                                    error: format!("unrecognized message: {}", err),
                                };
                                if !send_message(&mut socket, &reply).await {
                                    break;
                                }
                            }
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
                    // The broadcaster dropped us as unresponsive.
                    None => break,
                }
            }
        }
    }

    if let Some((id, _)) = subscription {
        state.broadcaster.unsubscribe(id);
    }
}
