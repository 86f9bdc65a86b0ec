//! HTTP + WebSocket server
//!
//! The realtime gateway endpoint (`/ws`) and a thin control/query surface
//! for the dashboard: monitor control, association intake, auto-close logs
//! and stats, and the pull side of notification delivery.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::borrow::Cow;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::application::{AuditLog, MonitorError, NotificationManager, TradeMonitor};
use crate::domain::{Association, AssociationKind};
use crate::ports::{AssociationStore, ListOptions, StoreError};
use super::hub::{ConnectionHub, Outbound, CLOSE_INTERNAL_ERROR, CLOSE_POLICY_VIOLATION};
use super::token::{extract_token, Claims, TokenError, TokenSigner};

/// Default page size for log queries
const DEFAULT_LOG_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<ConnectionHub>,
    pub signer: Arc<TokenSigner>,
    pub monitor: Arc<TradeMonitor>,
    pub audit: Arc<AuditLog>,
    pub notifications: Arc<NotificationManager>,
    pub associations: Arc<dyn AssociationStore>,
}

/// Handler error rendered as `{"error": ...}`
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(TokenError),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(e) => (StatusCode::UNAUTHORIZED, e.to_string()),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<crate::application::NotificationError> for ApiError {
    fn from(e: crate::application::NotificationError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Invalid(m) => ApiError::BadRequest(m),
            StoreError::Persistence(m) => ApiError::Internal(m),
        }
    }
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Claims, ApiError> {
    let authorization = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let token = extract_token(None, authorization).map_err(ApiError::Unauthorized)?;
    state.signer.verify(token).map_err(ApiError::Unauthorized)
}

pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/monitoring/status", get(monitoring_status))
            .route("/api/monitoring/start", post(monitoring_start))
            .route("/api/monitoring/stop", post(monitoring_stop))
            .route("/api/associations", get(list_associations).post(create_association))
            .route("/api/associations/:id", delete(delete_association))
            .route("/api/auto-close/logs", get(auto_close_logs))
            .route("/api/auto-close/stats", get(auto_close_stats))
            .route("/api/notifications", get(list_notifications))
            .route("/api/notifications/read-all", post(mark_all_read))
            .route("/api/notifications/:id/read", post(mark_read))
            .route("/ws", get(websocket_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` fires
    pub async fn serve(self, addr: &str, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Gateway listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        Ok(())
    }
}

async fn monitoring_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    authenticate(&state, &headers)?;
    let status = state.monitor.status().await;
    Ok(Json(json!({
        "status": status,
        "connections": state.hub.stats(),
    })))
}

async fn monitoring_start(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    authenticate(&state, &headers)?;
    match state.monitor.start().await {
        Ok(()) => {
            state.hub.broadcast_status(json!({ "monitor": "started" }));
            Ok(Json(json!({ "status": "started" })))
        }
        Err(e @ MonitorError::AlreadyRunning) => Err(ApiError::Conflict(e.to_string())),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

async fn monitoring_stop(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    authenticate(&state, &headers)?;
    match state.monitor.stop().await {
        Ok(()) => {
            state.hub.broadcast_status(json!({ "monitor": "stopped" }));
            Ok(Json(json!({ "status": "stopped" })))
        }
        Err(e @ MonitorError::NotRunning) => Err(ApiError::Conflict(e.to_string())),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct NewAssociation {
    kind: AssociationKind,
    owner_position_id: Option<String>,
    shadow_position_id: Option<String>,
    slave_position_id: Option<String>,
}

/// Link positions entered together. The caller owns the association.
async fn create_association(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NewAssociation>,
) -> Result<(StatusCode, Json<Association>), ApiError> {
    let claims = authenticate(&state, &headers)?;
    let association = Association {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: claims.user_id,
        owner_position_id: body.owner_position_id,
        shadow_position_id: body.shadow_position_id,
        slave_position_id: body.slave_position_id,
        kind: body.kind,
        created_at: Utc::now(),
    };
    state.associations.insert(association.clone()).await?;
    tracing::info!(
        "Association {} ({:?}) created for {}",
        association.id,
        association.kind,
        association.user_id
    );
    Ok((StatusCode::CREATED, Json(association)))
}

#[derive(Debug, Deserialize)]
struct AssociationQuery {
    kind: Option<AssociationKind>,
}

async fn list_associations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AssociationQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let associations = state
        .associations
        .list_for_user(&claims.user_id, query.kind)
        .await?;
    Ok(Json(json!({
        "total": associations.len(),
        "associations": associations,
    })))
}

async fn delete_association(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let claims = authenticate(&state, &headers)?;
    if state.associations.remove(&claims.user_id, &id).await? {
        tracing::info!("Association {} removed by {}", id, claims.user_id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("association {} not found", id)))
    }
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    limit: Option<usize>,
    /// Restrict to the caller's decisions (default)
    mine: Option<bool>,
}

impl LogQuery {
    fn scope<'a>(&self, claims: &'a Claims) -> Option<&'a str> {
        if self.mine.unwrap_or(true) {
            Some(claims.user_id.as_str())
        } else {
            None
        }
    }
}

async fn auto_close_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LogQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let decisions = state
        .audit
        .decisions(query.scope(&claims), query.limit.unwrap_or(DEFAULT_LOG_LIMIT))
        .await;
    Ok(Json(json!({ "logs": decisions })))
}

async fn auto_close_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LogQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let scope = query.scope(&claims);
    let day_ago = Utc::now() - ChronoDuration::hours(24);
    Ok(Json(json!({
        "stats": state.audit.stats(scope).await,
        "by_account_type": state.audit.breakdown(scope).await,
        "last_24h": state.audit.stats_since(scope, day_ago).await,
    })))
}

async fn list_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(options): Query<ListOptions>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let notifications = state.notifications.list(&claims.user_id, &options).await?;
    let unread = state.notifications.unread_count(&claims.user_id).await?;
    Ok(Json(json!({
        "notifications": notifications,
        "unread_count": unread,
    })))
}

async fn mark_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let updated = state.notifications.mark_read(&id, &claims.user_id).await?;
    Ok(Json(json!({ "updated": updated })))
}

async fn mark_all_read(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let updated = state.notifications.mark_all_read(&claims.user_id).await?;
    Ok(Json(json!({ "updated": updated })))
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let authorization = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let auth = extract_token(query.token.as_deref(), authorization)
        .and_then(|token| state.signer.verify(token));
    ws.on_upgrade(move |socket| websocket_connection(socket, state, auth))
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: String) {
    let frame = CloseFrame {
        code,
        reason: Cow::Owned(reason),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

async fn websocket_connection(mut socket: WebSocket, state: AppState, auth: Result<Claims, TokenError>) {
    let claims = match auth {
        Ok(claims) => claims,
        Err(e) => {
            // Refused connections are expected traffic, not system errors
            tracing::debug!("Refusing websocket connection: {}", e);
            let reason = match e {
                TokenError::Missing => "authentication token required",
                _ => "invalid token",
            };
            close_with(&mut socket, CLOSE_POLICY_VIOLATION, reason.to_string()).await;
            return;
        }
    };

    let mut handle = state.hub.register(&claims.user_id);
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outbound = handle.recv() => {
                let message = match outbound {
                    Some(Outbound::Message(envelope)) => match serde_json::to_string(&envelope) {
                        Ok(text) => Message::Text(text),
                        Err(e) => {
                            tracing::error!("Failed to encode envelope for {}: {}", handle.id, e);
                            let _ = sink
                                .send(Message::Close(Some(CloseFrame {
                                    code: CLOSE_INTERNAL_ERROR,
                                    reason: Cow::Borrowed("internal server error"),
                                })))
                                .await;
                            break;
                        }
                    },
                    Some(Outbound::Ping) => Message::Ping(Vec::new()),
                    Some(Outbound::Close { code, reason }) => {
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code,
                                reason: Cow::Owned(reason),
                            })))
                            .await;
                        break;
                    }
                    // Hub dropped us (heartbeat timeout)
                    None => break,
                };
                if sink.send(message).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle.mark_alive();
                        state.hub.handle_client_message(&handle.id, &text);
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => handle.mark_alive(),
                }
            }
        }
    }

    state.hub.unregister(&handle.id);
}
