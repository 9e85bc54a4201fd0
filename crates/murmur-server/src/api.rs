use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use murmur_shared::constants::DEFAULT_MESSAGE_PAGE;
use murmur_shared::protocol::{
    ChatMessage, ConversationSummary, CreateGroupRequest, CreateNotificationRequest,
    MarkReadRequest, MarkReadResponse, Notification, ResolveDirectRequest, ResolveDirectResponse,
    SendMessageRequest,
};
use murmur_shared::types::{RoomId, UserId};

use crate::config::ServerConfig;
use crate::connections::ConnectionManager;
use crate::error::ServerError;
use crate::fanout::MessagePipeline;
use crate::notify::NotificationPipeline;
use crate::persistence::ChatStore;
use crate::resolver::ConversationResolver;
use crate::rooms::RoomRegistry;
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub connections: ConnectionManager,
    pub resolver: ConversationResolver,
    pub messages: MessagePipeline,
    pub notifications: NotificationPipeline,
    pub store: Arc<dyn ChatStore>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire every component around one room registry and one store.
    pub fn new(store: Arc<dyn ChatStore>, config: ServerConfig) -> Self {
        let registry = RoomRegistry::new();
        Self {
            connections: ConnectionManager::new(registry.clone(), config.outbound_queue_capacity),
            resolver: ConversationResolver::new(store.clone()),
            messages: MessagePipeline::new(store.clone(), registry.clone(), config.max_message_len),
            notifications: NotificationPipeline::new(store.clone(), registry),
            store,
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws_handler))
        .route("/conversations/direct", post(resolve_direct))
        .route("/groups", post(create_group))
        .route("/users/:user_id/conversations", get(list_conversations))
        .route("/rooms/:room_id/messages", get(list_messages).post(send_message))
        .route("/notifications", post(create_notification))
        .route("/users/:user_id/notifications", get(list_notifications))
        .route("/notifications/:id/read", post(mark_notification_read))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    connections: usize,
    rooms: usize,
}

#[derive(Debug, Deserialize)]
struct PageParams {
    limit: Option<u32>,
    offset: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct NotificationParams {
    #[serde(default)]
    unread_only: bool,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        connections: state.connections.connection_count(),
        rooms: state.connections.registry().room_count(),
    })
}

async fn resolve_direct(
    State(state): State<AppState>,
    Json(req): Json<ResolveDirectRequest>,
) -> Result<Json<ResolveDirectResponse>, ServerError> {
    let user = UserId::parse(req.user_id.as_str())?;
    let peer = UserId::parse(req.peer_id.as_str())?;
    let room_id = state.resolver.resolve_direct(&user, &peer).await?;
    Ok(Json(ResolveDirectResponse { room_id }))
}

async fn create_group(
    State(state): State<AppState>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<ConversationSummary>), ServerError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ServerError::BadRequest("group name is empty".into()));
    }

    let mut members = Vec::with_capacity(req.members.len());
    for member in &req.members {
        let member = UserId::parse(member.as_str())?;
        if !members.contains(&member) {
            members.push(member);
        }
    }
    if members.is_empty() {
        return Err(ServerError::BadRequest("group has no members".into()));
    }

    let group = state.store.create_group(name, &members).await?;
    info!(room = %group.id, members = members.len(), "Group created");
    Ok((StatusCode::CREATED, Json(group)))
}

async fn list_conversations(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ConversationSummary>>, ServerError> {
    let user = UserId::parse(&user_id)?;
    Ok(Json(state.store.list_conversations(&user).await?))
}

async fn list_messages(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(page): Query<PageParams>,
) -> Result<Json<Vec<ChatMessage>>, ServerError> {
    let room = RoomId(room_id);
    let limit = page.limit.unwrap_or(DEFAULT_MESSAGE_PAGE);
    let offset = page.offset.unwrap_or(0);
    Ok(Json(state.messages.history(&room, limit, offset).await?))
}

async fn send_message(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), ServerError> {
    let room = RoomId(room_id);
    let sender = UserId::parse(req.sender_id.as_str())?;
    let message = state.messages.submit(&room, &sender, &req.content).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn create_notification(
    State(state): State<AppState>,
    Json(mut req): Json<CreateNotificationRequest>,
) -> Result<(StatusCode, Json<Notification>), ServerError> {
    req.user_id = UserId::parse(req.user_id.as_str())?;
    let notification = state.notifications.notify(req).await?;
    Ok((StatusCode::CREATED, Json(notification)))
}

async fn list_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<NotificationParams>,
) -> Result<Json<Vec<Notification>>, ServerError> {
    let user = UserId::parse(&user_id)?;
    Ok(Json(state.notifications.list(&user, params.unread_only).await?))
}

async fn mark_notification_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<MarkReadResponse>, ServerError> {
    let user = UserId::parse(req.user_id.as_str())?;
    let updated = state.notifications.mark_read(id, &user).await?;
    Ok(Json(MarkReadResponse { updated }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
