use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::ws::WebSocketUpgrade;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Config;
use crate::db::SqliteStore;
use crate::engine::{ChatEngine, Limits};
use crate::error::{ErrorKind, RoomError};
use crate::gateway::{PersistenceGateway, RoomFilter, RoomPage};
use crate::housekeeping;
use crate::model::{Message, RoomStatus, RoomView};
use crate::ws::handle_socket;

/// Hard cap on any single page of messages.
const MAX_PAGE: usize = 200;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ChatEngine>,
    pub config: Config,
}

impl AppState {
    /// Open the database under the configured data dir and restore live rooms.
    pub async fn new(config: Config) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .with_context(|| format!("creating {}", config.data_dir.display()))?;
        let store = SqliteStore::open(config.db_path())?;
        Self::with_store(config, Arc::new(store)).await
    }

    pub async fn with_store(config: Config, store: Arc<dyn PersistenceGateway>) -> Result<Self> {
        let engine = Arc::new(ChatEngine::new(store, Limits::from(&config.rooms)));
        engine.hydrate().await.context("restoring live rooms")?;
        Ok(Self { engine, config })
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/rooms", get(list_rooms))
        .route("/api/rooms/:id", get(get_room))
        .route("/api/rooms/:id/messages", get(list_messages))
        .route("/api/rooms/:id/messages/search", get(search_messages))
        .route("/api/rooms/:id/stats", get(room_stats))
        .route("/api/categories", get(categories))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorResp {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResp>);

fn err(status: StatusCode, msg: &str) -> ApiError {
    (status, Json(ErrorResp { error: msg.into() }))
}

fn room_err(e: RoomError) -> ApiError {
    let status = match e.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict | ErrorKind::InvalidState => StatusCode::CONFLICT,
        ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::PersistenceFailure => StatusCode::INTERNAL_SERVER_ERROR,
    };
    err(status, e.code())
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Deserialize, Default)]
struct RoomsQuery {
    page: Option<usize>,
    limit: Option<usize>,
    category: Option<String>,
    search: Option<String>,
    status: Option<String>,
}

async fn list_rooms(
    State(state): State<AppState>,
    Query(q): Query<RoomsQuery>,
) -> Result<Json<RoomPage>, ApiError> {
    let status = match q.status.as_deref().filter(|s| !s.is_empty()) {
        Some(s) => Some(
            s.parse::<RoomStatus>()
                .map_err(|_| err(StatusCode::BAD_REQUEST, "BAD_REQUEST"))?,
        ),
        None => None,
    };
    let max = state.engine.limits().rooms_list_limit.max(1);
    let filter = RoomFilter {
        status,
        category: q.category,
        search: q.search,
        page: q.page.unwrap_or(1).max(1),
        limit: q.limit.unwrap_or(max).clamp(1, max),
    };
    state.engine.outbox().flush().await;
    let page = state
        .engine
        .query(move |s| s.list_rooms(&filter))
        .await
        .map_err(room_err)?;
    Ok(Json(page))
}

/// Live view when the room is registered, stored record otherwise.
async fn find_room(state: &AppState, id: &str) -> Result<RoomView, ApiError> {
    if let Ok(room) = state.engine.registry().lookup(id) {
        return Ok(room.view());
    }
    let lookup = id.to_string();
    state
        .engine
        .query(move |s| s.find_room_by_id(&lookup))
        .await
        .map_err(room_err)?
        .ok_or_else(|| room_err(RoomError::RoomNotFound(id.to_string())))
}

async fn get_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RoomView>, ApiError> {
    Ok(Json(find_room(&state, &id).await?))
}

#[derive(Deserialize)]
struct HistoryQuery {
    before: Option<i64>,
    limit: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessagesPage {
    messages: Vec<Message>,
    has_more: bool,
}

async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<MessagesPage>, ApiError> {
    find_room(&state, &id).await?;
    let limit = q
        .limit
        .unwrap_or(state.engine.limits().history_limit)
        .clamp(1, MAX_PAGE);
    state.engine.outbox().flush().await;
    let before = q.before;
    let mut messages = state
        .engine
        .query(move |s| s.list_messages_before(&id, before, limit + 1))
        .await
        .map_err(room_err)?;
    let has_more = messages.len() > limit;
    messages.truncate(limit);
    Ok(Json(MessagesPage { messages, has_more }))
}

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct SearchResults {
    query: String,
    messages: Vec<Message>,
}

async fn search_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<SearchResults>, ApiError> {
    let query = q.q.unwrap_or_default().trim().to_string();
    if query.is_empty() {
        return Err(err(StatusCode::BAD_REQUEST, "BAD_REQUEST"));
    }
    find_room(&state, &id).await?;
    let limit = q.limit.unwrap_or(50).clamp(1, MAX_PAGE);
    state.engine.outbox().flush().await;
    let needle = query.clone();
    let messages = state
        .engine
        .query(move |s| s.search_messages(&id, &needle, limit))
        .await
        .map_err(room_err)?;
    Ok(Json(SearchResults { query, messages }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomStats {
    room_id: String,
    status: RoomStatus,
    current_participants: usize,
    max_participants: usize,
    total_messages: u64,
    visible_messages: u64,
    created_at: i64,
    last_activity: i64,
    ended_at: Option<i64>,
}

async fn room_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RoomStats>, ApiError> {
    let room = find_room(&state, &id).await?;
    state.engine.outbox().flush().await;
    let (total, visible) = state
        .engine
        .query(move |s| Ok((s.count_messages(&id, false)?, s.count_messages(&id, true)?)))
        .await
        .map_err(room_err)?;
    Ok(Json(RoomStats {
        room_id: room.id,
        status: room.status,
        current_participants: room.current_participants,
        max_participants: room.max_participants,
        total_messages: total,
        visible_messages: visible,
        created_at: room.created_at,
        last_activity: room.last_activity,
        ended_at: room.ended_at,
    }))
}

async fn categories(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    state.engine.outbox().flush().await;
    let cats = state
        .engine
        .query(|s| s.list_categories())
        .await
        .map_err(room_err)?;
    Ok(Json(cats))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.engine))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Run the HTTP server until interrupted.
pub async fn run_http_server(config: Config) -> Result<()> {
    let addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind))?;
    let retention = Duration::from_secs(config.rooms.ended_retention_secs);
    let state = AppState::new(config).await?;
    let engine = state.engine.clone();
    let sweeper = housekeeping::run_housekeeping(
        engine.clone(),
        retention,
        housekeeping::SWEEP_INTERVAL,
    );

    info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    engine.outbox().flush().await;
    info!("shut down");
    Ok(())
}
