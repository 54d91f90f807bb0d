//! HTTP route definitions

use axum::{
    extract::{Extension, Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::room::GameMode;
use crate::game::RoomError;
use crate::http::middleware::{require_auth, AuthenticatedUser};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::RoomSummary;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.client_origin);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/rooms", get(list_rooms_handler))
        .route("/rooms/:id", get(room_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/rooms", post(create_room_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// CORS for the configured origins; `*` allows any origin (without credentials)
fn cors_layer(client_origin: &str) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if client_origin.split(',').any(|s| s.trim() == "*") {
        return base.allow_origin(Any);
    }

    // Support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();

    base.allow_origin(allowed_origins).allow_credentials(true)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_rooms: usize,
    running_matches: usize,
    connected_members: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_rooms: state.rooms.len(),
        running_matches: state.rooms.running_count(),
        connected_members: state.rooms.member_count(),
    })
}

// ============================================================================
// Room directory endpoints
// ============================================================================

#[derive(Serialize)]
struct RoomListResponse {
    rooms: Vec<RoomSummary>,
}

async fn list_rooms_handler(State(state): State<AppState>) -> Json<RoomListResponse> {
    Json(RoomListResponse {
        rooms: state.rooms.summaries(),
    })
}

async fn room_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RoomSummary>, AppError> {
    Ok(Json(state.rooms.summary(id)?))
}

#[derive(Deserialize)]
struct CreateRoomRequest {
    mode: GameMode,
    #[serde(default)]
    win_points: Option<u32>,
}

async fn create_room_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<RoomSummary>), AppError> {
    let win_points = state
        .config
        .win_points(req.win_points)
        .map_err(AppError::BadRequest)?;

    let summary = state
        .rooms
        .create(Uuid::new_v4(), req.mode, win_points, auth.user_id)?;

    Ok((StatusCode::CREATED, Json(summary)))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Room(#[from] RoomError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Room(err) => {
                let status = match err {
                    RoomError::NotFound => StatusCode::NOT_FOUND,
                    RoomError::Unauthorized(_) => StatusCode::FORBIDDEN,
                    RoomError::AlreadyExists | RoomError::Full { .. } => StatusCode::CONFLICT,
                    RoomError::InvalidState(_) => StatusCode::BAD_REQUEST,
                    RoomError::TransientFault(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string())
            }
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
