pub mod auth;
pub mod conversations;
pub mod convert;
pub mod follows;
pub mod middleware;
pub mod posts;
pub mod storage;
pub mod tasks;
pub mod users;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post, put},
};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::error;

use picit_gateway::connection;

pub use auth::{AppState, AppStateInner};

/// Largest accepted request body (photo uploads).
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// All HTTP routes plus the WebSocket gateway.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/storage/v1/object/public/{bucket}/{*path}", get(storage::public_object))
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/session", get(auth::session))
        .route("/auth/refresh", post(auth::refresh))
        .route("/users/me", get(users::me).put(users::update_me))
        .route("/users/me/avatar", put(users::upload_avatar))
        .route("/users/search", get(users::search))
        .route("/users/{user_id}", get(users::profile))
        .route("/users/{user_id}/posts", get(users::posts))
        .route("/users/{user_id}/tasks", get(users::tasks))
        .route("/users/{user_id}/followers", get(follows::followers))
        .route("/users/{user_id}/following", get(follows::following))
        .route(
            "/users/{user_id}/follow",
            get(follows::status).post(follows::follow).delete(follows::unfollow),
        )
        .route("/tasks", get(tasks::list).post(tasks::create))
        .route("/tasks/{task_id}", axum::routing::delete(tasks::delete))
        .route("/tasks/{task_id}/complete", post(tasks::complete))
        .route("/posts", get(posts::feed))
        .route("/posts/{post_id}/like", get(posts::like_status).post(posts::toggle_like))
        .route("/posts/{post_id}/comments", get(posts::comments).post(posts::add_comment))
        .route("/conversations", get(conversations::list).post(conversations::open))
        .route(
            "/conversations/{conversation_id}/messages",
            get(conversations::messages).post(conversations::send),
        )
        .route("/storage/{bucket}", get(storage::list))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher.clone(),
            state.db.clone(),
            state.jwt_secret.clone(),
        )
    })
}

/// Run blocking database work off the async runtime. Failures are logged
/// under `what` and become a 500.
pub(crate) async fn run_blocking<T, F>(what: &'static str, f: F) -> Result<T, StatusCode>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("DB {} error: {:#}", what, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
