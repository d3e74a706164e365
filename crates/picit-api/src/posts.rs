use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use picit_types::api::{AddCommentRequest, Claims, LikeResponse};
use picit_types::models::{Comment, FeedPost};

use crate::auth::AppState;
use crate::{convert, run_blocking};

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// GET /posts: every post, newest first, with its author.
pub async fn feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let limit = query.limit.clamp(1, 200);
    let rows = run_blocking("feed", move || db.feed(limit)).await?;
    Ok(Json(rows.into_iter().map(convert::feed_post).collect::<Vec<FeedPost>>()))
}

pub async fn toggle_like(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let like_id = Uuid::new_v4().to_string();
    let (liked, likes_count) = run_blocking("toggle_like", move || {
        db.toggle_like(&like_id, &post_id.to_string(), &claims.sub.to_string())
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(LikeResponse { liked, likes_count }))
}

pub async fn like_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let (liked, likes_count) = run_blocking("like_status", move || {
        db.like_status(&post_id.to_string(), &claims.sub.to_string())
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(LikeResponse { liked, likes_count }))
}

pub async fn comments(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let pid = post_id.to_string();
    let (post, rows) = run_blocking("comments", move || Ok((db.get_post(&pid)?, db.comments(&pid)?))).await?;
    if post.is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(rows.into_iter().map(convert::comment).collect::<Vec<Comment>>()))
}

pub async fn add_comment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
    Json(req): Json<AddCommentRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let text = req.text.trim().to_string();
    if text.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let comment_id = Uuid::new_v4().to_string();
    let row = run_blocking("add_comment", move || {
        db.add_comment(&comment_id, &post_id.to_string(), &claims.sub.to_string(), &text)
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok((StatusCode::CREATED, Json(convert::comment(row))))
}
