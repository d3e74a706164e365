use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use picit_db::models::ObjectRow;
use picit_db::models::now_timestamp;
use picit_db::queries::users::ProfileUpdate;
use picit_storage::AVATARS;
use picit_types::api::{Claims, SearchQuery, UpdateProfileRequest};
use picit_types::models::{Profile, Task, UserSummary};

use crate::auth::AppState;
use crate::{convert, run_blocking};

/// At most this many users per search.
pub const SEARCH_LIMIT: u32 = 10;

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    Ok(Json(load_profile(&state, claims.sub).await?))
}

/// PUT /users/me: profile upsert. Sets username, name and website and marks
/// registration complete.
pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let username = normalize_username(&req.username).ok_or(StatusCode::BAD_REQUEST)?;

    let db = state.db.clone();
    let uid = claims.sub.to_string();
    let name = req.name.trim().to_string();
    let website = req.website.trim().to_string();
    let outcome =
        run_blocking("update_profile", move || db.update_profile(&uid, &username, &name, &website)).await?;

    match outcome {
        ProfileUpdate::Updated(row) => Ok(Json(convert::user(row))),
        ProfileUpdate::UsernameTaken => Err(StatusCode::CONFLICT),
        ProfileUpdate::NotFound => Err(StatusCode::NOT_FOUND),
    }
}

/// PUT /users/me/avatar: raw JPEG bytes. Replaces the previous avatar object
/// and stores the new public URL on the user.
pub async fn upload_avatar(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    bytes: Bytes,
) -> Result<impl IntoResponse, StatusCode> {
    if bytes.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let uid = claims.sub.to_string();
    let user = run_blocking("get_user_by_id", move || db.get_user_by_id(&uid))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    // The object is named after the username, so the profile must exist first
    let username = user.username.clone().ok_or(StatusCode::CONFLICT)?;
    let path = format!("{username}.jpg");

    if let Some(previous) = user
        .avatar_url
        .as_deref()
        .and_then(|url| state.storage.path_from_public_url(AVATARS, url))
        .filter(|previous| *previous != path)
    {
        match state.storage.remove(AVATARS, &[previous.as_str()]).await {
            Ok(_) => {
                let db = state.db.clone();
                run_blocking("delete_object", move || db.delete_object(AVATARS, &previous)).await?;
            }
            Err(e) => warn!("Failed to remove previous avatar {}: {}", previous, e),
        }
    }

    let stored = state.storage.upload(AVATARS, &path, &bytes, true).await.map_err(|e| {
        error!("Avatar upload for {} failed: {}", claims.sub, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let db = state.db.clone();
    let uid = claims.sub.to_string();
    let public_url = stored.public_url.clone();
    let updated = run_blocking("set_avatar_url", move || {
        db.upsert_object(&ObjectRow {
            bucket: stored.bucket,
            path: stored.path,
            owner_id: uid.clone(),
            content_type: "image/jpeg".into(),
            size: stored.size as i64,
            sha256: stored.sha256,
            created_at: now_timestamp(),
        })?;
        db.set_avatar_url(&uid, &public_url)?;
        db.get_user_by_id(&uid)
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    info!("{} updated their avatar", claims.sub);
    Ok(Json(convert::user(updated)))
}

pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let rows = run_blocking("search_users", move || db.search_users(&query.q, SEARCH_LIMIT)).await?;
    let users: Vec<UserSummary> = rows.into_iter().map(convert::user_summary).collect();
    Ok(Json(users))
}

pub async fn profile(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    Ok(Json(load_profile(&state, user_id).await?))
}

/// GET /users/{id}/posts: finished posts, newest first.
pub async fn posts(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let rows = run_blocking("posts_by_user", move || db.posts_by_user(&user_id.to_string())).await?;
    Ok(Json(rows.into_iter().map(convert::post).collect::<Vec<_>>()))
}

/// GET /users/{id}/tasks: the user's open tasks.
pub async fn tasks(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    Ok(Json(open_tasks(&state, user_id).await?))
}

pub(crate) async fn open_tasks(state: &AppState, user_id: Uuid) -> Result<Vec<Task>, StatusCode> {
    let db = state.db.clone();
    let rows = run_blocking("open_tasks", move || db.open_tasks(&user_id.to_string())).await?;
    let today = chrono::Utc::now().date_naive();
    Ok(rows.into_iter().map(|row| convert::task(row, today)).collect())
}

async fn load_profile(state: &AppState, user_id: Uuid) -> Result<Profile, StatusCode> {
    let db = state.db.clone();
    let uid = user_id.to_string();
    let (user, (follower_count, following_count), completed_task_count) =
        run_blocking("get_user_by_id", move || {
            Ok((
                db.get_user_by_id(&uid)?,
                db.follow_stats(&uid)?,
                db.completed_task_count(&uid)?,
            ))
        })
        .await?;

    let user = user.ok_or(StatusCode::NOT_FOUND)?;
    Ok(Profile {
        user: convert::user(user),
        follower_count,
        following_count,
        completed_task_count,
    })
}

/// Trimmed, lowercased username of 3 to 32 characters from `[a-z0-9_.]`.
pub fn normalize_username(raw: &str) -> Option<String> {
    let username = raw.trim().to_lowercase();
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.');
    if (3..=32).contains(&username.len()) && valid_chars {
        Some(username)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames_are_normalized() {
        assert_eq!(normalize_username("  Alice_01 ").as_deref(), Some("alice_01"));
        assert_eq!(normalize_username("a.b").as_deref(), Some("a.b"));
        assert_eq!(normalize_username("ab"), None);
        assert_eq!(normalize_username(&"a".repeat(33)), None);
        assert_eq!(normalize_username("al ice"), None);
        assert_eq!(normalize_username("alice!"), None);
        assert_eq!(normalize_username("ålice"), None);
    }
}
