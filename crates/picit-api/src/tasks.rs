use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::{error, info, warn};
use uuid::Uuid;

use picit_db::models::{ObjectRow, now_timestamp};
use picit_db::{CompleteOutcome, DeleteTaskOutcome};
use picit_storage::POSTS;
use picit_types::api::{Claims, CreateTaskRequest};

use crate::auth::AppState;
use crate::users::open_tasks;
use crate::{convert, run_blocking};

const IMAGE_NAME_LEN: usize = 16;

pub async fn create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let name = req.name.trim().to_string();
    let description = req.description.trim().to_string();
    if name.is_empty() || description.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let task_id = Uuid::new_v4().to_string();
    let uid = claims.sub.to_string();
    let deadline = req.deadline.map(|d| d.format("%Y-%m-%d").to_string());
    let row = run_blocking("create_task", move || {
        db.create_task(&task_id, &uid, &name, &description, deadline.as_deref())
    })
    .await?;

    let today = chrono::Utc::now().date_naive();
    Ok((StatusCode::CREATED, Json(convert::task(row, today))))
}

/// GET /tasks: the caller's open tasks.
pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    Ok(Json(open_tasks(&state, claims.sub).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(task_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let uid = claims.sub.to_string();
    let outcome = run_blocking("delete_task", move || db.delete_task(&task_id.to_string(), &uid)).await?;

    match outcome {
        DeleteTaskOutcome::Deleted => Ok(StatusCode::NO_CONTENT),
        DeleteTaskOutcome::NotFound => Err(StatusCode::NOT_FOUND),
        DeleteTaskOutcome::Forbidden => Err(StatusCode::FORBIDDEN),
        DeleteTaskOutcome::AlreadyCompleted => Err(StatusCode::CONFLICT),
    }
}

/// POST /tasks/{id}/complete: raw image bytes as proof.
///
/// The image is uploaded first. If the upload fails the task stays open and
/// nothing else changes; the client may try again. Only after a successful
/// upload are the task flip and the post insert committed together.
pub async fn complete(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(task_id): Path<Uuid>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<impl IntoResponse, StatusCode> {
    if bytes.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let content_type = image_content_type(&headers).ok_or(StatusCode::UNSUPPORTED_MEDIA_TYPE)?;

    // Cheap checks before touching storage
    let db = state.db.clone();
    let tid = task_id.to_string();
    let uid = claims.sub.to_string();
    let (task, user) =
        run_blocking("get_task", move || Ok((db.get_task(&tid)?, db.get_user_by_id(&uid)?))).await?;
    let task = task.ok_or(StatusCode::NOT_FOUND)?;
    if task.user_id != claims.sub.to_string() {
        return Err(StatusCode::FORBIDDEN);
    }
    if task.is_completed {
        return Err(StatusCode::CONFLICT);
    }
    let folder = user
        .and_then(|u| u.username)
        .unwrap_or_else(|| claims.sub.to_string());

    let path = format!("{}/{}", folder, random_name());
    let stored = state.storage.upload(POSTS, &path, &bytes, false).await.map_err(|e| {
        error!("Proof upload for task {} failed: {}", task_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let db = state.db.clone();
    let tid = task_id.to_string();
    let uid = claims.sub.to_string();
    let post_id = Uuid::new_v4().to_string();
    let object = ObjectRow {
        bucket: stored.bucket.clone(),
        path: stored.path.clone(),
        owner_id: uid.clone(),
        content_type,
        size: stored.size as i64,
        sha256: stored.sha256.clone(),
        created_at: now_timestamp(),
    };
    let image_url = stored.public_url.clone();
    let outcome = run_blocking("complete_task", move || {
        db.complete_task(&tid, &uid, &post_id, &object, &image_url)
    })
    .await;

    let status = match outcome {
        Ok(CompleteOutcome::Completed(post)) => {
            info!("{} completed task {}", claims.sub, task_id);
            return Ok((StatusCode::CREATED, Json(convert::post(post))));
        }
        Ok(CompleteOutcome::NotFound) => StatusCode::NOT_FOUND,
        Ok(CompleteOutcome::Forbidden) => StatusCode::FORBIDDEN,
        Ok(CompleteOutcome::AlreadyCompleted) => StatusCode::CONFLICT,
        Err(status) => status,
    };

    // Nothing committed, so the proof has nothing to belong to
    if let Err(e) = state.storage.remove(POSTS, &[stored.path.as_str()]).await {
        warn!("Failed to remove orphaned proof {}: {}", stored.path, e);
    }
    Err(status)
}

/// `image/*` from the request, `image/jpeg` when absent.
fn image_content_type(headers: &HeaderMap) -> Option<String> {
    match headers.get(header::CONTENT_TYPE) {
        None => Some("image/jpeg".to_string()),
        Some(value) => {
            let value = value.to_str().ok()?.trim().to_ascii_lowercase();
            value.starts_with("image/").then_some(value)
        }
    }
}

fn random_name() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(IMAGE_NAME_LEN)
        .map(char::from)
        .collect()
}
