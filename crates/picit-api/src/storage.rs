use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use tracing::error;

use picit_storage::BUCKETS;
use picit_types::api::{Claims, ListObjectsQuery};
use picit_types::models::StorageObject;

use crate::auth::AppState;
use crate::{convert, run_blocking};

/// GET /storage/v1/object/public/{bucket}/{*path}: unauthenticated download.
pub async fn public_object(
    State(state): State<AppState>,
    Path((bucket, path)): Path<(String, String)>,
) -> Result<impl IntoResponse, StatusCode> {
    if !BUCKETS.contains(&bucket.as_str()) || picit_storage::validate_path(&path).is_err() {
        return Err(StatusCode::NOT_FOUND);
    }

    let bytes = state
        .storage
        .read(&bucket, &path)
        .await
        .map_err(|e| {
            error!("Failed to read {}/{}: {}", bucket, path, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let db = state.db.clone();
    let content_type = run_blocking("get_object", move || db.get_object(&bucket, &path))
        .await?
        .map(|object| object.content_type)
        .unwrap_or_else(|| "application/octet-stream".to_string());

    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

/// GET /storage/{bucket}?prefix=: the caller's objects in a bucket.
pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(bucket): Path<String>,
    Query(query): Query<ListObjectsQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    if !BUCKETS.contains(&bucket.as_str()) {
        return Err(StatusCode::NOT_FOUND);
    }

    let db = state.db.clone();
    let lookup = bucket.clone();
    let rows = run_blocking("list_objects", move || db.list_objects(&lookup, &query.prefix)).await?;

    let owner = claims.sub.to_string();
    let objects: Vec<StorageObject> = rows
        .into_iter()
        .filter(|row| row.owner_id == owner)
        .map(|row| {
            let url = state.storage.public_url(&bucket, &row.path);
            convert::object(row, url)
        })
        .collect();
    Ok(Json(objects))
}
