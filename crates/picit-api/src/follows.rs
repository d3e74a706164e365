use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use picit_db::FollowOutcome;
use picit_types::api::{Claims, FollowResponse, FollowStatusResponse};
use picit_types::models::{FollowStats, UserSummary};

use crate::auth::AppState;
use crate::{convert, run_blocking};

pub async fn follow(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(target): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    change(&state, claims.sub, target, true).await
}

pub async fn unfollow(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(target): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    change(&state, claims.sub, target, false).await
}

/// Both directions are one transaction in the database; the response carries
/// the target's counters as committed.
async fn change(state: &AppState, actor: Uuid, target: Uuid, follow: bool) -> Result<Json<FollowResponse>, StatusCode> {
    let db = state.db.clone();
    let (actor, target) = (actor.to_string(), target.to_string());
    let (outcome, (follower_count, following_count)) = run_blocking("follow", move || {
        let outcome = if follow {
            db.follow(&actor, &target)?
        } else {
            db.unfollow(&actor, &target)?
        };
        Ok((outcome, db.follow_stats(&target)?))
    })
    .await?;

    match outcome {
        FollowOutcome::SelfFollow => Err(StatusCode::BAD_REQUEST),
        FollowOutcome::UnknownUser => Err(StatusCode::NOT_FOUND),
        _ => Ok(Json(FollowResponse {
            following: outcome.is_following(),
            target: FollowStats {
                follower_count,
                following_count,
            },
        })),
    }
}

/// GET /users/{id}/follow: whether the caller follows the user.
pub async fn status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(target): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let following = run_blocking("is_following", move || {
        db.is_following(&claims.sub.to_string(), &target.to_string())
    })
    .await?;
    Ok(Json(FollowStatusResponse { following }))
}

pub async fn followers(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let rows = run_blocking("followers", move || db.followers(&user_id.to_string())).await?;
    Ok(Json(rows.into_iter().map(convert::summary).collect::<Vec<UserSummary>>()))
}

pub async fn following(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let rows = run_blocking("following", move || db.following(&user_id.to_string())).await?;
    Ok(Json(rows.into_iter().map(convert::summary).collect::<Vec<UserSummary>>()))
}
