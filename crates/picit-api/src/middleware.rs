use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use axum_extra::typed_header::TypedHeaderRejection;
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::debug;

use picit_types::api::Claims;

use crate::auth::AppState;
use crate::run_blocking;

/// Validate the bearer JWT and its session, then expose the claims to
/// handlers as `Extension<Claims>`.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let TypedHeader(Authorization(bearer)) = bearer.map_err(|_| StatusCode::UNAUTHORIZED)?;

    let token_data = decode::<Claims>(
        bearer.token(),
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let claims = token_data.claims;

    // Signed-out and refreshed-away sessions still carry valid signatures
    let db = state.db.clone();
    let sid = claims.sid.to_string();
    let uid = claims.sub.to_string();
    if !run_blocking("is_session_active", move || db.is_session_active(&sid, &uid)).await? {
        debug!("Rejected inactive session {} for {}", claims.sid, claims.sub);
        return Err(StatusCode::UNAUTHORIZED);
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
