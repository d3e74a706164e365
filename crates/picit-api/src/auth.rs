use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};
use uuid::Uuid;

use picit_crypto::MessageCipher;
use picit_db::Database;
use picit_gateway::dispatcher::Dispatcher;
use picit_storage::Storage;
use picit_types::api::{AuthResponse, Claims, LoginRequest, SessionResponse, SignUpRequest};
use picit_types::events::{GatewayEvent, SessionEvent};

use crate::convert::parse_time;
use crate::run_blocking;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub storage: Storage,
    pub cipher: MessageCipher,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    pub session_days: i64,
}

const MIN_PASSWORD_LEN: usize = 8;

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignUpRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let email = normalize_email(&req.email).ok_or(StatusCode::BAD_REQUEST)?;
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let lookup = email.clone();
    if run_blocking("get_user_by_email", move || db.get_user_by_email(&lookup))
        .await?
        .is_some()
    {
        return Err(StatusCode::CONFLICT);
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| {
            error!("Password hashing failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .to_string();

    let user_id = Uuid::new_v4();
    let db = state.db.clone();
    let uid = user_id.to_string();
    let created = email.clone();
    // A concurrent signup may have taken the email since the lookup
    if !run_blocking("create_user", move || db.create_user(&uid, &created, &password_hash)).await? {
        return Err(StatusCode::CONFLICT);
    }

    info!("New account {} ({})", user_id, email);
    let response = issue_session(&state, user_id).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let email = normalize_email(&req.email).ok_or(StatusCode::UNAUTHORIZED)?;

    let db = state.db.clone();
    let user = run_blocking("get_user_by_email", move || db.get_user_by_email(&email))
        .await?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password).map_err(|e| {
        error!("Stored password hash for {} is invalid: {}", user.id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let user_id: Uuid = user.id.parse().map_err(|e| {
        error!("Corrupt user id '{}': {}", user.id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let response = issue_session(&state, user_id).await?;
    Ok(Json(response))
}

/// POST /auth/logout: revoke the current session, tell the user's live
/// connections about it and close the ones opened with this session.
pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let sid = claims.sid.to_string();
    run_blocking("revoke_session", move || db.revoke_session(&sid)).await?;

    state
        .dispatcher
        .end_session(claims.sub, claims.sid, GatewayEvent::SessionChanged { event: SessionEvent::SignedOut })
        .await;

    info!("{} signed out of session {}", claims.sub, claims.sid);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let sid = claims.sid.to_string();
    let uid = claims.sub.to_string();
    let (session, user) = run_blocking("get_session", move || {
        Ok((db.get_session(&sid)?, db.get_user_by_id(&uid)?))
    })
    .await?;

    let session = session.ok_or(StatusCode::UNAUTHORIZED)?;
    let user = user.ok_or(StatusCode::UNAUTHORIZED)?;

    Ok(Json(SessionResponse {
        user_id: claims.sub,
        session_id: claims.sid,
        email: user.email,
        reg_complete: user.reg_complete,
        expires_at: parse_time("expires_at", &session.id, &session.expires_at),
    }))
}

/// POST /auth/refresh: swap the current session for a fresh one. Gateway
/// connections identified with the old session are closed.
pub async fn refresh(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let response = issue_session(&state, claims.sub).await?;

    let db = state.db.clone();
    let sid = claims.sid.to_string();
    run_blocking("revoke_session", move || db.revoke_session(&sid)).await?;

    state
        .dispatcher
        .end_session(claims.sub, claims.sid, GatewayEvent::SessionChanged { event: SessionEvent::TokenRefreshed })
        .await;

    Ok(Json(response))
}

/// Store a new session for `user_id` and sign a token for it.
async fn issue_session(state: &AppState, user_id: Uuid) -> Result<AuthResponse, StatusCode> {
    let session_id = Uuid::new_v4();
    let expires_at = Utc::now() + chrono::Duration::days(state.session_days);

    let db = state.db.clone();
    let sid = session_id.to_string();
    let uid = user_id.to_string();
    let stored_expiry = expires_at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
    run_blocking("create_session", move || db.create_session(&sid, &uid, &stored_expiry)).await?;

    let token = create_token(&state.jwt_secret, user_id, session_id, expires_at).map_err(|e| {
        error!("Token signing failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(AuthResponse {
        user_id,
        token,
        expires_at,
    })
}

pub fn create_token(
    secret: &str,
    user_id: Uuid,
    session_id: Uuid,
    expires_at: DateTime<Utc>,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        sid: session_id,
        exp: expires_at.timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Trimmed, lowercased email, or `None` if it cannot be an address.
fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || email.chars().any(char::is_whitespace) {
        return None;
    }
    Some(email)
}
