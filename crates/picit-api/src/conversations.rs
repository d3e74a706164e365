use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{debug, error};
use uuid::Uuid;

use picit_db::SendOutcome;
use picit_types::api::{Claims, OpenConversationRequest, SendMessageRequest};
use picit_types::models::{Conversation, Message};

use crate::auth::AppState;
use crate::{convert, run_blocking};

/// GET /conversations: the caller's conversations, most recent activity
/// first, each with the other participant and the decrypted last message.
pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let me = claims.sub.to_string();
    let (rows, authors) = run_blocking("conversations_for_user", move || {
        let rows = db.conversations_for_user(&me)?;
        let others: Vec<String> = rows
            .iter()
            .map(|c| c.other_participant(&me).to_string())
            .collect();
        Ok((rows, db.get_authors(&others)?))
    })
    .await?;

    let authors: HashMap<String, _> = authors.into_iter().map(|a| (a.id.clone(), a)).collect();
    let me = claims.sub.to_string();
    let conversations: Vec<Conversation> = rows
        .into_iter()
        .map(|row| {
            let other = authors.get(row.other_participant(&me)).cloned().map(convert::summary);
            convert::conversation(row, other, &state.cipher)
        })
        .collect();

    Ok(Json(conversations))
}

/// POST /conversations: the conversation with `user_id`, created on first use.
pub async fn open(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<OpenConversationRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.user_id == claims.sub {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let me = claims.sub.to_string();
    let other = req.user_id.to_string();
    let opened = run_blocking("open_conversation", move || {
        let Some(other_user) = db.get_user_by_id(&other)? else {
            return Ok(None);
        };
        let (row, created) = db.open_conversation(&me, &other)?;
        Ok(Some((row, created, other_user)))
    })
    .await?;

    let (row, created, other_user) = opened.ok_or(StatusCode::NOT_FOUND)?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((
        status,
        Json(convert::conversation(row, Some(convert::user_summary(other_user)), &state.cipher)),
    ))
}

/// GET /conversations/{id}/messages: oldest first, decrypted.
pub async fn messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let (conversation, rows) = run_blocking("get_messages", move || {
        let Some(conversation) = db.get_conversation(&cid)? else {
            return Ok((None, Vec::new()));
        };
        let rows = db.get_messages(&cid)?;
        Ok((Some(conversation), rows))
    })
    .await?;

    let conversation = conversation.ok_or(StatusCode::NOT_FOUND)?;
    if !conversation.has_participant(&claims.sub.to_string()) {
        return Err(StatusCode::FORBIDDEN);
    }

    let messages: Vec<Message> = rows
        .into_iter()
        .map(|row| convert::message(row, &state.cipher))
        .collect();
    Ok(Json(messages))
}

/// POST /conversations/{id}/messages: encrypt, store together with the
/// conversation's last-message fields, then push to subscribers.
pub async fn send(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let text = req.content.trim();
    if text.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let ciphertext = state.cipher.encrypt(text).map_err(|e| {
        error!("Message encryption failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let db = state.db.clone();
    let message_id = Uuid::new_v4().to_string();
    let cid = conversation_id.to_string();
    let sender = claims.sub.to_string();
    let outcome =
        run_blocking("insert_message", move || db.insert_message(&message_id, &cid, &sender, &ciphertext)).await?;

    let row = match outcome {
        SendOutcome::Sent(row) => row,
        SendOutcome::NotFound => return Err(StatusCode::NOT_FOUND),
        SendOutcome::NotParticipant => return Err(StatusCode::FORBIDDEN),
    };

    let message = convert::message(row, &state.cipher);
    debug!("{} sent message {} in {}", claims.sub, message.id, conversation_id);
    state.dispatcher.message_created(message.clone());

    Ok((StatusCode::CREATED, Json(message)))
}
