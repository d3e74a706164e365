mod common;

use axum::http::{Method, StatusCode};
use serde_json::{Value, json};
use uuid::Uuid;

use picit_crypto::UNREADABLE_PLACEHOLDER;
use picit_types::events::GatewayEvent;

use common::TestApp;

async fn open(app: &TestApp, token: &str, other: &str) -> (StatusCode, Value) {
    app.post("/conversations", token, json!({ "user_id": other })).await
}

#[tokio::test]
async fn one_conversation_per_pair() {
    let app = TestApp::new().await;
    let (alice, alice_id) = app.register("alice").await;
    let (bob, bob_id) = app.register("bob").await;

    let (status, first) = open(&app, &alice, &bob_id).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["other_user"]["username"], "bob");

    let (status, second) = open(&app, &bob, &alice_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["id"], first["id"]);
    assert_eq!(second["other_user"]["username"], "alice");

    assert_eq!(open(&app, &alice, &alice_id).await.0, StatusCode::BAD_REQUEST);
    assert_eq!(open(&app, &alice, &Uuid::new_v4().to_string()).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn messages_are_stored_encrypted_and_listed_in_plaintext() {
    let app = TestApp::new().await;
    let (alice, alice_id) = app.register("alice").await;
    let (bob, bob_id) = app.register("bob").await;
    let (_, conversation) = open(&app, &alice, &bob_id).await;
    let conversation_id = conversation["id"].as_str().unwrap().to_string();
    let uri = format!("/conversations/{conversation_id}/messages");

    let mut live = app.state.dispatcher.subscribe();

    let (status, sent) = app.post(&uri, &alice, json!({ "content": "  see you at 6 ü " })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sent["content"], "see you at 6 ü");
    assert_eq!(sent["recipient_id"], bob_id.as_str());
    app.post(&uri, &bob, json!({ "content": "deal" })).await;

    let GatewayEvent::MessageCreate { message } = live.recv().await.unwrap() else {
        panic!("expected a message event");
    };
    assert_eq!(message.conversation_id.to_string(), conversation_id);
    assert_eq!(message.content, "see you at 6 ü");

    let stored = app.state.db.get_messages(&conversation_id).unwrap();
    assert_eq!(stored.len(), 2);
    for row in &stored {
        assert!(row.content.starts_with("pc1:"));
        assert!(!row.content.contains("see you"));
    }

    let (_, listed) = app.get(&uri, &bob).await;
    let contents: Vec<&str> = listed.as_array().unwrap().iter().map(|m| m["content"].as_str().unwrap()).collect();
    assert_eq!(contents, vec!["see you at 6 ü", "deal"]);

    let (_, conversations) = app.get("/conversations", &alice).await;
    assert_eq!(conversations[0]["last_message_content"], "deal");
    assert_eq!(conversations[0]["other_user"]["id"], bob_id.as_str());
    let (_, conversations) = app.get("/conversations", &bob).await;
    assert_eq!(conversations[0]["other_user"]["id"], alice_id.as_str());
}

#[tokio::test]
async fn outsiders_cannot_read_or_send() {
    let app = TestApp::new().await;
    let (alice, _) = app.register("alice").await;
    let (_, bob_id) = app.register("bob").await;
    let (mallory, _) = app.register("mallory").await;
    let (_, conversation) = open(&app, &alice, &bob_id).await;
    let uri = format!("/conversations/{}/messages", conversation["id"].as_str().unwrap());

    assert_eq!(app.get(&uri, &mallory).await.0, StatusCode::FORBIDDEN);
    assert_eq!(app.post(&uri, &mallory, json!({ "content": "hi" })).await.0, StatusCode::FORBIDDEN);
    assert_eq!(app.post(&uri, &alice, json!({ "content": "   " })).await.0, StatusCode::BAD_REQUEST);

    let missing = format!("/conversations/{}/messages", Uuid::new_v4());
    assert_eq!(app.get(&missing, &alice).await.0, StatusCode::NOT_FOUND);
    assert_eq!(app.post(&missing, &alice, json!({ "content": "hi" })).await.0, StatusCode::NOT_FOUND);

    let (_, conversations) = app.get("/conversations", &alice).await;
    assert_eq!(conversations[0]["last_message_content"], Value::Null);
}

#[tokio::test]
async fn legacy_and_foreign_rows_do_not_break_reads() {
    let app = TestApp::new().await;
    let (alice, alice_id) = app.register("alice").await;
    let (_, bob_id) = app.register("bob").await;
    let (_, conversation) = open(&app, &alice, &bob_id).await;
    let conversation_id = conversation["id"].as_str().unwrap();

    // Rows written before encryption, and rows sealed with another key
    app.state
        .db
        .insert_message(&Uuid::new_v4().to_string(), conversation_id, &alice_id, "plain old text")
        .unwrap();
    app.state
        .db
        .insert_message(&Uuid::new_v4().to_string(), conversation_id, &alice_id, "pc1:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA")
        .unwrap();

    let (status, listed) = app.get(&format!("/conversations/{conversation_id}/messages"), &alice).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed[0]["content"], "plain old text");
    assert_eq!(listed[1]["content"], UNREADABLE_PLACEHOLDER);

    let (_, conversations) = app.get("/conversations", &alice).await;
    assert_eq!(conversations[0]["last_message_content"], UNREADABLE_PLACEHOLDER);
}

#[tokio::test]
async fn conversations_are_sorted_by_latest_message() {
    let app = TestApp::new().await;
    let (alice, _) = app.register("alice").await;
    let (_, bob_id) = app.register("bob").await;
    let (_, carol_id) = app.register("carol").await;

    let (_, with_bob) = open(&app, &alice, &bob_id).await;
    let (_, with_carol) = open(&app, &alice, &carol_id).await;
    let uri = format!("/conversations/{}/messages", with_bob["id"].as_str().unwrap());
    app.post(&uri, &alice, json!({ "content": "ping" })).await;

    let (_, conversations) = app.get("/conversations", &alice).await;
    let ids: Vec<&Value> = conversations.as_array().unwrap().iter().map(|c| &c["id"]).collect();
    assert_eq!(ids, vec![&with_bob["id"], &with_carol["id"]]);
}
