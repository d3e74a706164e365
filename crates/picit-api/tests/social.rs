mod common;

use axum::http::{Method, StatusCode};
use serde_json::{Value, json};

use common::{PUBLIC_URL, TestApp};

fn usernames(list: &Value) -> Vec<&str> {
    list.as_array()
        .unwrap()
        .iter()
        .map(|u| u["username"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn profile_upsert_normalizes_and_detects_collisions() {
    let app = TestApp::new().await;
    let (token, _) = app.signup("alice@example.com").await;

    let (status, user) = app
        .call(
            Method::PUT,
            "/users/me",
            Some(&token),
            Some(json!({ "username": "  Alice.B ", "name": "Alice", "website": "alice.dev" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["username"], "alice.b");
    assert_eq!(user["reg_complete"], true);

    for bad in ["ab", "has space", "semi;colon"] {
        let (status, _) = app
            .call(Method::PUT, "/users/me", Some(&token), Some(json!({ "username": bad })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{bad}");
    }

    let (other, _) = app.signup("bob@example.com").await;
    let (status, _) = app
        .call(Method::PUT, "/users/me", Some(&other), Some(json!({ "username": "ALICE.B" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn search_matches_name_or_username_case_insensitively() {
    let app = TestApp::new().await;
    let (token, _) = app.register("marta").await;
    app.register("martin").await;
    app.register("bob").await;

    let (status, found) = app.get("/users/search?q=MART", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(usernames(&found), vec!["marta", "martin"]);

    let (_, blank) = app.get("/users/search?q=%20%20", &token).await;
    assert_eq!(blank, json!([]));
    let (_, missing) = app.get("/users/search", &token).await;
    assert_eq!(missing, json!([]));

    // `%` is matched literally, not as a wildcard
    let (_, literal) = app.get("/users/search?q=%25", &token).await;
    assert_eq!(literal, json!([]));
}

#[tokio::test]
async fn search_returns_at_most_ten_users() {
    let app = TestApp::new().await;
    let (token, _) = app.register("viewer").await;
    for i in 0..12 {
        app.register(&format!("fan_{i:02}")).await;
    }

    let (_, found) = app.get("/users/search?q=fan_", &token).await;
    assert_eq!(found.as_array().unwrap().len(), 10);
}

#[tokio::test]
async fn follow_and_unfollow_keep_both_sides_in_step() {
    let app = TestApp::new().await;
    let (alice, alice_id) = app.register("alice").await;
    let (bob, bob_id) = app.register("bob").await;

    let follow_uri = format!("/users/{bob_id}/follow");
    let (status, body) = app.call(Method::POST, &follow_uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["following"], true);
    assert_eq!(body["target"]["follower_count"], 1);

    // Idempotent
    let (_, body) = app.call(Method::POST, &follow_uri, Some(&alice), None).await;
    assert_eq!(body["target"]["follower_count"], 1);

    let (_, status_body) = app.get(&follow_uri, &alice).await;
    assert_eq!(status_body["following"], true);
    let (_, followers) = app.get(&format!("/users/{bob_id}/followers"), &bob).await;
    assert_eq!(usernames(&followers), vec!["alice"]);
    let (_, following) = app.get(&format!("/users/{alice_id}/following"), &bob).await;
    assert_eq!(usernames(&following), vec!["bob"]);

    let (_, profile) = app.get(&format!("/users/{alice_id}"), &bob).await;
    assert_eq!(profile["following_count"], 1);
    assert_eq!(profile["follower_count"], 0);

    let (status, body) = app.call(Method::DELETE, &follow_uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["following"], false);
    assert_eq!(body["target"]["follower_count"], 0);

    let (_, profile) = app.get(&format!("/users/{alice_id}"), &bob).await;
    assert_eq!(profile["following_count"], 0);
    let (_, followers) = app.get(&format!("/users/{bob_id}/followers"), &bob).await;
    assert_eq!(followers, json!([]));
}

#[tokio::test]
async fn follow_rejects_self_and_unknown_users() {
    let app = TestApp::new().await;
    let (alice, alice_id) = app.register("alice").await;

    let (status, _) = app.call(Method::POST, &format!("/users/{alice_id}/follow"), Some(&alice), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let unknown = uuid::Uuid::new_v4();
    let (status, _) = app.call(Method::POST, &format!("/users/{unknown}/follow"), Some(&alice), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.get(&format!("/users/{unknown}"), &alice).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn avatar_upload_replaces_the_previous_object() {
    let app = TestApp::new().await;
    let (token, _) = app.signup("alice@example.com").await;

    // No username yet, so there is nothing to name the file after
    let (status, _) = app.upload(Method::PUT, "/users/me/avatar", &token, b"img".to_vec(), "image/jpeg").await;
    assert_eq!(status, StatusCode::CONFLICT);

    app.call(Method::PUT, "/users/me", Some(&token), Some(json!({ "username": "alice" }))).await;
    let (status, user) = app.upload(Method::PUT, "/users/me/avatar", &token, b"first".to_vec(), "image/jpeg").await;
    assert_eq!(status, StatusCode::OK);
    let first_url = user["avatar_url"].as_str().unwrap().to_string();
    assert_eq!(first_url, format!("{PUBLIC_URL}/storage/v1/object/public/avatars/alice.jpg"));

    let served = app.fetch(first_url.strip_prefix(PUBLIC_URL).unwrap()).await;
    assert_eq!(served.status, StatusCode::OK);
    assert_eq!(served.content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(served.bytes, b"first");

    app.call(Method::PUT, "/users/me", Some(&token), Some(json!({ "username": "alice_2" }))).await;
    let (_, user) = app.upload(Method::PUT, "/users/me/avatar", &token, b"second".to_vec(), "image/jpeg").await;
    assert!(user["avatar_url"].as_str().unwrap().ends_with("/avatars/alice_2.jpg"));

    let gone = app.fetch(first_url.strip_prefix(PUBLIC_URL).unwrap()).await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);

    let (status, objects) = app.get("/storage/avatars", &token).await;
    assert_eq!(status, StatusCode::OK);
    let paths: Vec<&str> = objects.as_array().unwrap().iter().map(|o| o["path"].as_str().unwrap()).collect();
    assert_eq!(paths, vec!["alice_2.jpg"]);
}

#[tokio::test]
async fn public_storage_rejects_unknown_buckets_and_traversal() {
    let app = TestApp::new().await;
    assert_eq!(app.fetch("/storage/v1/object/public/secrets/x").await.status, StatusCode::NOT_FOUND);
    assert_eq!(app.fetch("/storage/v1/object/public/posts/a/../b").await.status, StatusCode::NOT_FOUND);
    assert_eq!(app.fetch("/storage/v1/object/public/posts/nothing").await.status, StatusCode::NOT_FOUND);
}
