#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use picit_api::{AppState, AppStateInner, router};
use picit_crypto::{MessageCipher, MessageKey};
use picit_db::Database;
use picit_gateway::dispatcher::Dispatcher;
use picit_storage::Storage;

pub const PUBLIC_URL: &str = "http://picit.test";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub dir: TempDir,
}

pub struct Response {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Response {
    pub fn json(&self) -> Value {
        if self.bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&self.bytes).unwrap_or(Value::Null)
        }
    }
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("storage"), PUBLIC_URL).await.unwrap();
        let state: AppState = Arc::new(AppStateInner {
            db: Arc::new(Database::open_in_memory().unwrap()),
            storage,
            cipher: MessageCipher::new(&MessageKey::derive("test-message-key")),
            dispatcher: Dispatcher::new(),
            jwt_secret: "test-jwt-secret".into(),
            session_days: 30,
        });
        Self {
            router: router(state.clone()),
            state,
            dir,
        }
    }

    pub async fn send(&self, req: Request<Body>) -> Response {
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
        Response {
            status,
            content_type,
            bytes,
        }
    }

    pub async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(v) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_string(&v).unwrap())
            }
            None => Body::empty(),
        };
        let resp = self.send(builder.body(body).unwrap()).await;
        (resp.status, resp.json())
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.call(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(token), Some(body)).await
    }

    pub async fn upload(&self, method: Method, uri: &str, token: &str, bytes: Vec<u8>, content_type: &str) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(bytes))
            .unwrap();
        let resp = self.send(req).await;
        (resp.status, resp.json())
    }

    /// Unauthenticated GET returning the raw response.
    pub async fn fetch(&self, uri: &str) -> Response {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    /// Sign up and return `(token, user_id)`.
    pub async fn signup(&self, email: &str) -> (String, String) {
        let (status, body) = self
            .call(
                Method::POST,
                "/auth/signup",
                None,
                Some(json!({ "email": email, "password": "correct horse" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (
            body["token"].as_str().unwrap().to_string(),
            body["user_id"].as_str().unwrap().to_string(),
        )
    }

    /// Sign up and complete the profile with `username`.
    pub async fn register(&self, username: &str) -> (String, String) {
        let (token, id) = self.signup(&format!("{username}@example.com")).await;
        let (status, body) = self
            .call(
                Method::PUT,
                "/users/me",
                Some(&token),
                Some(json!({ "username": username, "name": username.to_uppercase(), "website": "" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        (token, id)
    }

    /// Create a task and complete it with a small image; returns the post id.
    pub async fn finished_post(&self, token: &str, name: &str) -> String {
        let (status, task) = self
            .post("/tasks", token, json!({ "name": name, "description": "proof attached" }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{task}");
        let uri = format!("/tasks/{}/complete", task["id"].as_str().unwrap());
        let (status, post) = self.upload(Method::POST, &uri, token, b"jpeg bytes".to_vec(), "image/jpeg").await;
        assert_eq!(status, StatusCode::CREATED, "{post}");
        post["id"].as_str().unwrap().to_string()
    }
}
