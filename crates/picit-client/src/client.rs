use std::sync::Arc;

use reqwest::{Method, RequestBuilder, Response, header};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use picit_types::api::{
    AddCommentRequest, AuthResponse, CreateTaskRequest, FollowResponse, FollowStatusResponse,
    LikeResponse, LoginRequest, OpenConversationRequest, SendMessageRequest, SessionResponse,
    SignUpRequest, UpdateProfileRequest,
};
use picit_types::models::{
    Comment, Conversation, FeedPost, Message, Post, Profile, StorageObject, Task, User, UserSummary,
};

use crate::error::{ClientError, Result};

/// Typed client for the PicIt REST API.
///
/// Cloning is cheap; clones share the signed-in session.
#[derive(Clone)]
pub struct PicitClient {
    http: reqwest::Client,
    base_url: String,
    session: Arc<RwLock<Option<AuthResponse>>>,
}

impl PicitClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            session: Arc::new(RwLock::new(None)),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The current session, if signed in.
    pub async fn current_session(&self) -> Option<AuthResponse> {
        self.session.read().await.clone()
    }

    pub async fn user_id(&self) -> Option<Uuid> {
        self.session.read().await.as_ref().map(|s| s.user_id)
    }

    pub async fn token(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.token.clone())
    }

    /// Forget the local session without telling the server.
    pub async fn clear_session(&self) {
        *self.session.write().await = None;
    }

    // -- Auth --

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthResponse> {
        let req = SignUpRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let auth: AuthResponse = json(self.http.post(self.url("/auth/signup")).json(&req)).await?;
        self.store(auth.clone()).await;
        Ok(auth)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResponse> {
        let req = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let auth: AuthResponse = json(self.http.post(self.url("/auth/login")).json(&req)).await?;
        self.store(auth.clone()).await;
        Ok(auth)
    }

    /// Revoke the session on the server and forget it locally. The local
    /// session is cleared even when the server call fails.
    pub async fn sign_out(&self) -> Result<()> {
        let result = match self.authed(Method::POST, "/auth/logout").await {
            Ok(req) => empty(req).await,
            Err(e) => Err(e),
        };
        self.clear_session().await;
        result
    }

    pub async fn session(&self) -> Result<SessionResponse> {
        json(self.authed(Method::GET, "/auth/session").await?).await
    }

    /// Exchange the current session for a fresh one.
    pub async fn refresh(&self) -> Result<AuthResponse> {
        let auth: AuthResponse = json(self.authed(Method::POST, "/auth/refresh").await?).await?;
        debug!("Session refreshed, expires {}", auth.expires_at);
        self.store(auth.clone()).await;
        Ok(auth)
    }

    // -- Users --

    pub async fn me(&self) -> Result<Profile> {
        json(self.authed(Method::GET, "/users/me").await?).await
    }

    pub async fn update_profile(&self, username: &str, name: &str, website: &str) -> Result<User> {
        let req = UpdateProfileRequest {
            username: username.to_string(),
            name: name.to_string(),
            website: website.to_string(),
        };
        json(self.authed(Method::PUT, "/users/me").await?.json(&req)).await
    }

    /// Upload JPEG bytes as the caller's avatar.
    pub async fn upload_avatar(&self, jpeg: Vec<u8>) -> Result<User> {
        let req = self
            .authed(Method::PUT, "/users/me/avatar")
            .await?
            .header(header::CONTENT_TYPE, "image/jpeg")
            .body(jpeg);
        json(req).await
    }

    pub async fn search_users(&self, query: &str) -> Result<Vec<UserSummary>> {
        json(self.authed(Method::GET, "/users/search").await?.query(&[("q", query)])).await
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<Profile> {
        json(self.authed(Method::GET, &format!("/users/{}", user_id)).await?).await
    }

    pub async fn user_posts(&self, user_id: Uuid) -> Result<Vec<Post>> {
        json(self.authed(Method::GET, &format!("/users/{}/posts", user_id)).await?).await
    }

    pub async fn user_tasks(&self, user_id: Uuid) -> Result<Vec<Task>> {
        json(self.authed(Method::GET, &format!("/users/{}/tasks", user_id)).await?).await
    }

    // -- Follows --

    pub async fn followers(&self, user_id: Uuid) -> Result<Vec<UserSummary>> {
        json(self.authed(Method::GET, &format!("/users/{}/followers", user_id)).await?).await
    }

    pub async fn following(&self, user_id: Uuid) -> Result<Vec<UserSummary>> {
        json(self.authed(Method::GET, &format!("/users/{}/following", user_id)).await?).await
    }

    pub async fn is_following(&self, user_id: Uuid) -> Result<bool> {
        let status: FollowStatusResponse =
            json(self.authed(Method::GET, &format!("/users/{}/follow", user_id)).await?).await?;
        Ok(status.following)
    }

    pub async fn follow(&self, user_id: Uuid) -> Result<FollowResponse> {
        json(self.authed(Method::POST, &format!("/users/{}/follow", user_id)).await?).await
    }

    pub async fn unfollow(&self, user_id: Uuid) -> Result<FollowResponse> {
        json(self.authed(Method::DELETE, &format!("/users/{}/follow", user_id)).await?).await
    }

    // -- Tasks --

    pub async fn create_task(&self, req: &CreateTaskRequest) -> Result<Task> {
        json(self.authed(Method::POST, "/tasks").await?.json(req)).await
    }

    pub async fn tasks(&self) -> Result<Vec<Task>> {
        json(self.authed(Method::GET, "/tasks").await?).await
    }

    pub async fn delete_task(&self, task_id: Uuid) -> Result<()> {
        empty(self.authed(Method::DELETE, &format!("/tasks/{}", task_id)).await?).await
    }

    /// Complete a task with already-captured image bytes as proof.
    pub async fn complete_task(&self, task_id: Uuid, image: Vec<u8>, content_type: &str) -> Result<Post> {
        let req = self
            .authed(Method::POST, &format!("/tasks/{}/complete", task_id))
            .await?
            .header(header::CONTENT_TYPE, content_type)
            .body(image);
        json(req).await
    }

    // -- Feed, likes & comments --

    pub async fn feed(&self, limit: Option<u32>) -> Result<Vec<FeedPost>> {
        let mut req = self.authed(Method::GET, "/posts").await?;
        if let Some(limit) = limit {
            req = req.query(&[("limit", limit)]);
        }
        json(req).await
    }

    pub async fn toggle_like(&self, post_id: Uuid) -> Result<LikeResponse> {
        json(self.authed(Method::POST, &format!("/posts/{}/like", post_id)).await?).await
    }

    pub async fn like_status(&self, post_id: Uuid) -> Result<LikeResponse> {
        json(self.authed(Method::GET, &format!("/posts/{}/like", post_id)).await?).await
    }

    pub async fn comments(&self, post_id: Uuid) -> Result<Vec<Comment>> {
        json(self.authed(Method::GET, &format!("/posts/{}/comments", post_id)).await?).await
    }

    pub async fn add_comment(&self, post_id: Uuid, text: &str) -> Result<Comment> {
        let req = AddCommentRequest { text: text.to_string() };
        json(
            self.authed(Method::POST, &format!("/posts/{}/comments", post_id))
                .await?
                .json(&req),
        )
        .await
    }

    // -- Conversations --

    pub async fn conversations(&self) -> Result<Vec<Conversation>> {
        json(self.authed(Method::GET, "/conversations").await?).await
    }

    pub async fn open_conversation(&self, user_id: Uuid) -> Result<Conversation> {
        let req = OpenConversationRequest { user_id };
        json(self.authed(Method::POST, "/conversations").await?.json(&req)).await
    }

    pub async fn messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        json(
            self.authed(Method::GET, &format!("/conversations/{}/messages", conversation_id))
                .await?,
        )
        .await
    }

    pub async fn send_message(&self, conversation_id: Uuid, content: &str) -> Result<Message> {
        let req = SendMessageRequest {
            content: content.to_string(),
        };
        json(
            self.authed(Method::POST, &format!("/conversations/{}/messages", conversation_id))
                .await?
                .json(&req),
        )
        .await
    }

    // -- Storage --

    pub async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<StorageObject>> {
        json(
            self.authed(Method::GET, &format!("/storage/{}", bucket))
                .await?
                .query(&[("prefix", prefix)]),
        )
        .await
    }

    /// Fetch the bytes behind a public object URL such as `Post::task_image`.
    pub async fn download(&self, public_url: &str) -> Result<Vec<u8>> {
        let resp = check(self.http.get(public_url).send().await?)?;
        Ok(resp.bytes().await?.to_vec())
    }

    pub async fn health(&self) -> Result<()> {
        empty(self.http.get(self.url("/health"))).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn authed(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let token = self.token().await.ok_or(ClientError::NotSignedIn)?;
        Ok(self.http.request(method, self.url(path)).bearer_auth(token))
    }

    async fn store(&self, auth: AuthResponse) {
        *self.session.write().await = Some(auth);
    }
}

fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(ClientError::Status { status })
    }
}

async fn json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T> {
    let resp = check(req.send().await?)?;
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn empty(req: RequestBuilder) -> Result<()> {
    check(req.send().await?)?;
    Ok(())
}
