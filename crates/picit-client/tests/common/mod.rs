#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;
use tokio::net::TcpListener;

use picit_api::{AppState, AppStateInner, router};
use picit_client::PicitClient;
use picit_crypto::{MessageCipher, MessageKey};
use picit_db::Database;
use picit_gateway::dispatcher::Dispatcher;
use picit_storage::Storage;

pub const PASSWORD: &str = "correct horse battery";

/// The real router served on an ephemeral local port.
pub struct TestServer {
    pub base_url: String,
    pub state: AppState,
    _dir: TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let storage = Storage::new(dir.path().join("storage"), &base_url).await.unwrap();
        let state: AppState = Arc::new(AppStateInner {
            db: Arc::new(Database::open_in_memory().unwrap()),
            storage,
            cipher: MessageCipher::new(&MessageKey::derive("client-test-key")),
            dispatcher: Dispatcher::new(),
            jwt_secret: "client-test-secret".into(),
            session_days: 30,
        });

        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            base_url,
            state,
            _dir: dir,
        }
    }

    pub fn client(&self) -> PicitClient {
        PicitClient::new(&self.base_url)
    }

    /// A signed-up client with `username` set.
    pub async fn user(&self, username: &str) -> PicitClient {
        let client = self.client();
        client
            .sign_up(&format!("{}@picit.test", username), PASSWORD)
            .await
            .unwrap();
        client.update_profile(username, username, "").await.unwrap();
        client
    }
}

pub fn jpeg() -> Vec<u8> {
    vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3, 4, 0xFF, 0xD9]
}
