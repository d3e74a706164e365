use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with a non-success status.
    #[error("server returned {status}")]
    Status { status: StatusCode },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway error: {0}")]
    Gateway(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("unexpected gateway frame: {0}")]
    Protocol(String),

    #[error("invalid payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("not signed in")]
    NotSignedIn,
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status } => Some(*status),
            Self::Transport(e) => e.status(),
            _ => None,
        }
    }

    /// The session is gone and signing in again is the only way forward.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::NotSignedIn) || self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
