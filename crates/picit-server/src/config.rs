use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    pub public_url: String,
    pub jwt_secret: String,
    pub message_key: String,
    pub session_days: i64,
    pub session_prune_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = required_secret(&lookup, "PICIT_JWT_SECRET")?;
        let message_key = required_secret(&lookup, "PICIT_MESSAGE_KEY")?;

        let port = var("PICIT_PORT", "3000")
            .parse()
            .context("PICIT_PORT must be a port number")?;
        let session_days: i64 = var("PICIT_SESSION_DAYS", "30")
            .parse()
            .context("PICIT_SESSION_DAYS must be a whole number of days")?;
        if session_days < 1 {
            bail!("PICIT_SESSION_DAYS must be at least 1");
        }
        let session_prune_secs: u64 = var("PICIT_SESSION_PRUNE_SECS", "3600")
            .parse()
            .context("PICIT_SESSION_PRUNE_SECS must be a whole number of seconds")?;
        if session_prune_secs == 0 {
            bail!("PICIT_SESSION_PRUNE_SECS must be greater than zero");
        }

        Ok(Self {
            host: var("PICIT_HOST", "0.0.0.0"),
            port,
            db_path: var("PICIT_DB_PATH", "picit.db").into(),
            storage_dir: var("PICIT_STORAGE_DIR", "./storage").into(),
            public_url: var("PICIT_PUBLIC_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),
            jwt_secret,
            message_key,
            session_days,
            session_prune_secs,
        })
    }
}

fn required_secret(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    let value = lookup(key).unwrap_or_default();
    if value.is_empty() || PLACEHOLDER_SECRETS.contains(&value.as_str()) {
        bail!("{} is unset or still a placeholder. Set it in your .env file and restart.", key);
    }
    Ok(value)
}
