//! Client library for the PicIt server: typed REST calls, the realtime
//! gateway, session refresh hooks and a read-through cache.

pub mod cache;
pub mod client;
pub mod error;
pub mod gateway;
pub mod lifecycle;

pub use cache::CachedClient;
pub use client::PicitClient;
pub use error::ClientError;
pub use gateway::GatewayClient;
pub use lifecycle::{AutoRefresh, SessionLifecycle};
