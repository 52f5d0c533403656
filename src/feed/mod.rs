// Feed-connection lifecycle: auth, handshake, dispatch, supervision
pub mod auth;
pub mod connection;
pub mod markets;
pub mod messages;
pub mod supervisor;

use thiserror::Error;

pub use auth::{AuthError, Credentials};
pub use connection::FeedConnection;
pub use markets::{Market, MarketCatalog};
pub use supervisor::{FeedSupervisor, SupervisorConfig};

use crate::persist::RecorderError;

/// Session-fatal feed failures. Staleness and storage hiccups are handled
/// in place and never surface here.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("recorder setup failed: {0}")]
    Recorder(#[from] RecorderError),
    #[error("no subscription ack within the timeout window")]
    SubscribeTimeout,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("connection closed by remote")]
    ConnectionClosed,
}
