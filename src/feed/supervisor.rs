//! Composition root for one feed session.
//!
//! Owns the ticker→book and ticker→recorder maps, runs the connection, and
//! guarantees every recorder gets a drain-and-flush before the process
//! gives up its feed participation, whether the session ended in error or
//! on a shutdown signal.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{error, info};

use crate::engine::OrderBook;
use crate::feed::auth::Credentials;
use crate::feed::connection::FeedConnection;
use crate::feed::FeedError;
use crate::persist::{EventRecorder, RecorderConfig};

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Root directory for per-ticker day files.
    pub data_dir: PathBuf,
    pub recorder: RecorderConfig,
}

pub struct FeedSupervisor {
    credentials: Credentials,
    tickers: Vec<String>,
    config: SupervisorConfig,
    ws_url: Option<String>,
}

impl FeedSupervisor {
    pub fn new(credentials: Credentials, tickers: Vec<String>, config: SupervisorConfig) -> Self {
        Self {
            credentials,
            tickers,
            config,
            ws_url: None,
        }
    }

    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = Some(url.into());
        self
    }

    /// Runs one session end to end. Returns when the connection dies or a
    /// shutdown signal arrives; either way all recorders are drained first.
    /// Reconnection is the caller's decision; a fresh run starts a fresh
    /// handshake.
    pub async fn run(self) -> Result<(), FeedError> {
        let mut books: HashMap<String, OrderBook> = HashMap::new();
        let mut recorders: HashMap<String, EventRecorder> = HashMap::new();
        for ticker in &self.tickers {
            books.insert(ticker.clone(), OrderBook::new(ticker));
            recorders.insert(
                ticker.clone(),
                EventRecorder::spawn(ticker, &self.config.data_dir, self.config.recorder.clone())?,
            );
        }
        info!(markets = self.tickers.len(), data_dir = %self.config.data_dir.display(), "supervisor started");

        let mut connection = FeedConnection::new(self.credentials, self.tickers);
        if let Some(url) = self.ws_url {
            connection = connection.with_ws_url(url);
        }

        let result = tokio::select! {
            session = connection.run(&mut books, &recorders) => {
                if let Err(ref e) = session {
                    error!(error = %e, "feed session terminated");
                }
                session
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                Ok(())
            }
        };

        info!(recorders = recorders.len(), "draining recorders");
        for (_, recorder) in recorders {
            recorder.shutdown().await;
        }
        result
    }
}
