//! Authenticated feed session: connect, subscribe, confirm, dispatch.
//!
//! The connection owns the transport handshake and the single dispatch path
//! that mutates the per-market books. Messages are processed strictly in
//! arrival order; a delta is fully applied before its derived event is
//! composed and handed to the market's recorder.

use std::collections::HashMap;
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use metrics::counter;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::engine::types::{DeltaDetail, EventKind};
use crate::engine::OrderBook;
use crate::feed::auth::Credentials;
use crate::feed::messages::{
    self, DeltaMsg, Envelope, SnapshotMsg, SubscribedMsg, TYPE_DELTA, TYPE_SNAPSHOT,
    TYPE_SUBSCRIBED,
};
use crate::feed::FeedError;
use crate::persist::EventRecorder;

const DEFAULT_WS_URL: &str = "wss://api.elections.kalshi.com/trade-api/ws/v2";

/// Bounded ack wait: a few short polls, then the session is declared dead.
const ACK_POLL_ATTEMPTS: usize = 5;
const ACK_POLL_TIMEOUT: Duration = Duration::from_secs(2);

const SUBSCRIBE_ID: u64 = 1;
const EXPAND_ID: u64 = 2;

pub struct FeedConnection {
    credentials: Credentials,
    ws_url: String,
    tickers: Vec<String>,
}

impl FeedConnection {
    pub fn new(credentials: Credentials, tickers: Vec<String>) -> Self {
        Self {
            credentials,
            ws_url: DEFAULT_WS_URL.to_string(),
            tickers,
        }
    }

    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    /// Runs the full session: authenticate, subscribe to the first ticker,
    /// wait for the ack, expand to the remaining tickers, then dispatch
    /// until the transport dies. Every exit is an error by construction:
    /// a healthy session never ends on its own.
    pub async fn run(
        self,
        books: &mut HashMap<String, OrderBook>,
        recorders: &HashMap<String, EventRecorder>,
    ) -> Result<(), FeedError> {
        if self.tickers.is_empty() {
            return Err(FeedError::Protocol("no tickers to subscribe".to_string()));
        }

        let mut request = self.ws_url.as_str().into_client_request()?;
        for (name, value) in self.credentials.ws_headers()? {
            let value = value
                .parse()
                .map_err(|_| FeedError::Protocol(format!("invalid header value for {name}")))?;
            request.headers_mut().insert(name, value);
        }

        let (stream, _response) = connect_async(request).await?;
        info!(url = %self.ws_url, "websocket connected");
        let (mut write, mut read) = stream.split();

        let subscribe = messages::subscribe_cmd(SUBSCRIBE_ID, &self.tickers[0]);
        write.send(Message::Text(subscribe.to_string())).await?;
        debug!(ticker = %self.tickers[0], "initial subscribe sent");

        let sid = await_subscription_ack(&mut read).await?;
        info!(sid, ticker = %self.tickers[0], "subscription confirmed");

        if self.tickers.len() > 1 {
            let expand = messages::update_subscription_cmd(EXPAND_ID, sid, &self.tickers[1..]);
            write.send(Message::Text(expand.to_string())).await?;
            info!(added = self.tickers.len() - 1, "subscription expanded");
        }

        dispatch(&mut read, books, recorders).await
    }
}

/// Polls the inbound stream for the `subscribed` ack matching the initial
/// subscribe's correlation id and returns its subscription identifier.
pub(crate) async fn await_subscription_ack<S>(read: &mut S) -> Result<u64, FeedError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    for attempt in 1..=ACK_POLL_ATTEMPTS {
        let next = match tokio::time::timeout(ACK_POLL_TIMEOUT, read.next()).await {
            Ok(next) => next,
            Err(_) => {
                debug!(attempt, "no subscription ack yet");
                continue;
            }
        };
        let Some(frame) = next else {
            return Err(FeedError::ConnectionClosed);
        };
        let Message::Text(text) = frame? else {
            continue;
        };
        let Ok(envelope) = serde_json::from_str::<Envelope>(&text) else {
            debug!("skipping unparseable pre-ack frame");
            continue;
        };
        if envelope.kind == TYPE_SUBSCRIBED && envelope.id == Some(SUBSCRIBE_ID) {
            let ack: SubscribedMsg = serde_json::from_value(envelope.msg)
                .map_err(|e| FeedError::Protocol(format!("malformed subscribed ack: {e}")))?;
            return Ok(ack.sid);
        }
        debug!(kind = %envelope.kind, "ignoring pre-ack message");
    }
    Err(FeedError::SubscribeTimeout)
}

/// Steady-state loop: network frame → book mutation → derived event →
/// recorder queue. Runs until the transport errors or closes.
pub(crate) async fn dispatch<S>(
    read: &mut S,
    books: &mut HashMap<String, OrderBook>,
    recorders: &HashMap<String, EventRecorder>,
) -> Result<(), FeedError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = read.next().await {
        match frame? {
            Message::Text(text) => handle_text(&text, books, recorders).await?,
            Message::Close(frame) => {
                warn!(?frame, "server closed the connection");
                return Err(FeedError::ConnectionClosed);
            }
            Message::Ping(_) | Message::Pong(_) => {}
            other => debug!(?other, "ignoring non-text frame"),
        }
    }
    Err(FeedError::ConnectionClosed)
}

async fn handle_text(
    text: &str,
    books: &mut HashMap<String, OrderBook>,
    recorders: &HashMap<String, EventRecorder>,
) -> Result<(), FeedError> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|e| FeedError::Protocol(format!("malformed message envelope: {e}")))?;

    match envelope.kind.as_str() {
        TYPE_SNAPSHOT => {
            let seq = envelope
                .seq
                .ok_or_else(|| FeedError::Protocol("snapshot without seq".to_string()))?;
            let snapshot: SnapshotMsg = serde_json::from_value(envelope.msg)
                .map_err(|e| FeedError::Protocol(format!("malformed snapshot payload: {e}")))?;
            let Some(book) = books.get_mut(&snapshot.market_ticker) else {
                debug!(ticker = %snapshot.market_ticker, "snapshot for unsubscribed market");
                return Ok(());
            };
            let ts_ms = snapshot.ts_ms();
            if book.apply_snapshot(&snapshot.yes, &snapshot.no, ts_ms, seq) {
                counter!("feed_messages_applied_total", "type" => "snapshot").increment(1);
                let event = book.derive_event(EventKind::Snapshot, None, ts_ms);
                if let Some(recorder) = recorders.get(&snapshot.market_ticker) {
                    recorder.submit(event).await;
                }
            }
        }
        TYPE_DELTA => {
            let seq = envelope
                .seq
                .ok_or_else(|| FeedError::Protocol("delta without seq".to_string()))?;
            let delta: DeltaMsg = serde_json::from_value(envelope.msg)
                .map_err(|e| FeedError::Protocol(format!("malformed delta payload: {e}")))?;
            let Some(book) = books.get_mut(&delta.market_ticker) else {
                debug!(ticker = %delta.market_ticker, "delta for unsubscribed market");
                return Ok(());
            };
            let ts_ms = delta.ts_ms();
            if book.apply_delta(delta.price, delta.delta, delta.side, ts_ms, seq) {
                counter!("feed_messages_applied_total", "type" => "delta").increment(1);
                let detail = DeltaDetail {
                    price_cents: delta.price,
                    size_delta: delta.delta,
                    side: delta.side,
                };
                let event = book.derive_event(EventKind::Delta, Some(detail), ts_ms);
                if let Some(recorder) = recorders.get(&delta.market_ticker) {
                    recorder.submit(event).await;
                }
            }
        }
        TYPE_SUBSCRIBED => debug!("subscription update acknowledged"),
        other => debug!(kind = other, "unhandled message type"),
    }
    Ok(())
}
