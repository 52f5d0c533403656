use std::mem;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::engine::types::BookEvent;
use crate::persist::types::{PersistedRecord, RecorderError};

/// Attempts the shutdown drain gets before giving up on a failing sink.
const FINAL_FLUSH_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Bounded queue depth; a full queue backpressures the dispatch path.
    pub queue_capacity: usize,
    /// Flush as soon as this many records are buffered.
    pub batch_size: usize,
    /// Flush whatever is buffered after this long without hitting the batch
    /// threshold.
    pub flush_interval: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100_000,
            batch_size: 256,
            flush_interval: Duration::from_secs(10),
        }
    }
}

/// Per-market durable sink for [`BookEvent`]s.
///
/// `submit` hands events to a dedicated background task over a bounded
/// channel; the task owns all file I/O and appends batches to the current
/// UTC-day file, merging with whatever that file already holds. Events are
/// never dropped: a full queue blocks the producer and a failed write keeps
/// the batch buffered for the next flush.
pub struct EventRecorder {
    ticker: String,
    tx: mpsc::Sender<BookEvent>,
    worker: JoinHandle<()>,
}

impl EventRecorder {
    /// Creates the per-ticker directory and starts the flush task.
    pub fn spawn(ticker: &str, data_dir: &Path, config: RecorderConfig) -> Result<Self, RecorderError> {
        let dir = data_dir.join(ticker);
        std::fs::create_dir_all(&dir)?;

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let worker = tokio::spawn(flush_worker(ticker.to_string(), dir, config, rx));
        Ok(Self {
            ticker: ticker.to_string(),
            tx,
            worker,
        })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    /// Queues an event for asynchronous persistence. Suspends only when the
    /// queue is full. That is backpressure, not an error.
    pub async fn submit(&self, event: BookEvent) {
        if self.tx.send(event).await.is_err() {
            // Worker is gone; nothing downstream can accept the event.
            error!(ticker = %self.ticker, "recorder worker terminated, event lost");
        }
    }

    /// Closes the queue and waits for the worker to drain everything left
    /// and complete one final flush. Must be called before process exit or
    /// the final partial batch is lost.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            error!(ticker = %self.ticker, error = %e, "recorder worker failed during shutdown");
        }
    }
}

async fn flush_worker(
    ticker: String,
    dir: PathBuf,
    config: RecorderConfig,
    mut rx: mpsc::Receiver<BookEvent>,
) {
    let mut buffer: Vec<PersistedRecord> = Vec::new();

    loop {
        let mut interval_elapsed = false;
        match tokio::time::timeout(config.flush_interval, rx.recv()).await {
            Ok(Some(event)) => buffer.push(PersistedRecord::from_event(&event)),
            Ok(None) => break,
            Err(_) => interval_elapsed = true,
        }

        // Drain opportunistically up to the batch threshold.
        while buffer.len() < config.batch_size {
            match rx.try_recv() {
                Ok(event) => buffer.push(PersistedRecord::from_event(&event)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }

        if !buffer.is_empty() && (interval_elapsed || buffer.len() >= config.batch_size) {
            try_flush(&ticker, &dir, &mut buffer).await;
        }
    }

    // Channel closed: drain the remainder and flush it.
    while let Ok(event) = rx.try_recv() {
        buffer.push(PersistedRecord::from_event(&event));
    }
    for attempt in 1..=FINAL_FLUSH_ATTEMPTS {
        if buffer.is_empty() {
            break;
        }
        try_flush(&ticker, &dir, &mut buffer).await;
        if !buffer.is_empty() && attempt < FINAL_FLUSH_ATTEMPTS {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
    if buffer.is_empty() {
        info!(ticker, "recorder drained and stopped");
    } else {
        error!(ticker, remaining = buffer.len(), "final flush failed, records lost");
    }
}

/// Flushes the buffer to the current day-file. On failure the batch is put
/// back so the next scheduled flush retries it ahead of newer records.
async fn try_flush(ticker: &str, dir: &Path, buffer: &mut Vec<PersistedRecord>) {
    let batch = mem::take(buffer);
    let path = day_file_path(dir);
    let job = batch.clone();

    match task::spawn_blocking(move || write_day_file(&path, job)).await {
        Ok(Ok(written)) => {
            counter!("recorder_records_flushed_total", "ticker" => ticker.to_string())
                .increment(written as u64);
            debug!(ticker, written, "flushed batch");
        }
        Ok(Err(e)) => {
            counter!("recorder_flush_failures_total", "ticker" => ticker.to_string()).increment(1);
            warn!(ticker, error = %e, "day-file write failed, batch retained for retry");
            *buffer = batch;
        }
        Err(e) => {
            error!(ticker, error = %e, "flush task failed, batch retained for retry");
            *buffer = batch;
        }
    }
}

fn day_file_path(dir: &Path) -> PathBuf {
    dir.join(format!("{}.csv", Utc::now().date_naive()))
}

/// Merges the batch into the day-file and rewrites it. An unreadable prior
/// file is logged and overwritten with the batch alone rather than crashing
/// the recorder.
fn write_day_file(path: &Path, batch: Vec<PersistedRecord>) -> Result<usize, RecorderError> {
    let mut merged = if path.exists() {
        match read_day_file(path) {
            Ok(existing) => existing,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "existing day-file unreadable, overwriting");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let appended = batch.len();
    merged.extend(batch);

    let mut writer = csv::Writer::from_path(path)?;
    for record in &merged {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(appended)
}

/// Reads a complete per-day record file, e.g. for downstream analysis.
pub fn read_day_file(path: &Path) -> Result<Vec<PersistedRecord>, RecorderError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }
    Ok(records)
}
