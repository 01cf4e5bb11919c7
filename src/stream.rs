//! Newline-delimited JSON stream of scan results.
//!
//! The pipeline pushes messages into an mpsc channel as they are produced;
//! the HTTP layer turns the receiving half into a chunked response body.

use crate::models::Lead;
use axum::body::{Body, Bytes};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Messages are buffered up to this many before the producer waits.
const CHANNEL_CAPACITY: usize = 32;

/// Lead plus the factors that got it accepted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadWithFactors {
    #[serde(flatten)]
    pub lead: Lead,
    pub scoring_factors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamMessage {
    /// Sent once, right after acquisition.
    #[serde(rename_all = "camelCase")]
    Meta {
        total_scraped: usize,
        scraping_method: String,
    },
    /// One per accepted candidate.
    Lead { data: LeadWithFactors },
}

impl StreamMessage {
    pub fn is_meta(&self) -> bool {
        matches!(self, StreamMessage::Meta { .. })
    }
}

/// One JSON object followed by `\n`.
pub fn to_ndjson_line(message: &StreamMessage) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Producer half, owned by the pipeline task.
#[derive(Clone)]
pub struct StreamEmitter {
    tx: mpsc::Sender<StreamMessage>,
}

impl StreamEmitter {
    /// Returns `false` once the consumer has gone away.
    pub async fn emit(&self, message: StreamMessage) -> bool {
        self.tx.send(message).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, handed back to the caller of a scan.
pub struct ScanStream {
    rx: mpsc::Receiver<StreamMessage>,
}

pub fn channel() -> (StreamEmitter, ScanStream) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    (StreamEmitter { tx }, ScanStream { rx })
}

impl ScanStream {
    /// Next message as soon as it is produced; `None` once the scan is done.
    pub async fn next_message(&mut self) -> Option<StreamMessage> {
        self.rx.recv().await
    }

    /// Drains the stream until the producer finishes.
    pub async fn collect(mut self) -> Vec<StreamMessage> {
        let mut messages = Vec::new();
        while let Some(message) = self.next_message().await {
            messages.push(message);
        }
        messages
    }

    /// Chunked response body, one line per message. Dropping the body (client
    /// disconnect) closes the channel, which the pipeline observes.
    pub fn into_body(self) -> Body {
        let lines = ReceiverStream::new(self.rx).filter_map(|message| {
            match to_ndjson_line(&message) {
                Ok(line) => Some(Ok::<_, std::convert::Infallible>(Bytes::from(line))),
                Err(e) => {
                    tracing::error!("Failed to encode stream message: {}", e);
                    None
                }
            }
        });
        Body::from_stream(lines)
    }
}
