//! Stats writers.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::payload::StatsPayload;

/// Destination for flushed stats payloads.
///
/// Writes are fire-and-forget: the concentrator does not retry, and does not learn whether a write succeeded.
#[async_trait]
pub trait StatsWriter: Send + Sync {
    /// Writes a stats payload.
    async fn write(&self, payload: StatsPayload);
}

/// A writer that forwards payloads over a channel.
#[derive(Clone)]
pub struct ChannelWriter {
    tx: mpsc::Sender<StatsPayload>,
}

impl ChannelWriter {
    /// Creates a new `ChannelWriter` and the receiver its payloads are forwarded to.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<StatsPayload>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl StatsWriter for ChannelWriter {
    async fn write(&self, payload: StatsPayload) {
        let buckets = payload.bucket_count();
        if self.tx.send(payload).await.is_err() {
            warn!(buckets, "Stats payload receiver is gone. Dropping payload.");
        }
    }
}
