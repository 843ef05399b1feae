//! Ordered delivery of newly produced messages.
//!
//! The transport picks the mode: batch callers take the turn's message slice
//! from the orchestrator's return value; streaming callers receive each
//! message as soon as it exists over a bounded single-reader channel.

use pigeon_core::Message;
use tokio::sync::mpsc;

const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Publishes each message produced during a turn.
pub enum TurnEmitter {
    /// No incremental delivery; the caller consumes the returned slice.
    Batch,
    /// Push each message onto a bounded channel as soon as it exists. The
    /// producer awaits the send, so a slow reader applies backpressure and no
    /// message is ever dropped. A disconnected reader stops delivery without
    /// aborting the turn.
    Streaming(mpsc::Sender<Message>),
}

impl TurnEmitter {
    /// Batch-mode emitter.
    pub fn batch() -> Self {
        Self::Batch
    }

    /// Streaming emitter with the default channel capacity. The channel is
    /// closed when the emitter is dropped, i.e. when the turn reaches its
    /// terminal state.
    pub fn streaming() -> (Self, mpsc::Receiver<Message>) {
        Self::streaming_with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Streaming emitter with an explicit channel capacity.
    pub fn streaming_with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::Streaming(tx), rx)
    }

    /// Delivers one message. Suspends on a full channel rather than dropping.
    pub async fn emit(&self, message: &Message) {
        if let Self::Streaming(tx) = self {
            // The reader going away is not an error for the turn.
            let _ = tx.send(message.clone()).await;
        }
    }
}
