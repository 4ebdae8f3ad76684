//! Sample delivery boundary.
//!
//! A [`SampleSource`] hands out one [`SampleStream`] per subscription. The
//! stream ends either cleanly (sender dropped) or with a [`TransportError`]
//! item; the ingestion loop treats both as the end of the session.

use crate::error::TransportError;
use crate::sample::Sample;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::mpsc;

pub type SampleItem = Result<Sample, TransportError>;
pub type SampleSender = mpsc::Sender<SampleItem>;

/// Ordered, push-based stream of samples for a single session.
#[derive(Debug)]
pub struct SampleStream {
    rx: mpsc::Receiver<SampleItem>,
}

impl SampleStream {
    pub fn new(rx: mpsc::Receiver<SampleItem>) -> Self {
        Self { rx }
    }

    /// Bounded stream plus the sender that feeds it.
    pub fn channel(capacity: usize) -> (SampleSender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(rx))
    }

    /// A finished stream carrying `items`, closed after the last one.
    pub fn from_items(items: impl IntoIterator<Item = SampleItem>) -> Self {
        let items: Vec<_> = items.into_iter().collect();
        let (tx, stream) = Self::channel(items.len());
        for item in items {
            // Capacity equals the item count, so this cannot be full.
            let _ = tx.try_send(item);
        }
        stream
    }

    pub fn from_samples(samples: impl IntoIterator<Item = Sample>) -> Self {
        Self::from_items(samples.into_iter().map(Ok))
    }

    /// Waits for the next item. `None` means the producer closed the stream.
    pub async fn next(&mut self) -> Option<SampleItem> {
        self.rx.recv().await
    }
}

/// Subscribe-style producer of sample streams.
#[async_trait]
pub trait SampleSource: Send + Sync {
    async fn subscribe(&self, client_id: &str) -> Result<SampleStream, TransportError>;
}

/// Source that replays pre-built streams in order, one per subscription.
/// Fails to subscribe once it runs out.
#[derive(Debug, Default)]
pub struct ChannelSource {
    streams: Mutex<VecDeque<SampleStream>>,
}

impl ChannelSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, stream: SampleStream) {
        self.streams.lock().push_back(stream);
    }

    pub fn remaining(&self) -> usize {
        self.streams.lock().len()
    }
}

#[async_trait]
impl SampleSource for ChannelSource {
    async fn subscribe(&self, client_id: &str) -> Result<SampleStream, TransportError> {
        self.streams
            .lock()
            .pop_front()
            .ok_or_else(|| TransportError::Subscribe(format!("no stream left for {client_id}")))
    }
}
