//! Anomaly sinks: where flagged samples go.
//!
//! The ingestion loop depends only on [`AnomalySink`]. Durable sinks live in
//! the service crate; this module carries the in-memory, no-op and fan-out
//! implementations.

use crate::error::SinkError;
use crate::sample::AnomalyRecord;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// Destination for anomaly records. Shared across sessions, so
/// implementations must accept concurrent `save` calls.
#[async_trait]
pub trait AnomalySink: Send + Sync {
    fn name(&self) -> &str;

    async fn save(&self, record: AnomalyRecord) -> Result<(), SinkError>;
}

#[async_trait]
impl<S: AnomalySink + ?Sized> AnomalySink for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn save(&self, record: AnomalyRecord) -> Result<(), SinkError> {
        (**self).save(record).await
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<AnomalyRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AnomalyRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl AnomalySink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save(&self, record: AnomalyRecord) -> Result<(), SinkError> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// Accepts and discards.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl AnomalySink for NoopSink {
    fn name(&self) -> &str {
        "noop"
    }

    async fn save(&self, _record: AnomalyRecord) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes every record to all inner sinks.
///
/// All sinks are attempted even when an earlier one fails; the first error is
/// returned.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AnomalySink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn AnomalySink>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl AnomalySink for FanoutSink {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn save(&self, record: AnomalyRecord) -> Result<(), SinkError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.save(record.clone()).await {
                tracing::debug!(sink = sink.name(), error = %e, "fan-out member failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFull;

    #[async_trait]
    impl AnomalySink for AlwaysFull {
        fn name(&self) -> &str {
            "full"
        }

        async fn save(&self, _record: AnomalyRecord) -> Result<(), SinkError> {
            Err(SinkError::Full)
        }
    }

    fn record(value: f64) -> AnomalyRecord {
        AnomalyRecord {
            session_id: "s".into(),
            value,
            timestamp: 1,
            deviation: value,
        }
    }

    #[tokio::test]
    async fn test_memory_sink_keeps_order() {
        let sink = MemorySink::new();
        sink.save(record(1.0)).await.unwrap();
        sink.save(record(2.0)).await.unwrap();
        let values: Vec<f64> = sink.records().iter().map(|r| r.value).collect();
        assert_eq!(values, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_fanout_attempts_every_sink() {
        let first = Arc::new(MemorySink::new());
        let last = Arc::new(MemorySink::new());
        let fanout = FanoutSink::new(vec![
            first.clone() as Arc<dyn AnomalySink>,
            Arc::new(AlwaysFull),
            last.clone(),
        ]);

        let result = fanout.save(record(9.0)).await;

        assert_eq!(result, Err(SinkError::Full));
        assert_eq!(first.len(), 1);
        assert_eq!(last.len(), 1);
    }

    #[tokio::test]
    async fn test_shared_memory_sink_from_many_tasks() {
        let sink = Arc::new(MemorySink::new());
        let mut tasks = Vec::new();
        for i in 0..16 {
            let sink = sink.clone();
            tasks.push(tokio::spawn(async move {
                for j in 0..50 {
                    sink.save(record((i * 50 + j) as f64)).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(sink.len(), 800);
    }
}
