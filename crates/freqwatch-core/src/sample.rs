use serde::{Deserialize, Serialize};

/// One measurement delivered by a [`SampleSource`](crate::SampleSource).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub session_id: String,
    pub value: f64,
    /// Unix seconds (UTC) as stamped by the producer.
    pub timestamp: i64,
}

impl Sample {
    pub fn new(session_id: impl Into<String>, value: f64, timestamp: i64) -> Self {
        Self {
            session_id: session_id.into(),
            value,
            timestamp,
        }
    }
}

/// A sample that was classified as anomalous, as handed to an
/// [`AnomalySink`](crate::AnomalySink).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub session_id: String,
    pub value: f64,
    pub timestamp: i64,
    /// `|value - mean|` at classification time.
    pub deviation: f64,
}

impl AnomalyRecord {
    pub fn from_sample(sample: &Sample, deviation: f64) -> Self {
        Self {
            session_id: sample.session_id.clone(),
            value: sample.value,
            timestamp: sample.timestamp,
            deviation,
        }
    }
}
