//! Ingestion Loop
//!
//! Drives one session: pull a sample, fold it into the session's running
//! statistics, classify it once the warm-up count is exceeded, and hand
//! anomalies to the sink.
//!
//! ```text
//! AwaitingSample ──▶ Observed ──▶ Classified ─┐
//!       ▲                  └────▶ Skipped ────┤
//!       └─────────────────────────────────────┘
//!  (end of stream | transport error | cancel) ──▶ Closed
//! ```
//!
//! Every sample is observed before it is classified, so the snapshot used to
//! judge a sample already contains that sample. An outlier therefore pulls the
//! baseline toward itself before it is compared against it.

use crate::classify::{ClassificationResult, classify};
use crate::config::DetectorConfig;
use crate::error::ConfigError;
use crate::metrics::{
    ANOMALIES_TOTAL, NON_FINITE_TOTAL, SAMPLES_TOTAL, SESSIONS_ACTIVE, SESSIONS_CLOSED_TOTAL,
    SINK_FAILURES_TOTAL,
};
use crate::sample::{AnomalyRecord, Sample};
use crate::sink::AnomalySink;
use crate::source::SampleStream;
use crate::stats::{StatisticsAccumulator, StatsHandle, StatsSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    AwaitingSample,
    Observed,
    Classified,
    Skipped,
    Closed,
}

/// Why a session stopped. All variants are normal terminations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CloseReason {
    /// The producer closed the stream.
    EndOfStream,
    /// The transport delivered an error.
    Transport(String),
    /// The session was cancelled from outside.
    Cancelled,
}

impl CloseReason {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::EndOfStream => "clean",
            Self::Transport(_) => "error",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// What a finished session did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub client_id: String,
    /// Session id carried by the first sample, if any arrived.
    pub session_id: Option<String>,
    pub samples: u64,
    pub classified: u64,
    pub anomalies: u64,
    pub sink_failures: u64,
    pub non_finite: u64,
    pub final_stats: StatsSnapshot,
    pub close: CloseReason,
}

/// Per-session consumer. Owns the only writer to its accumulator.
pub struct IngestionLoop {
    client_id: String,
    config: DetectorConfig,
    stats: Arc<StatisticsAccumulator>,
    sink: Arc<dyn AnomalySink>,
    cancel: CancellationToken,
    phase: SessionPhase,
    session_id: Option<String>,
    samples: u64,
    classified: u64,
    anomalies: u64,
    sink_failures: u64,
    non_finite: u64,
}

impl IngestionLoop {
    /// Validates `config` before anything is consumed.
    pub fn new(
        client_id: impl Into<String>,
        config: DetectorConfig,
        sink: Arc<dyn AnomalySink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            client_id: client_id.into(),
            config,
            stats: Arc::new(StatisticsAccumulator::new()),
            sink,
            cancel: CancellationToken::new(),
            phase: SessionPhase::AwaitingSample,
            session_id: None,
            samples: 0,
            classified: 0,
            anomalies: 0,
            sink_failures: 0,
            non_finite: 0,
        })
    }

    /// Stop at the next receive point once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Read-only view of this session's statistics for monitoring code.
    pub fn stats(&self) -> StatsHandle {
        StatsHandle::new(self.stats.clone())
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Handle one sample. Returns the classification when the sample was past
    /// the warm-up gate, `None` when it was only observed.
    pub async fn process(&mut self, sample: Sample) -> Option<ClassificationResult> {
        match &self.session_id {
            None => self.session_id = Some(sample.session_id.clone()),
            Some(id) if *id != sample.session_id => {
                warn!(
                    expected = %id,
                    got = %sample.session_id,
                    "sample from a different session on this stream"
                );
            }
            Some(_) => {}
        }

        if !sample.value.is_finite() {
            NON_FINITE_TOTAL.inc();
            self.non_finite += 1;
            warn!(session = %sample.session_id, value = sample.value, "suspect non-finite sample");
        }

        let snapshot = self.stats.observe(sample.value);
        self.phase = SessionPhase::Observed;
        self.samples += 1;
        SAMPLES_TOTAL.inc();

        debug!(
            value = sample.value,
            mean = snapshot.mean,
            std_dev = snapshot.std_dev,
            n = snapshot.n,
            "processed sample"
        );

        if snapshot.n <= self.config.warmup_count {
            self.phase = SessionPhase::Skipped;
            return None;
        }

        let result = classify(sample.value, &snapshot, self.config.k);
        self.phase = SessionPhase::Classified;
        self.classified += 1;

        if result.is_anomaly {
            self.anomalies += 1;
            ANOMALIES_TOTAL.inc();
            warn!(
                session = %sample.session_id,
                value = sample.value,
                timestamp = sample.timestamp,
                deviation = result.deviation,
                threshold = result.threshold,
                "anomaly detected"
            );

            let record = AnomalyRecord::from_sample(&sample, result.deviation);
            if let Err(e) = self.sink.save(record).await {
                self.sink_failures += 1;
                SINK_FAILURES_TOTAL.inc();
                error!(
                    session = %sample.session_id,
                    sink = self.sink.name(),
                    error = %e,
                    "failed to save anomaly"
                );
            }
        }

        Some(result)
    }

    /// Consume `stream` until it ends, fails, or the session is cancelled.
    ///
    /// Cancellation is only checked while waiting for the next sample, so a
    /// sink write started for the previous sample always completes.
    #[instrument(skip_all, fields(client = %self.client_id))]
    pub async fn run(mut self, mut stream: SampleStream) -> SessionSummary {
        SESSIONS_ACTIVE.inc();
        info!(k = self.config.k, warmup = self.config.warmup_count, "session opened");

        let close = loop {
            self.phase = SessionPhase::AwaitingSample;
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break CloseReason::Cancelled,
                item = stream.next() => item,
            };
            match item {
                Some(Ok(sample)) => {
                    self.process(sample).await;
                }
                Some(Err(e)) => break CloseReason::Transport(e.to_string()),
                None => break CloseReason::EndOfStream,
            }
        };

        self.phase = SessionPhase::Closed;
        SESSIONS_ACTIVE.dec();
        SESSIONS_CLOSED_TOTAL
            .with_label_values(&[close.label()])
            .inc();

        let summary = self.summary(close);
        if summary.close.is_error() {
            warn!(
                session = summary.session_id.as_deref().unwrap_or("-"),
                samples = summary.samples,
                anomalies = summary.anomalies,
                reason = ?summary.close,
                "session closed by transport error"
            );
        } else {
            info!(
                session = summary.session_id.as_deref().unwrap_or("-"),
                samples = summary.samples,
                anomalies = summary.anomalies,
                reason = summary.close.label(),
                "session closed"
            );
        }
        summary
    }

    fn summary(&self, close: CloseReason) -> SessionSummary {
        SessionSummary {
            client_id: self.client_id.clone(),
            session_id: self.session_id.clone(),
            samples: self.samples,
            classified: self.classified,
            anomalies: self.anomalies,
            sink_failures: self.sink_failures,
            non_finite: self.non_finite,
            final_stats: self.stats.snapshot(),
            close,
        }
    }
}
