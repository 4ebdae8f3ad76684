//! freqwatch-core: online z-score anomaly detection over scalar sample streams.
//!
//! One session is one stream of [`Sample`]s. Each session owns a
//! [`StatisticsAccumulator`] (Welford running mean/variance), classifies every
//! sample past the warm-up count with [`classify`], and hands positive results
//! to an [`AnomalySink`].
//!
//! ```text
//! SampleSource ──▶ IngestionLoop ──▶ StatisticsAccumulator::observe
//!                       │                      │
//!                       │        snapshot ◀────┘
//!                       ▼
//!                    classify ──(anomaly)──▶ AnomalySink::save
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod metrics;
pub mod sample;
pub mod session;
pub mod sink;
pub mod source;
pub mod stats;

pub use classify::{ClassificationResult, classify};
pub use config::DetectorConfig;
pub use error::{ConfigError, SinkError, TransportError};
pub use sample::{AnomalyRecord, Sample};
pub use session::{CloseReason, IngestionLoop, SessionPhase, SessionSummary};
pub use sink::{AnomalySink, FanoutSink, MemorySink, NoopSink};
pub use source::{ChannelSource, SampleSource, SampleStream};
pub use stats::{AccumulatorState, StatisticsAccumulator, StatsHandle, StatsSnapshot};
