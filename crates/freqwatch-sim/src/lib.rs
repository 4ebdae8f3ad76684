//! # freqwatch-sim - synthetic sample producer
//!
//! Stands in for the remote transmitter: every subscription opens a new
//! session with its own UUID, draws a session mean and spread, and streams
//! normally distributed values at a fixed interval until the subscriber goes
//! away.
//!
//! ```rust,no_run
//! use freqwatch_core::SampleSource;
//! use freqwatch_sim::{GeneratorConfig, SyntheticSource};
//!
//! # async fn demo() {
//! let source = SyntheticSource::new(GeneratorConfig::default()).unwrap();
//! let mut stream = source.subscribe("anomaly-detector").await.unwrap();
//! while let Some(Ok(sample)) = stream.next().await {
//!     println!("{} {}", sample.session_id, sample.value);
//! }
//! # }
//! ```

pub mod generator;
pub mod source;

pub use generator::{GeneratorConfig, GeneratorError, SessionGenerator};
pub use source::SyntheticSource;
