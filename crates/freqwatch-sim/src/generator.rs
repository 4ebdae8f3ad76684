//! Per-session value generator.
//!
//! Each session draws its own mean from `mean_range` and its own spread from
//! `std_dev_range` (unless pinned), then samples `Normal(mean, std_dev)`.
//! Optional spikes land `spike_magnitude` standard deviations away from the
//! mean on either side.

use freqwatch_core::Sample;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeneratorError {
    #[error("invalid {name} range [{low}, {high}]")]
    InvalidRange {
        name: &'static str,
        low: f64,
        high: f64,
    },
    #[error("spike probability must be within [0, 1], got {0}")]
    InvalidSpikeProbability(f64),
    #[error("invalid distribution: {0}")]
    Distribution(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Delay between samples. Zero streams as fast as the consumer reads.
    pub interval_ms: u64,
    pub mean_range: (f64, f64),
    pub std_dev_range: (f64, f64),
    /// Pin the session mean instead of drawing it.
    pub mean: Option<f64>,
    /// Pin the session standard deviation instead of drawing it.
    pub std_dev: Option<f64>,
    pub spike_probability: f64,
    /// Spike distance from the mean, in standard deviations.
    pub spike_magnitude: f64,
    /// Close the stream cleanly after this many samples.
    pub max_samples: Option<u64>,
    /// Fail the stream with a transport error after this many samples.
    pub fail_after: Option<u64>,
    /// Seed for reproducible sessions. Subscription `i` uses `seed + i`.
    pub seed: Option<u64>,
    pub channel_capacity: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            mean_range: (-10.0, 10.0),
            std_dev_range: (0.3, 1.5),
            mean: None,
            std_dev: None,
            spike_probability: 0.0,
            spike_magnitude: 8.0,
            max_samples: None,
            fail_after: None,
            seed: None,
            channel_capacity: 64,
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<(), GeneratorError> {
        check_range("mean", self.mean_range, f64::NEG_INFINITY)?;
        check_range("std_dev", self.std_dev_range, 0.0)?;
        if !(0.0..=1.0).contains(&self.spike_probability) {
            return Err(GeneratorError::InvalidSpikeProbability(
                self.spike_probability,
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn check_range(name: &'static str, (low, high): (f64, f64), floor: f64) -> Result<(), GeneratorError> {
    if !low.is_finite() || !high.is_finite() || low > high || low < floor {
        return Err(GeneratorError::InvalidRange { name, low, high });
    }
    Ok(())
}

/// Value source for one session.
pub struct SessionGenerator {
    session_id: String,
    mean: f64,
    std_dev: f64,
    dist: Normal<f64>,
    spike_probability: f64,
    spike_magnitude: f64,
    rng: StdRng,
    emitted: u64,
}

impl SessionGenerator {
    pub fn new(config: &GeneratorConfig, mut rng: StdRng) -> Result<Self, GeneratorError> {
        config.validate()?;

        let session_id = uuid::Builder::from_random_bytes(rng.random())
            .into_uuid()
            .to_string();
        let mean = match config.mean {
            Some(m) => m,
            None => rng.random_range(config.mean_range.0..=config.mean_range.1),
        };
        let std_dev = match config.std_dev {
            Some(s) => s,
            None => rng.random_range(config.std_dev_range.0..=config.std_dev_range.1),
        };
        let dist =
            Normal::new(mean, std_dev).map_err(|e| GeneratorError::Distribution(e.to_string()))?;

        Ok(Self {
            session_id,
            mean,
            std_dev,
            dist,
            spike_probability: config.spike_probability,
            spike_magnitude: config.spike_magnitude,
            rng,
            emitted: 0,
        })
    }

    pub fn seeded(config: &GeneratorConfig, seed: u64) -> Result<Self, GeneratorError> {
        Self::new(config, StdRng::seed_from_u64(seed))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std_dev(&self) -> f64 {
        self.std_dev
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn next_value(&mut self) -> f64 {
        self.emitted += 1;
        if self.spike_probability > 0.0 && self.rng.random_bool(self.spike_probability) {
            let sign = if self.rng.random_bool(0.5) { 1.0 } else { -1.0 };
            return self.mean + sign * self.spike_magnitude * self.std_dev;
        }
        self.dist.sample(&mut self.rng)
    }

    pub fn next_sample(&mut self, timestamp: i64) -> Sample {
        let value = self.next_value();
        Sample::new(self.session_id.clone(), value, timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ranges() {
        for seed in 0..50 {
            let generator = SessionGenerator::seeded(&GeneratorConfig::default(), seed).unwrap();
            assert!((-10.0..=10.0).contains(&generator.mean()));
            assert!((0.3..=1.5).contains(&generator.std_dev()));
        }
    }

    #[test]
    fn test_same_seed_same_session() {
        let config = GeneratorConfig::default();
        let mut a = SessionGenerator::seeded(&config, 99).unwrap();
        let mut b = SessionGenerator::seeded(&config, 99).unwrap();
        assert_eq!(a.session_id(), b.session_id());
        for _ in 0..100 {
            assert_eq!(a.next_value(), b.next_value());
        }
        assert_eq!(a.emitted(), 100);
    }

    #[test]
    fn test_values_follow_session_parameters() {
        let config = GeneratorConfig {
            mean: Some(4.0),
            std_dev: Some(0.5),
            ..Default::default()
        };
        let mut generator = SessionGenerator::seeded(&config, 1).unwrap();
        let values: Vec<f64> = (0..20_000).map(|_| generator.next_value()).collect();
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
        assert!((mean - 4.0).abs() < 0.02);
        assert!((var.sqrt() - 0.5).abs() < 0.02);
    }

    #[test]
    fn test_spikes() {
        let config = GeneratorConfig {
            mean: Some(0.0),
            std_dev: Some(1.0),
            spike_probability: 1.0,
            spike_magnitude: 10.0,
            ..Default::default()
        };
        let mut generator = SessionGenerator::seeded(&config, 3).unwrap();
        for _ in 0..20 {
            assert_eq!(generator.next_value().abs(), 10.0);
        }
    }

    #[test]
    fn test_sample_carries_session() {
        let mut generator = SessionGenerator::seeded(&GeneratorConfig::default(), 5).unwrap();
        let sample = generator.next_sample(1_700_000_000);
        assert_eq!(sample.session_id, generator.session_id());
        assert_eq!(sample.timestamp, 1_700_000_000);
        assert!(uuid::Uuid::parse_str(&sample.session_id).is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let config = GeneratorConfig {
            std_dev_range: (-1.0, 1.0),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(GeneratorError::InvalidRange { name: "std_dev", .. })
        ));

        let config = GeneratorConfig {
            spike_probability: 1.5,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(GeneratorError::InvalidSpikeProbability(1.5))
        );

        let config = GeneratorConfig {
            std_dev: Some(f64::NAN),
            ..Default::default()
        };
        assert!(matches!(
            SessionGenerator::seeded(&config, 0),
            Err(GeneratorError::Distribution(_))
        ));
    }

    #[test]
    fn test_config_from_json() {
        let config: GeneratorConfig =
            serde_json::from_str(r#"{"interval_ms": 0, "spike_probability": 0.01}"#).unwrap();
        assert_eq!(config.interval(), Duration::ZERO);
        assert_eq!(config.spike_probability, 0.01);
        assert_eq!(config.mean_range, (-10.0, 10.0));
    }
}
