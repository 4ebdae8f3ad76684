use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SENSITIVITY: f64 = 2.0;
pub const DEFAULT_WARMUP_COUNT: u64 = 50;

/// Per-session detector settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Sensitivity factor: how many standard deviations count as anomalous.
    pub k: f64,
    /// Samples observed before classification starts. A sample is classified
    /// only once the count including it exceeds this value.
    pub warmup_count: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_SENSITIVITY,
            warmup_count: DEFAULT_WARMUP_COUNT,
        }
    }
}

impl DetectorConfig {
    pub fn new(k: f64, warmup_count: u64) -> Result<Self, ConfigError> {
        let config = Self { k, warmup_count };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.k.is_finite() || self.k <= 0.0 {
            return Err(ConfigError::InvalidSensitivity(self.k));
        }
        if self.warmup_count == 0 {
            return Err(ConfigError::InvalidWarmup);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DetectorConfig::default();
        assert_eq!(config.k, 2.0);
        assert_eq!(config.warmup_count, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_sensitivity() {
        for k in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                DetectorConfig::new(k, 10),
                Err(ConfigError::InvalidSensitivity(_))
            ));
        }
    }

    #[test]
    fn test_rejects_zero_warmup() {
        assert_eq!(
            DetectorConfig::new(2.0, 0),
            Err(ConfigError::InvalidWarmup)
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DetectorConfig = serde_json::from_str(r#"{"k": 3.5}"#).unwrap();
        assert_eq!(config.k, 3.5);
        assert_eq!(config.warmup_count, DEFAULT_WARMUP_COUNT);
    }
}
