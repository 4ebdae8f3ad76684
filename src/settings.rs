//! Command-line and file configuration for the `freqwatch` service.
//!
//! Precedence: flags and `FREQWATCH_*` environment variables override the
//! JSON config file, which overrides built-in defaults.

use crate::supervisor::RestartPolicy;
use clap::Parser;
use freqwatch_core::{ConfigError, DetectorConfig};
use freqwatch_sim::{GeneratorConfig, GeneratorError};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Parser)]
#[command(name = "freqwatch")]
#[command(about = "Online z-score anomaly detection over streamed samples")]
pub struct Cli {
    /// JSON file with `detector` and `generator` sections
    #[arg(long, env = "FREQWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Sensitivity: standard deviations from the mean before a value is anomalous
    #[arg(short, long, env = "FREQWATCH_K")]
    pub k: Option<f64>,

    /// Samples a session must see before classification starts
    #[arg(short, long, env = "FREQWATCH_WARMUP")]
    pub warmup: Option<u64>,

    /// Concurrent subscriber slots
    #[arg(short, long, env = "FREQWATCH_SESSIONS", default_value = "1")]
    pub sessions: usize,

    /// Delay between generated samples in milliseconds
    #[arg(long, env = "FREQWATCH_INTERVAL_MS")]
    pub interval_ms: Option<u64>,

    /// Probability that a generated sample is a spike
    #[arg(long, env = "FREQWATCH_SPIKE_PROBABILITY")]
    pub spike_probability: Option<f64>,

    /// Monitoring API address
    #[arg(long, env = "FREQWATCH_LISTEN", default_value = "127.0.0.1:9090")]
    pub listen: SocketAddr,

    /// Write anomalies as JSON Lines into this directory
    #[arg(long, env = "FREQWATCH_ANOMALY_DIR")]
    pub anomaly_dir: Option<PathBuf>,

    /// POST anomalies to this collector URL
    #[arg(long, env = "FREQWATCH_FORWARD_URL")]
    pub forward_url: Option<String>,

    /// Give up on a slot after this many restarts
    #[arg(long, env = "FREQWATCH_MAX_RESTARTS")]
    pub max_restarts: Option<u32>,

    /// Base restart backoff in milliseconds
    #[arg(long, env = "FREQWATCH_BACKOFF_MS", default_value = "500")]
    pub backoff_ms: u64,

    #[arg(long, env = "FREQWATCH_CLIENT_ID", default_value = "anomaly-detector")]
    pub client_id: String,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Detector(#[from] ConfigError),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error("at least one session slot is required")]
    InvalidSessions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    detector: DetectorConfig,
    generator: GeneratorConfig,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub detector: DetectorConfig,
    pub generator: GeneratorConfig,
    pub restart: RestartPolicy,
    pub sessions: usize,
    pub client_id: String,
    pub listen: SocketAddr,
    pub anomaly_dir: Option<PathBuf>,
    pub forward_url: Option<String>,
}

impl Settings {
    pub fn from_cli(cli: Cli) -> Result<Self, SettingsError> {
        let file = match &cli.config {
            Some(path) => load_file(path)?,
            None => FileSettings::default(),
        };

        let mut detector = file.detector;
        if let Some(k) = cli.k {
            detector.k = k;
        }
        if let Some(warmup) = cli.warmup {
            detector.warmup_count = warmup;
        }
        detector.validate()?;

        let mut generator = file.generator;
        if let Some(interval_ms) = cli.interval_ms {
            generator.interval_ms = interval_ms;
        }
        if let Some(p) = cli.spike_probability {
            generator.spike_probability = p;
        }
        generator.validate()?;

        if cli.sessions == 0 {
            return Err(SettingsError::InvalidSessions);
        }

        let restart = RestartPolicy {
            max_restarts: cli.max_restarts,
            base_backoff: Duration::from_millis(cli.backoff_ms),
            ..Default::default()
        };

        Ok(Self {
            detector,
            generator,
            restart,
            sessions: cli.sessions,
            client_id: cli.client_id,
            listen: cli.listen,
            anomaly_dir: cli.anomaly_dir,
            forward_url: cli.forward_url,
        })
    }
}

fn load_file(path: &Path) -> Result<FileSettings, SettingsError> {
    let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
