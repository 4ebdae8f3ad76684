//! Durable anomaly log.
//!
//! Records are appended as JSON Lines to `anomalies_YYYYMMDDHH.jsonl` in the
//! configured directory, one file per UTC hour. Writes happen on a dedicated
//! thread fed by a bounded channel, so `save` never blocks the ingestion loop.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use freqwatch_core::{AnomalyRecord, AnomalySink, SinkError};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{error, info, warn};

/// One line of the anomaly log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedAnomaly {
    #[serde(flatten)]
    pub record: AnomalyRecord,
    pub detected_at: DateTime<Utc>,
}

pub struct JsonlSink {
    dir: PathBuf,
    tx: Option<Sender<String>>,
    writer: Option<thread::JoinHandle<()>>,
}

impl JsonlSink {
    pub const DEFAULT_CAPACITY: usize = 200_000;

    pub fn open(dir: impl Into<PathBuf>, capacity: usize) -> Result<Self, SinkError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| SinkError::Unavailable(format!("{}: {e}", dir.display())))?;

        let (tx, rx) = bounded::<String>(capacity.max(1));
        let writer_dir = dir.clone();
        let writer = thread::Builder::new()
            .name("freqwatch-persistence".into())
            .spawn(move || write_loop(&writer_dir, rx))
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        Ok(Self {
            dir,
            tx: Some(tx),
            writer: Some(writer),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stop accepting records, flush what is queued and wait for the writer.
    pub fn close(mut self) {
        self.shutdown();
    }

    /// [`close`](Self::close) from async code, joining the writer on the
    /// blocking pool instead of a runtime worker.
    pub async fn close_async(self) {
        if let Err(e) = tokio::task::spawn_blocking(move || self.close()).await {
            error!(error = %e, "persistence shutdown failed");
        }
    }

    fn shutdown(&mut self) {
        self.tx.take();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                error!("persistence writer panicked");
            }
        }
    }
}

impl Drop for JsonlSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl AnomalySink for JsonlSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn save(&self, record: AnomalyRecord) -> Result<(), SinkError> {
        let tx = self.tx.as_ref().ok_or(SinkError::Closed)?;
        let line = serde_json::to_string(&PersistedAnomaly {
            record,
            detected_at: Utc::now(),
        })
        .map_err(|e| SinkError::Encode(e.to_string()))?;

        match tx.try_send(line + "\n") {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SinkError::Full),
            Err(TrySendError::Disconnected(_)) => Err(SinkError::Closed),
        }
    }
}

pub fn file_name_for(at: DateTime<Utc>) -> String {
    format!("anomalies_{}.jsonl", at.format("%Y%m%d%H"))
}

fn open_append(path: &Path) -> std::io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::with_capacity(128 * 1024, file))
}

/// Append-only log that moves to a new file whenever the name changes.
struct HourlyLog {
    dir: PathBuf,
    current: String,
    buffer: BufWriter<File>,
}

impl HourlyLog {
    fn open(dir: &Path, name: String) -> std::io::Result<Self> {
        let buffer = open_append(&dir.join(&name))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            current: name,
            buffer,
        })
    }

    fn write_line(&mut self, name: String, line: &str) -> std::io::Result<()> {
        if name != self.current {
            self.rotate(name);
        }
        self.buffer.write_all(line.as_bytes())
    }

    /// On failure the current file stays active and the next record retries.
    fn rotate(&mut self, name: String) {
        if let Err(e) = self.buffer.flush() {
            warn!(file = %self.current, error = %e, "flush before rotation failed");
        }
        match open_append(&self.dir.join(&name)) {
            Ok(next) => {
                self.buffer = next;
                self.current = name;
            }
            Err(e) => {
                error!(file = %name, current = %self.current, error = %e, "cannot rotate anomaly log");
            }
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.buffer.flush() {
            warn!(file = %self.current, error = %e, "flush failed");
        }
    }
}

fn write_loop(dir: &Path, rx: Receiver<String>) {
    let name = file_name_for(Utc::now());
    let mut log = match HourlyLog::open(dir, name.clone()) {
        Ok(log) => log,
        Err(e) => {
            error!(file = %name, error = %e, "cannot open anomaly log");
            return;
        }
    };

    info!(dir = %dir.display(), "persistence writer active");

    while let Ok(line) = rx.recv() {
        if let Err(e) = log.write_line(file_name_for(Utc::now()), &line) {
            error!(file = %log.current, error = %e, "anomaly write failed");
            continue;
        }
        if rx.is_empty() {
            log.flush();
        }
    }

    log.flush();
    info!("persistence writer stopped");
}
