//! Session Supervisor
//!
//! Keeps a fixed number of subscriber slots busy. Each slot subscribes to the
//! sample source, runs one [`IngestionLoop`] to completion and then decides
//! whether to subscribe again according to its [`RestartPolicy`]. The core
//! treats every stream end as normal; reconnect policy lives here.

use chrono::{DateTime, Utc};
use freqwatch_core::metrics::SESSION_RESTARTS_TOTAL;
use freqwatch_core::{
    AnomalySink, CloseReason, ConfigError, DetectorConfig, IngestionLoop, SampleSource,
    SessionSummary, StatsHandle, StatsSnapshot,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const CLOSED_HISTORY: usize = 100;

#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Give up after this many restarts. `None` restarts forever.
    pub max_restarts: Option<u32>,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Subscribe again after the producer closed the stream cleanly.
    pub restart_on_clean_close: bool,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: None,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            restart_on_clean_close: true,
        }
    }
}

impl RestartPolicy {
    /// `base * 2^attempt`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Monitoring view of a running session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub key: String,
    pub client_id: String,
    pub started_at: DateTime<Utc>,
    pub stats: StatsSnapshot,
}

struct LiveSession {
    client_id: String,
    started_at: DateTime<Utc>,
    stats: StatsHandle,
}

impl LiveSession {
    fn view(&self, key: &str) -> SessionView {
        SessionView {
            key: key.to_string(),
            client_id: self.client_id.clone(),
            started_at: self.started_at,
            stats: self.stats.snapshot(),
        }
    }
}

/// Live sessions plus a short history of closed ones.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    live: Arc<RwLock<HashMap<String, LiveSession>>>,
    closed: Arc<Mutex<VecDeque<SessionSummary>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: &str, client_id: &str, stats: StatsHandle) {
        self.live.write().insert(
            key.to_string(),
            LiveSession {
                client_id: client_id.to_string(),
                started_at: Utc::now(),
                stats,
            },
        );
    }

    pub fn close(&self, key: &str, summary: SessionSummary) {
        self.live.write().remove(key);
        let mut closed = self.closed.lock();
        if closed.len() == CLOSED_HISTORY {
            closed.pop_front();
        }
        closed.push_back(summary);
    }

    pub fn live(&self) -> Vec<SessionView> {
        let mut views: Vec<_> = self
            .live
            .read()
            .iter()
            .map(|(key, session)| session.view(key))
            .collect();
        views.sort_by(|a, b| a.key.cmp(&b.key));
        views
    }

    pub fn get(&self, key: &str) -> Option<SessionView> {
        self.live.read().get(key).map(|session| session.view(key))
    }

    /// Most recently closed sessions, oldest first.
    pub fn closed(&self) -> Vec<SessionSummary> {
        self.closed.lock().iter().cloned().collect()
    }
}

/// Why a slot stopped subscribing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotExit {
    Cancelled,
    CleanClose,
    RestartLimit,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotReport {
    pub slot: usize,
    pub client_id: String,
    pub sessions: u32,
    pub restarts: u32,
    pub exit: SlotExit,
}

pub struct Supervisor {
    source: Arc<dyn SampleSource>,
    sink: Arc<dyn AnomalySink>,
    detector: DetectorConfig,
    policy: RestartPolicy,
    registry: SessionRegistry,
    cancel: CancellationToken,
}

impl Supervisor {
    /// Rejects an invalid detector configuration before any session starts.
    pub fn new(
        source: Arc<dyn SampleSource>,
        sink: Arc<dyn AnomalySink>,
        detector: DetectorConfig,
        policy: RestartPolicy,
    ) -> Result<Self, ConfigError> {
        detector.validate()?;
        Ok(Self {
            source,
            sink,
            detector,
            policy,
            registry: SessionRegistry::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn registry(&self) -> SessionRegistry {
        self.registry.clone()
    }

    /// Cancelling this token stops every slot at its next receive point.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run `slots` subscriber slots until each of them exits.
    pub async fn run(self, client_id: &str, slots: usize) -> Vec<SlotReport> {
        let this = Arc::new(self);
        let mut tasks = JoinSet::new();
        for slot in 0..slots {
            let this = this.clone();
            let client = if slots == 1 {
                client_id.to_string()
            } else {
                format!("{client_id}-{slot}")
            };
            tasks.spawn(async move { this.run_slot(slot, client).await });
        }

        let mut reports = Vec::with_capacity(slots);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!(error = %e, "supervisor slot panicked"),
            }
        }
        reports.sort_by_key(|r| r.slot);
        reports
    }

    async fn run_slot(&self, slot: usize, client_id: String) -> SlotReport {
        let mut report = SlotReport {
            slot,
            client_id: client_id.clone(),
            sessions: 0,
            restarts: 0,
            exit: SlotExit::Cancelled,
        };
        let mut attempt: u32 = 0;

        loop {
            let subscribed = tokio::select! {
                _ = self.cancel.cancelled() => return report,
                subscribed = self.source.subscribe(&client_id) => subscribed,
            };

            match subscribed {
                Err(e) => warn!(slot, client = %client_id, error = %e, "subscribe failed"),
                Ok(stream) => {
                    report.sessions += 1;
                    let session = match IngestionLoop::new(
                        client_id.as_str(),
                        self.detector,
                        self.sink.clone(),
                    ) {
                        Ok(session) => session.with_cancellation(self.cancel.child_token()),
                        Err(e) => {
                            // Validated in `Supervisor::new`.
                            error!(error = %e, "invalid detector configuration");
                            return report;
                        }
                    };

                    let key = format!("{client_id}:{}", report.sessions);
                    self.registry.register(&key, &client_id, session.stats());
                    let summary = session.run(stream).await;
                    let close = summary.close.clone();
                    let progressed = summary.samples > 0;
                    self.registry.close(&key, summary);

                    match close {
                        CloseReason::Cancelled => return report,
                        CloseReason::EndOfStream if !self.policy.restart_on_clean_close => {
                            report.exit = SlotExit::CleanClose;
                            return report;
                        }
                        _ => {}
                    }
                    if progressed {
                        attempt = 0;
                    }
                }
            }

            if self
                .policy
                .max_restarts
                .is_some_and(|max| report.restarts >= max)
            {
                warn!(slot, client = %client_id, restarts = report.restarts, "restart limit reached");
                report.exit = SlotExit::RestartLimit;
                return report;
            }

            let delay = self.policy.backoff(attempt);
            attempt = attempt.saturating_add(1);
            report.restarts += 1;
            SESSION_RESTARTS_TOTAL.inc();
            info!(slot, client = %client_id, delay_ms = delay.as_millis() as u64, "restarting session");

            tokio::select! {
                _ = self.cancel.cancelled() => return report,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RestartPolicy {
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            ..Default::default()
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(4), Duration::from_secs(1));
        assert_eq!(policy.backoff(40), Duration::from_secs(1));
    }

    #[test]
    fn test_closed_history_is_bounded() {
        let registry = SessionRegistry::new();
        for i in 0..(CLOSED_HISTORY + 5) {
            registry.close(
                "k",
                SessionSummary {
                    client_id: format!("c{i}"),
                    session_id: None,
                    samples: 0,
                    classified: 0,
                    anomalies: 0,
                    sink_failures: 0,
                    non_finite: 0,
                    final_stats: StatsSnapshot::default(),
                    close: CloseReason::EndOfStream,
                },
            );
        }
        let closed = registry.closed();
        assert_eq!(closed.len(), CLOSED_HISTORY);
        assert_eq!(closed[0].client_id, "c5");
    }
}
