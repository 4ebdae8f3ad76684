//! HTTP anomaly forwarding.
//!
//! `save` only enqueues. A background worker owns the HTTP client and posts
//! each record as JSON to a remote collector. Transport errors, `429` and
//! `5xx` responses are retried with exponential backoff; other non-success
//! statuses are treated as a rejection and not retried.

use async_trait::async_trait;
use freqwatch_core::{AnomalyRecord, AnomalySink, SinkError};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use prometheus::IntCounter;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub static FORWARDED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("freqwatch_forwarded_total", "Anomalies accepted by the collector")
        .expect("valid metric");
    prometheus::register(Box::new(c.clone())).expect("metric registered once");
    c
});

pub static FORWARD_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "freqwatch_forward_failures_total",
        "Anomalies dropped after the collector rejected them or retries ran out",
    )
    .expect("valid metric");
    prometheus::register(Box::new(c.clone())).expect("metric registered once");
    c
});

#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub url: String,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub timeout_ms: u64,
    pub channel_capacity: usize,
}

impl ForwarderConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_retries: 3,
            retry_base_delay_ms: 100,
            timeout_ms: 5000,
            channel_capacity: 10_000,
        }
    }
}

/// Must be created inside a Tokio runtime; the worker is spawned on it.
pub struct HttpSink {
    url: String,
    tx: mpsc::Sender<AnomalyRecord>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HttpSink {
    pub fn new(config: ForwarderConfig) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        Lazy::force(&FORWARDED_TOTAL);
        Lazy::force(&FORWARD_FAILURES_TOTAL);

        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let cancel = CancellationToken::new();
        let url = config.url.clone();
        let worker = tokio::spawn(forward_loop(rx, client, config, cancel.clone()));

        Ok(Self {
            url,
            tx,
            cancel,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Stop accepting records and wait until everything queued was delivered
    /// or given up on.
    pub async fn close(&self) {
        self.cancel.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "forwarder worker panicked");
            }
        }
    }
}

impl Drop for HttpSink {
    fn drop(&mut self) {
        // The worker drains what is queued once every sender is gone.
        self.cancel.cancel();
    }
}

#[async_trait]
impl AnomalySink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn save(&self, record: AnomalyRecord) -> Result<(), SinkError> {
        match self.tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SinkError::Full),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SinkError::Closed),
        }
    }
}

async fn forward_loop(
    mut rx: mpsc::Receiver<AnomalyRecord>,
    client: reqwest::Client,
    config: ForwarderConfig,
    cancel: CancellationToken,
) {
    info!(url = %config.url, "anomaly forwarder started");

    loop {
        let record = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            record = rx.recv() => match record {
                Some(record) => record,
                None => break,
            },
        };
        deliver(&client, &config, record).await;
    }

    rx.close();
    while let Some(record) = rx.recv().await {
        deliver(&client, &config, record).await;
    }
    info!("anomaly forwarder stopped");
}

async fn deliver(client: &reqwest::Client, config: &ForwarderConfig, record: AnomalyRecord) {
    match post_with_retries(client, config, &record).await {
        Ok(()) => {
            FORWARDED_TOTAL.inc();
            debug!(session = %record.session_id, "forwarded anomaly");
        }
        Err(e) => {
            FORWARD_FAILURES_TOTAL.inc();
            error!(session = %record.session_id, error = %e, "dropped anomaly");
        }
    }
}

fn retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

async fn post_with_retries(
    client: &reqwest::Client,
    config: &ForwarderConfig,
    record: &AnomalyRecord,
) -> Result<(), SinkError> {
    let mut last_error = String::new();

    for attempt in 0..=config.max_retries {
        match client.post(&config.url).json(record).send().await {
            Ok(response) if response.status().is_success() => return Ok(()),
            Ok(response) if !retryable(response.status()) => {
                return Err(SinkError::Rejected(response.status().to_string()));
            }
            Ok(response) => {
                warn!(attempt, status = %response.status(), "collector returned error");
                last_error = response.status().to_string();
            }
            Err(e) => {
                warn!(attempt, error = %e, "failed to forward anomaly");
                last_error = e.to_string();
            }
        }

        if attempt < config.max_retries {
            let delay = config.retry_base_delay_ms << attempt.min(16);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    Err(SinkError::Unavailable(last_error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode as AxumStatus, routing::post};
    use freqwatch_core::{DetectorConfig, IngestionLoop, Sample};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tokio::net::TcpListener;

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn stalled_collector() -> Router {
        Router::new().route(
            "/anomalies",
            post(|| async { std::future::pending::<AxumStatus>().await }),
        )
    }

    fn record() -> AnomalyRecord {
        AnomalyRecord {
            session_id: "s-1".into(),
            value: 42.0,
            timestamp: 1_700_000_000,
            deviation: 40.0,
        }
    }

    fn fast(url: String) -> ForwarderConfig {
        ForwarderConfig {
            retry_base_delay_ms: 1,
            timeout_ms: 2000,
            ..ForwarderConfig::new(url)
        }
    }

    #[tokio::test]
    async fn test_posts_record() {
        let received = Arc::new(Mutex::new(Vec::<AnomalyRecord>::new()));
        let store = received.clone();
        let app = Router::new().route(
            "/anomalies",
            post(move |Json(r): Json<AnomalyRecord>| {
                let store = store.clone();
                async move {
                    store.lock().push(r);
                    AxumStatus::CREATED
                }
            }),
        );
        let base = serve(app).await;

        let sink = HttpSink::new(fast(format!("{base}/anomalies"))).unwrap();
        sink.save(record()).await.unwrap();
        sink.close().await;

        assert_eq!(received.lock().as_slice(), &[record()]);
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let app = Router::new().route(
            "/anomalies",
            post(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        AxumStatus::SERVICE_UNAVAILABLE
                    } else {
                        AxumStatus::OK
                    }
                }
            }),
        );
        let base = serve(app).await;

        let sink = HttpSink::new(fast(format!("{base}/anomalies"))).unwrap();
        sink.save(record()).await.unwrap();
        sink.close().await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let app = Router::new().route(
            "/anomalies",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    AxumStatus::BAD_REQUEST
                }
            }),
        );
        let base = serve(app).await;

        let sink = HttpSink::new(fast(format!("{base}/anomalies"))).unwrap();
        sink.save(record()).await.unwrap();
        sink.close().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_collector_counts_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ForwarderConfig {
            max_retries: 1,
            ..fast(format!("http://{addr}/anomalies"))
        };
        let sink = HttpSink::new(config).unwrap();
        let before = FORWARD_FAILURES_TOTAL.get();
        sink.save(record()).await.unwrap();
        sink.close().await;
        assert!(FORWARD_FAILURES_TOTAL.get() > before);
    }

    #[tokio::test]
    async fn test_save_after_close_is_rejected() {
        let base = serve(stalled_collector()).await;
        let sink = HttpSink::new(fast(format!("{base}/anomalies"))).unwrap();
        sink.close().await;
        assert_eq!(sink.save(record()).await, Err(SinkError::Closed));
    }

    #[tokio::test]
    async fn test_save_does_not_wait_for_stalled_collector() {
        let base = serve(stalled_collector()).await;
        let sink = HttpSink::new(ForwarderConfig::new(format!("{base}/anomalies"))).unwrap();

        let start = Instant::now();
        for _ in 0..5 {
            sink.save(record()).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_full_queue_is_reported() {
        let base = serve(stalled_collector()).await;
        let config = ForwarderConfig {
            channel_capacity: 1,
            ..ForwarderConfig::new(format!("{base}/anomalies"))
        };
        let sink = HttpSink::new(config).unwrap();

        let mut results = Vec::new();
        for _ in 0..3 {
            results.push(sink.save(record()).await);
        }
        assert!(results.contains(&Err(SinkError::Full)));
    }

    #[tokio::test]
    async fn test_failing_collector_does_not_stall_ingestion() {
        let app = Router::new().route(
            "/anomalies",
            post(|| async { AxumStatus::SERVICE_UNAVAILABLE }),
        );
        let base = serve(app).await;
        let sink = Arc::new(HttpSink::new(ForwarderConfig::new(format!("{base}/anomalies"))).unwrap());
        let mut session =
            IngestionLoop::new("forwarding", DetectorConfig::new(2.0, 20).unwrap(), sink).unwrap();

        for i in 0..20 {
            session.process(Sample::new("s-1", (i % 2) as f64, i)).await;
        }

        let start = Instant::now();
        let result = session.process(Sample::new("s-1", 100.0, 20)).await.unwrap();
        session.process(Sample::new("s-1", 0.0, 21)).await;
        assert!(result.is_anomaly);
        assert!(start.elapsed() < Duration::from_millis(300));
    }
}
