use anyhow::Context;
use clap::Parser;
use freqwatch::{Cli, ForwarderConfig, HttpSink, JsonlSink, Settings, Supervisor, api};
use freqwatch_core::{AnomalySink, FanoutSink, NoopSink, metrics};
use freqwatch_sim::SyntheticSource;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// The combined sink handed to sessions plus typed handles for shutdown.
struct Sinks {
    sink: Arc<dyn AnomalySink>,
    jsonl: Option<Arc<JsonlSink>>,
    http: Option<Arc<HttpSink>>,
}

impl Sinks {
    fn build(settings: &Settings) -> anyhow::Result<Self> {
        let mut sinks: Vec<Arc<dyn AnomalySink>> = Vec::new();

        let jsonl = match &settings.anomaly_dir {
            Some(dir) => {
                let sink = JsonlSink::open(dir, JsonlSink::DEFAULT_CAPACITY)
                    .with_context(|| format!("opening anomaly log in {}", dir.display()))?;
                let sink = Arc::new(sink);
                sinks.push(sink.clone());
                Some(sink)
            }
            None => None,
        };
        let http = match &settings.forward_url {
            Some(url) => {
                let sink = HttpSink::new(ForwarderConfig::new(url.clone()))
                    .context("building anomaly forwarder")?;
                let sink = Arc::new(sink);
                sinks.push(sink.clone());
                Some(sink)
            }
            None => None,
        };

        let sink: Arc<dyn AnomalySink> = match sinks.len() {
            0 => Arc::new(NoopSink),
            1 => sinks.remove(0),
            _ => Arc::new(FanoutSink::new(sinks)),
        };
        Ok(Self { sink, jsonl, http })
    }

    /// Drain both queues. Call once the sessions holding `sink` are gone.
    async fn close(self) {
        drop(self.sink);
        if let Some(http) = self.http {
            http.close().await;
        }
        if let Some(jsonl) = self.jsonl {
            match Arc::try_unwrap(jsonl) {
                Ok(jsonl) => jsonl.close_async().await,
                Err(_) => warn!("anomaly log still in use at shutdown"),
            }
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "cannot listen for ctrl-c");
                cancel.cancelled().await;
            }
            info!("shutting down, letting in-flight anomalies finish");
        }
        _ = cancel.cancelled() => info!("all sessions stopped"),
    }
    cancel.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_cli(Cli::parse())?;
    metrics::init();

    let sinks = Sinks::build(&settings)?;
    let source = Arc::new(SyntheticSource::new(settings.generator.clone())?);
    let supervisor = Supervisor::new(
        source,
        sinks.sink.clone(),
        settings.detector,
        settings.restart.clone(),
    )?;
    let registry = supervisor.registry();
    let cancel = supervisor.cancellation();

    info!(
        k = settings.detector.k,
        warmup = settings.detector.warmup_count,
        sessions = settings.sessions,
        "starting freqwatch"
    );

    let client_id = settings.client_id.clone();
    let slots = settings.sessions;
    let done = cancel.clone();
    let sessions = tokio::spawn(async move {
        let reports = supervisor.run(&client_id, slots).await;
        done.cancel();
        reports
    });

    let listener = TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("binding {}", settings.listen))?;
    info!(addr = %settings.listen, "monitoring api listening");

    axum::serve(listener, api::router(registry))
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .context("monitoring api failed")?;

    cancel.cancel();
    for report in sessions.await.context("supervisor task failed")? {
        info!(
            slot = report.slot,
            client = %report.client_id,
            sessions = report.sessions,
            restarts = report.restarts,
            exit = ?report.exit,
            "slot finished"
        );
    }
    sinks.close().await;
    info!("anomaly sinks drained");
    Ok(())
}
