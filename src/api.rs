//! Monitoring HTTP API.

use crate::supervisor::{SessionRegistry, SessionView};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use freqwatch_core::SessionSummary;
use prometheus::{Encoder, TextEncoder};
use tracing::error;

pub fn router(registry: SessionRegistry) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(metrics_handler))
        .route("/sessions", get(live_sessions))
        .route("/sessions/closed", get(closed_sessions))
        .route("/sessions/{id}", get(session))
        .with_state(registry)
}

async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!(error = %e, "metrics encoding failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

async fn live_sessions(State(registry): State<SessionRegistry>) -> Json<Vec<SessionView>> {
    Json(registry.live())
}

async fn closed_sessions(State(registry): State<SessionRegistry>) -> Json<Vec<SessionSummary>> {
    Json(registry.closed())
}

async fn session(
    State(registry): State<SessionRegistry>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, StatusCode> {
    registry.get(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use freqwatch_core::{
        CloseReason, DetectorConfig, IngestionLoop, NoopSink, Sample, StatsSnapshot,
    };
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn serve(registry: SessionRegistry) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(registry)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        freqwatch_core::metrics::init();
        let base = serve(SessionRegistry::new()).await;

        let health = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(health.status(), 200);
        assert_eq!(health.text().await.unwrap(), "OK");

        let metrics = reqwest::get(format!("{base}/metrics"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(metrics.contains("freqwatch_samples_total"));
    }

    #[tokio::test]
    async fn test_session_lookup() {
        let registry = SessionRegistry::new();
        let mut session =
            IngestionLoop::new("monitor", DetectorConfig::default(), Arc::new(NoopSink)).unwrap();
        for v in [1.0, 2.0, 3.0] {
            session.process(Sample::new("abc", v, 0)).await;
        }
        registry.register("monitor:1", "monitor", session.stats());
        let base = serve(registry.clone()).await;

        let live: Vec<serde_json::Value> = reqwest::get(format!("{base}/sessions"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0]["key"], "monitor:1");

        let one: serde_json::Value = reqwest::get(format!("{base}/sessions/monitor:1"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(one["stats"]["n"], 3);
        assert_eq!(one["stats"]["mean"], 2.0);

        let missing = reqwest::get(format!("{base}/sessions/nope")).await.unwrap();
        assert_eq!(missing.status(), 404);
    }

    #[tokio::test]
    async fn test_closed_sessions() {
        let registry = SessionRegistry::new();
        registry.close(
            "monitor:1",
            SessionSummary {
                client_id: "monitor".into(),
                session_id: Some("abc".into()),
                samples: 7,
                classified: 0,
                anomalies: 0,
                sink_failures: 0,
                non_finite: 0,
                final_stats: StatsSnapshot::default(),
                close: CloseReason::EndOfStream,
            },
        );
        let base = serve(registry).await;

        let closed: Vec<SessionSummary> = reqwest::get(format!("{base}/sessions/closed"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].samples, 7);
    }
}
