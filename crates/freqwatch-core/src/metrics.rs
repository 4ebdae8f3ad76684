//! Process-wide Prometheus metrics for the ingestion path.
//!
//! Registered lazily in the default registry, so `prometheus::gather()`
//! picks them up once any session has touched them.

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts};

pub static SAMPLES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("freqwatch_samples_total", "Total samples observed")
        .expect("valid metric");
    prometheus::register(Box::new(c.clone())).expect("metric registered once");
    c
});

pub static NON_FINITE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "freqwatch_non_finite_total",
        "Samples whose value was NaN or infinite",
    )
    .expect("valid metric");
    prometheus::register(Box::new(c.clone())).expect("metric registered once");
    c
});

pub static ANOMALIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("freqwatch_anomalies_total", "Total anomalies detected")
        .expect("valid metric");
    prometheus::register(Box::new(c.clone())).expect("metric registered once");
    c
});

pub static SINK_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "freqwatch_sink_failures_total",
        "Anomaly records the sink failed to save",
    )
    .expect("valid metric");
    prometheus::register(Box::new(c.clone())).expect("metric registered once");
    c
});

pub static SESSIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("freqwatch_sessions_active", "Sessions currently ingesting")
        .expect("valid metric");
    prometheus::register(Box::new(g.clone())).expect("metric registered once");
    g
});

pub static SESSIONS_CLOSED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("freqwatch_sessions_closed_total", "Sessions closed, by reason"),
        &["reason"],
    )
    .expect("valid metric");
    prometheus::register(Box::new(c.clone())).expect("metric registered once");
    c
});

pub static SESSION_RESTARTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "freqwatch_session_restarts_total",
        "Sessions restarted by the supervisor",
    )
    .expect("valid metric");
    prometheus::register(Box::new(c.clone())).expect("metric registered once");
    c
});

/// Force registration so `/metrics` lists every series from startup.
pub fn init() {
    Lazy::force(&SAMPLES_TOTAL);
    Lazy::force(&NON_FINITE_TOTAL);
    Lazy::force(&ANOMALIES_TOTAL);
    Lazy::force(&SINK_FAILURES_TOTAL);
    Lazy::force(&SESSIONS_ACTIVE);
    Lazy::force(&SESSIONS_CLOSED_TOTAL);
    Lazy::force(&SESSION_RESTARTS_TOTAL);
}
