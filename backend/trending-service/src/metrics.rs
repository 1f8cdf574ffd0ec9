//! Trend metrics for observability

use actix_web::HttpResponse;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

static METRICS: OnceLock<TrendsMetricsInner> = OnceLock::new();

struct TrendsMetricsInner {
    observations: CounterVec,
    refreshed: CounterVec,
    refresh_duration: HistogramVec,
}

impl TrendsMetricsInner {
    fn new() -> Self {
        Self {
            observations: CounterVec::new(
                Opts::new(
                    "nova_trends_observations_total",
                    "Trend usage observations by outcome",
                ),
                &["kind", "outcome"],
            )
            .expect("valid metric definition"),
            refreshed: CounterVec::new(
                Opts::new(
                    "nova_trends_refreshed_entities_total",
                    "Entities processed by trend refreshes by outcome",
                ),
                &["kind", "outcome"],
            )
            .expect("valid metric definition"),
            refresh_duration: HistogramVec::new(
                HistogramOpts::new(
                    "nova_trends_refresh_duration_seconds",
                    "Wall time of one trend refresh pass",
                )
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]),
                &["kind"],
            )
            .expect("valid metric definition"),
        }
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.observations.clone()))?;
        registry.register(Box::new(self.refreshed.clone()))?;
        registry.register(Box::new(self.refresh_duration.clone()))?;
        Ok(())
    }
}

fn get_metrics() -> &'static TrendsMetricsInner {
    METRICS.get_or_init(TrendsMetricsInner::new)
}

/// Trend metrics wrapper
#[derive(Clone, Default)]
pub struct TrendsMetrics;

impl TrendsMetrics {
    pub fn new() -> Self {
        Self
    }

    /// Register metrics with a Prometheus registry
    pub fn register(registry: &Registry) -> Result<(), prometheus::Error> {
        get_metrics().register(registry)
    }

    /// outcome: recorded | duplicate | rejected | dropped
    pub fn record_observation(&self, kind: &str, outcome: &str) {
        get_metrics()
            .observations
            .with_label_values(&[kind, outcome])
            .inc();
    }

    /// outcome: updated | skipped | failed | decayed
    pub fn record_refreshed(&self, kind: &str, outcome: &str, count: usize) {
        if count == 0 {
            return;
        }
        get_metrics()
            .refreshed
            .with_label_values(&[kind, outcome])
            .inc_by(count as f64);
    }

    pub fn record_refresh_duration(&self, kind: &str, seconds: f64) {
        get_metrics()
            .refresh_duration
            .with_label_values(&[kind])
            .observe(seconds);
    }
}

/// `/metrics` handler exposing the default Prometheus registry
pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
