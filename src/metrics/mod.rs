use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for sync duration (seconds).
const SYNC_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`,
/// `gauge!`, `histogram!`) can be used anywhere in the codebase. The
/// `PrometheusHandle` is retained solely for rendering the `/metrics`
/// endpoint.
///
/// The counter names are an external contract shared with the routers'
/// dashboards; do not rename them.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric
    /// descriptions. Must be called once at startup.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Full(
                    "RouteEmitterSyncDuration".to_string(),
                ),
                SYNC_DURATION_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        describe_counter!(
            "RoutesRegistered",
            Unit::Count,
            "Route registrations published to the routers"
        );
        describe_counter!(
            "RoutesUnregistered",
            Unit::Count,
            "Route unregistrations published to the routers"
        );
        describe_gauge!(
            "RoutesTotal",
            Unit::Count,
            "Routes currently held in the routing table"
        );
        describe_counter!(
            "RoutesSynced",
            Unit::Count,
            "Heartbeat emissions of the full routing table"
        );
        describe_histogram!(
            "RouteEmitterSyncDuration",
            Unit::Seconds,
            "Duration of one snapshot reconciliation"
        );

        Self { handle }
    }

    /// Render the current metrics in Prometheus exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
