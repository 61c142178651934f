use std::net::SocketAddr;
use tracing::{info, warn};

/// Install the Prometheus exporter when `MP_METRICS_PORT` is set. Without it
/// the `metrics` macros are no-ops.
pub fn init_metrics() {
    let port: u16 = match std::env::var("MP_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
    {
        Some(port) => port,
        None => return,
    };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => {
            info!("Prometheus exporter listening on http://{}/metrics", addr);
        }
        Err(e) => {
            warn!("Prometheus exporter install failed (possibly already installed): {}", e);
        }
    }
}

pub mod names {
    pub const QUERIES_TOTAL: &str = "mp_queries_total";
    pub const QUERY_ERRORS_TOTAL: &str = "mp_query_errors_total";
    pub const QUERY_DURATION_SECONDS: &str = "mp_query_duration_seconds";
    pub const RECORDS_NORMALIZED_TOTAL: &str = "mp_records_normalized_total";
    pub const FIELD_DEGRADED_TOTAL: &str = "mp_field_degraded_total";
    pub const ROWS_INSERTED_TOTAL: &str = "mp_rows_inserted_total";
    pub const ROWS_UPDATED_TOTAL: &str = "mp_rows_updated_total";
    pub const ROWS_FAILED_TOTAL: &str = "mp_rows_failed_total";
    pub const ROWS_SKIPPED_TOTAL: &str = "mp_rows_skipped_total";
}
