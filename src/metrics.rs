//! Prometheus metrics for the mongosnap operator

use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::info;

lazy_static::lazy_static! {
    /// Total reconciliations
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "mongosnap_operator_reconciliations_total",
        "Total number of reconciliations",
        &["result"]
    ).unwrap();

    /// Reconciliation duration
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "mongosnap_operator_reconcile_duration_seconds",
        "Duration of reconciliations",
        &["namespace"]
    ).unwrap();

    /// Backup jobs submitted
    pub static ref BACKUP_JOBS: CounterVec = register_counter_vec!(
        "mongosnap_operator_backup_jobs_total",
        "Total number of backup jobs created",
        &["namespace"]
    ).unwrap();

    /// Operator errors
    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "mongosnap_operator_errors_total",
        "Total number of errors",
        &["type"]
    ).unwrap();
}

/// Run the metrics server
pub async fn run_metrics_server(port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await.unwrap();
    info!(port = %port, "Metrics server started");

    loop {
        if let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;

                let encoder = TextEncoder::new();
                let metric_families = prometheus::gather();
                let metrics = encoder.encode_to_string(&metric_families).unwrap_or_default();

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
                    metrics.len(),
                    metrics
                );
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    }
}

/// Count one finished reconciliation
pub fn record_reconciliation(result: &str) {
    RECONCILIATIONS.with_label_values(&[result]).inc();
}

/// Record how long a reconciliation took
pub fn observe_reconcile_duration(namespace: &str, duration_secs: f64) {
    RECONCILE_DURATION
        .with_label_values(&[namespace])
        .observe(duration_secs);
}

/// Count one submitted backup job
pub fn record_job_created(namespace: &str) {
    BACKUP_JOBS.with_label_values(&[namespace]).inc();
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
