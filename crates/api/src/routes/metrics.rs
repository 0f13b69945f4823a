//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Installs the global Prometheus recorder and registers metric descriptions.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe();
    Ok(handle)
}

fn describe() {
    metrics::describe_counter!("cart_mutations_total", "Cart writes, by store mode and kind");
    metrics::describe_counter!("cart_merges_total", "Login-time cart merges, by status");
    metrics::describe_counter!("checkout_started_total", "Checkout sessions started");
    metrics::describe_counter!("checkout_committed_total", "Checkout sessions committed");
    metrics::describe_counter!(
        "checkout_failed_total",
        "Checkout sessions failed, by error class"
    );
    metrics::describe_counter!(
        "checkout_escalations_total",
        "Sessions flagged for manual reconciliation, by error class"
    );
    metrics::describe_counter!("checkout_abandoned_total", "Checkout sessions abandoned");
    metrics::describe_counter!(
        "checkout_reconciliations_total",
        "Reconciliation attempts on escalated sessions"
    );
    metrics::describe_counter!("checkout_retries_total", "Retried external calls");
    metrics::describe_histogram!(
        "checkout_duration_seconds",
        "Time from session start to commit"
    );
}

/// GET /metrics: returns Prometheus-formatted metrics.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}
