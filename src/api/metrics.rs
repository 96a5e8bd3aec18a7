//! Prometheus metrics endpoint and HTTP request tracking middleware.
//!
//! This module provides:
//! - A `/metrics` endpoint that returns Prometheus-formatted metrics
//! - Middleware for tracking HTTP request counts and durations
//! - Helper functions to record notification and authorization events

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;

use crate::db::Channel;
use crate::AppState;

// Metric names as constants for consistency
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const CHANNEL_CONFIGS_SAVED_TOTAL: &str = "notification_channel_configs_saved_total";
pub const RBAC_DENIALS_TOTAL: &str = "rbac_denials_total";
pub const NOTIFICATION_SETTINGS_TOTAL: &str = "notification_settings_total";
pub const CHANNEL_CONFIGS_TOTAL: &str = "notification_channel_configs_total";

/// Initialize the Prometheus metrics recorder and return a handle for rendering metrics.
///
/// This should be called once during application startup.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    // Register metric descriptions
    describe_counter!(
        HTTP_REQUESTS_TOTAL,
        "Total number of HTTP requests received"
    );
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(
        CHANNEL_CONFIGS_SAVED_TOTAL,
        "Channel configs created or edited, by channel"
    );
    describe_counter!(RBAC_DENIALS_TOTAL, "Requests rejected by the policy engine");
    describe_gauge!(NOTIFICATION_SETTINGS_TOTAL, "Number of notification settings");
    describe_gauge!(CHANNEL_CONFIGS_TOTAL, "Number of live channel configs, by channel");

    Ok(handle)
}

/// GET /metrics - Returns Prometheus-formatted metrics.
///
/// This endpoint is accessible without authentication.
pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    update_gauge_metrics(&state).await;

    match state.metrics_handle.as_ref() {
        Some(h) => (StatusCode::OK, h.render()),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Metrics not initialized".to_string(),
        ),
    }
}

async fn update_gauge_metrics(state: &AppState) {
    if let Ok(count) =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM notification_settings_view")
            .fetch_one(&state.db)
            .await
    {
        gauge!(NOTIFICATION_SETTINGS_TOTAL).set(count as f64);
    }

    for channel in [Channel::Slack, Channel::Ses, Channel::Smtp, Channel::Webhook] {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE deleted = 0",
            crate::notifier::config_table(channel)
        );
        if let Ok(count) = sqlx::query_scalar::<_, i64>(&sql).fetch_one(&state.db).await {
            gauge!(CHANNEL_CONFIGS_TOTAL, "channel" => channel.to_string()).set(count as f64);
        }
    }
}

/// Middleware to track HTTP request metrics.
///
/// Records:
/// - `http_requests_total` counter with method, path, and status labels
/// - `http_request_duration_seconds` histogram with method and path labels
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    // Extract path pattern (use matched path for templates like /channel/ses/:id)
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

pub fn record_channel_configs_saved(channel: Channel, count: usize) {
    counter!(CHANNEL_CONFIGS_SAVED_TOTAL, "channel" => channel.to_string()).increment(count as u64);
}

pub fn record_rbac_denied(operation: &'static str) {
    counter!(RBAC_DENIALS_TOTAL, "operation" => operation).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        // Ensure metric names follow Prometheus naming conventions
        assert!(HTTP_REQUESTS_TOTAL.ends_with("_total"));
        assert!(CHANNEL_CONFIGS_SAVED_TOTAL.ends_with("_total"));
        assert!(RBAC_DENIALS_TOTAL.ends_with("_total"));
        assert!(HTTP_REQUEST_DURATION_SECONDS.ends_with("_seconds"));
    }
}
