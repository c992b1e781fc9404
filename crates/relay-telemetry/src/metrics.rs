//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::TelemetryError;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
pub fn install_recorder() -> Result<PrometheusHandle, TelemetryError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::Recorder(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants shared across crates.

/// Webhook deliveries received (counter, labels: outcome).
pub const WEBHOOK_DELIVERIES_TOTAL: &str = "webhook_deliveries_total";
/// Events appended to the event store (counter, labels: type).
pub const EVENTS_RECORDED_TOTAL: &str = "events_recorded_total";
/// Events currently retained (gauge).
pub const EVENT_STORE_SIZE: &str = "event_store_size";
/// Poll endpoint requests (counter, labels: source).
pub const POLL_REQUESTS_TOTAL: &str = "poll_requests_total";
/// Events returned by the poll endpoint (counter).
pub const POLL_EVENTS_RETURNED_TOTAL: &str = "poll_events_returned_total";
/// Rejected shared-secret checks (counter).
pub const AUTH_REJECTIONS_TOTAL: &str = "auth_rejections_total";
/// Provider requests (counter, labels: operation).
pub const PROVIDER_REQUESTS_TOTAL: &str = "provider_requests_total";
/// Provider errors (counter, labels: operation, kind).
pub const PROVIDER_ERRORS_TOTAL: &str = "provider_errors_total";
/// Provider request duration seconds (histogram, labels: operation).
pub const PROVIDER_REQUEST_DURATION_SECONDS: &str = "provider_request_duration_seconds";
/// Automation forward attempts (counter, labels: outcome).
pub const FORWARD_ATTEMPTS_TOTAL: &str = "forward_attempts_total";
/// Media proxy responses (counter, labels: kind, outcome).
pub const MEDIA_PROXY_TOTAL: &str = "media_proxy_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_render() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WEBHOOK_DELIVERIES_TOTAL,
            EVENTS_RECORDED_TOTAL,
            EVENT_STORE_SIZE,
            POLL_REQUESTS_TOTAL,
            POLL_EVENTS_RETURNED_TOTAL,
            AUTH_REJECTIONS_TOTAL,
            PROVIDER_REQUESTS_TOTAL,
            PROVIDER_ERRORS_TOTAL,
            PROVIDER_REQUEST_DURATION_SECONDS,
            FORWARD_ATTEMPTS_TOTAL,
            MEDIA_PROXY_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
