//! Optional Prometheus metrics exposition at `GET /api/metrics` (ambient
//! observability stack; gated behind the `metrics` feature).

#[cfg(feature = "metrics")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::Result;
use crate::stats::StatsSnapshot;

/// Process-wide metrics recorder handle. A harmless no-op when the
/// `metrics` feature is disabled, so callers never need to branch on it.
#[derive(Clone)]
pub struct MetricsHandle {
    #[cfg(feature = "metrics")]
    inner: PrometheusHandle,
}

impl MetricsHandle {
    /// Install the global Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns an error if a recorder is already installed process-wide.
    #[cfg(feature = "metrics")]
    pub fn install() -> Result<Self> {
        let inner = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| crate::Error::Internal(format!("failed to install metrics recorder: {e}")))?;
        Ok(Self { inner })
    }

    /// No-op recorder used when the `metrics` feature is disabled.
    #[cfg(not(feature = "metrics"))]
    pub fn install() -> Result<Self> {
        Ok(Self {})
    }

    /// Render the current Prometheus text exposition, after publishing the
    /// latest stats snapshot.
    #[must_use]
    pub fn render(&self, snapshot: &StatsSnapshot) -> String {
        publish(snapshot);
        self.render_inner()
    }

    #[cfg(feature = "metrics")]
    fn render_inner(&self) -> String {
        self.inner.render()
    }

    #[cfg(not(feature = "metrics"))]
    fn render_inner(&self) -> String {
        "# metrics feature disabled\n".to_string()
    }
}

fn publish(snapshot: &StatsSnapshot) {
    #[cfg(feature = "metrics")]
    {
        telemetry_metrics::gauge!("tool_broker_tool_calls_total").set(snapshot.tool_calls as f64);
        telemetry_metrics::gauge!("tool_broker_tool_errors_total").set(snapshot.tool_errors as f64);
        telemetry_metrics::gauge!("tool_broker_chat_requests_total").set(snapshot.chat_requests as f64);
        telemetry_metrics::gauge!("tool_broker_chat_errors_total").set(snapshot.chat_errors as f64);
        telemetry_metrics::gauge!("tool_broker_total_connections").set(snapshot.total_connections as f64);
        telemetry_metrics::gauge!("tool_broker_notifications_total").set(snapshot.notifications as f64);
    }
    #[cfg(not(feature = "metrics"))]
    {
        let _ = snapshot;
    }
}
