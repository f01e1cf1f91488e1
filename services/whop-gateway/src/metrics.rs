//! Prometheus metrics exposition
//!
//! Counters rendered on `/metrics`:
//!
//! - `oauth_callbacks_total` (counter): label `outcome`
//! - `token_refresh_total` (counter): label `outcome`, emitted by the broker
//! - `webhook_events_total` (counter): labels `event_type`, `outcome`,
//!   emitted by the webhook dispatcher

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and return a handle for rendering.
///
/// Must run before any request is served; counters recorded earlier are lost.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Record the end state of one OAuth callback.
pub fn record_callback(outcome: &'static str) {
    metrics::counter!("oauth_callbacks_total", "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    /// Isolated recorder/handle pair; only one global recorder can exist per
    /// process.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_callback_does_not_panic_without_recorder() {
        record_callback("success");
    }

    #[test]
    fn record_callback_renders_outcome_label() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_callback("success");
        record_callback("success");
        record_callback("invalid_state");

        let output = handle.render();
        assert!(output.contains("oauth_callbacks_total{outcome=\"success\"} 2"), "{output}");
        assert!(output.contains("outcome=\"invalid_state\""), "{output}");
    }

    #[tokio::test]
    async fn webhook_counter_rendered_from_dispatcher() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let dir = tempfile::tempdir().unwrap();
        let profiles = std::sync::Arc::new(
            whop_webhook::ProfileStore::load(dir.path().join("p.json"))
                .await
                .unwrap(),
        );
        let dispatcher = whop_webhook::WebhookDispatcher::new(None, profiles);
        let _ = dispatcher.handle(b"{}", None).await;

        let output = handle.render();
        assert!(output.contains("webhook_events_total"), "{output}");
        assert!(output.contains("outcome=\"missing_signature\""), "{output}");
    }
}
