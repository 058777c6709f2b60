use crate::{CaptureRequest, CaptureStatus, ConnectionFault, TransportFault};
use dashmap::DashMap;
use metrics::{histogram, increment_counter};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// Tally families kept for operational visibility
pub const EXCEPTIONS: &str = "process-exceptions";
pub const EXCEPTION_CODES: &str = "process-exception-codes";
pub const CONNECTION_FAULTS: &str = "process-exception-connection-faults";

/// Fire-and-forget counters for the capture pipeline
///
/// Every call also feeds the global `metrics` recorder, so a Prometheus
/// exporter sees the same numbers. Nothing here affects control flow.
#[derive(Debug, Default)]
pub struct CaptureMetrics {
    tallies: DashMap<&'static str, DashMap<String, u64>>,
}

impl CaptureMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transport fault seen during pre-flight or direct fetch
    pub fn record_fault(&self, fault: &TransportFault) {
        self.tally(EXCEPTIONS, fault.class_name());
        increment_counter!("capture_transport_faults_total", "class" => fault.class_name());

        match fault {
            TransportFault::ClientError(code) | TransportFault::ServerError(code) => {
                self.tally(EXCEPTION_CODES, &code.to_string());
            }
            TransportFault::Connection(kind) => self.record_connection_fault(*kind),
            TransportFault::TooLarge(_) | TransportFault::Other(_) => {}
        }
    }

    fn record_connection_fault(&self, kind: ConnectionFault) {
        self.tally(CONNECTION_FAULTS, kind.as_str());
    }

    pub fn record_strategy(&self, strategy: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        increment_counter!(
            "capture_strategy_attempts_total",
            "strategy" => strategy.to_string(),
            "outcome" => outcome
        );
    }

    /// Record a capture that reached a terminal state
    pub fn record_capture(&self, capture: &CaptureRequest, duration: Duration) {
        match capture.status() {
            CaptureStatus::Succeeded => increment_counter!("captures_succeeded_total"),
            CaptureStatus::Failed => {
                let reason = capture
                    .fail_reason()
                    .map(|reason| reason.code())
                    .unwrap_or_default();
                increment_counter!("captures_failed_total", "reason" => reason);
            }
            _ => return,
        }

        histogram!("capture_duration_seconds", duration.as_secs_f64());
    }

    fn tally(&self, family: &'static str, key: &str) {
        let entries = self.tallies.entry(family).or_default();
        *entries.entry(key.to_string()).or_insert(0) += 1;
    }

    /// Current count for one key of a tally family
    pub fn count(&self, family: &str, key: &str) -> u64 {
        self.tallies
            .get(family)
            .and_then(|entries| entries.get(key).map(|count| *count))
            .unwrap_or(0)
    }

    /// Sorted copy of one tally family
    pub fn snapshot(&self, family: &str) -> BTreeMap<String, u64> {
        self.tallies
            .get(family)
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| (entry.key().clone(), *entry.value()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub struct PrometheusExporter {
    port: u16,
}

impl PrometheusExporter {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    /// Install the global recorder and serve `/metrics` on the configured port
    pub fn start(&self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));

        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;

        info!("Serving Prometheus metrics on {}", addr);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faults_are_tallied_by_class_and_code() {
        let metrics = CaptureMetrics::new();
        metrics.record_fault(&TransportFault::ClientError(404));
        metrics.record_fault(&TransportFault::ClientError(404));
        metrics.record_fault(&TransportFault::ServerError(503));
        metrics.record_fault(&TransportFault::Connection(ConnectionFault::HostResolution));

        assert_eq!(metrics.count(EXCEPTIONS, "ClientErrorResponse"), 2);
        assert_eq!(metrics.count(EXCEPTIONS, "ServerErrorResponse"), 1);
        assert_eq!(metrics.count(EXCEPTIONS, "ConnectionFault"), 1);
        assert_eq!(metrics.count(EXCEPTION_CODES, "404"), 2);
        assert_eq!(metrics.count(EXCEPTION_CODES, "503"), 1);
        assert_eq!(metrics.count(CONNECTION_FAULTS, "host_resolution"), 1);
        assert_eq!(metrics.count(EXCEPTION_CODES, "500"), 0);
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let metrics = CaptureMetrics::new();
        metrics.record_fault(&TransportFault::ServerError(503));
        metrics.record_fault(&TransportFault::ClientError(401));

        let codes: Vec<_> = metrics.snapshot(EXCEPTION_CODES).into_keys().collect();
        assert_eq!(codes, vec!["401", "503"]);
        assert!(metrics.snapshot("unknown-family").is_empty());
    }
}
