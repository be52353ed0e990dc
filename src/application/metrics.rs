use crate::domain::types::ObjectiveId;
use std::time::Duration;

/// Instrumentation hooks around engine operations.
///
/// Implementations must not fail or block; the engine ignores them for
/// control flow.
pub trait MetricsRecorder: Send + Sync {
    fn record_duration(&self, operation: &'static str, elapsed: Duration);
    fn record_queue_length(&self, queue: &'static str, length: usize);
    fn record_objective(&self, event: &'static str, id: &ObjectiveId);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpMetrics;

impl MetricsRecorder for NoOpMetrics {
    fn record_duration(&self, _operation: &'static str, _elapsed: Duration) {}
    fn record_queue_length(&self, _queue: &'static str, _length: usize) {}
    fn record_objective(&self, _event: &'static str, _id: &ObjectiveId) {}
}

/// Emits every measurement as a `tracing` event on the `paychan::metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsRecorder for TracingMetrics {
    fn record_duration(&self, operation: &'static str, elapsed: Duration) {
        tracing::debug!(
            target: "paychan::metrics",
            operation,
            elapsed_us = elapsed.as_micros() as u64,
            "duration"
        );
    }

    fn record_queue_length(&self, queue: &'static str, length: usize) {
        tracing::debug!(target: "paychan::metrics", queue, length, "queue length");
    }

    fn record_objective(&self, event: &'static str, id: &ObjectiveId) {
        tracing::info!(target: "paychan::metrics", event, objective = %id, "objective");
    }
}
