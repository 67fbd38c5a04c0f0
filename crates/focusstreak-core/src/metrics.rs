//! Metrics sink injected into components that emit counters.
//!
//! There is no global registry: whoever builds a [`crate::StreakService`] or
//! [`crate::BillingHandler`] decides where metrics go.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::billing::Plan;
use crate::streak::ReconcileOutcome;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "metric", rename_all = "snake_case")]
pub enum Metric {
    ReconcileSucceeded {
        outcome: ReconcileOutcome,
        attempts: u32,
    },
    ReconcileRetried {
        attempt: u32,
        conflict: bool,
    },
    ReconcileFailed {
        reason: FailureReason,
    },
    /// A planned save pass was gone at write time.
    SavePassInvariantViolated,
    BillingApplied {
        plan: Option<Plan>,
        entitled: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Validation,
    ExhaustedRetries,
    TimedOut,
    Store,
}

pub trait MetricsSink: Send + Sync {
    fn record(&self, metric: Metric);
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _metric: Metric) {}
}

/// Emits each metric as a `tracing` event on the `focusstreak::metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record(&self, metric: Metric) {
        match serde_json::to_string(&metric) {
            Ok(json) => tracing::info!(target: "focusstreak::metrics", "{json}"),
            Err(e) => tracing::warn!(target: "focusstreak::metrics", "unserializable metric: {e}"),
        }
    }
}

/// Keeps every metric in memory. Useful in tests.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    recorded: Mutex<Vec<Metric>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Metric> {
        self.recorded
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

impl MetricsSink for RecordingMetrics {
    fn record(&self, metric: Metric) {
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.push(metric);
        }
    }
}
