//! Status - キューの状態スナップショット
//!
//! Built from the live queue counts and the metrics aggregate. It is a
//! point-in-time read for polling and dashboards; don't base scheduling
//! decisions on it.

use serde::{Deserialize, Serialize};

use crate::metrics::MetricsSummary;
use crate::queue::QueueCounts;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub total_items: usize,
    pub pending_items: usize,
    pub processing_items: usize,
    pub completed_items: usize,
    pub failed_items: usize,
    /// Waiting out a retry backoff.
    pub retrying_items: usize,
    pub cancelled_items: usize,
    /// Mean duration of successful attempts, in milliseconds.
    pub average_processing_time: f64,
    /// Completions in the trailing minute.
    pub throughput: usize,
}

impl QueueStatus {
    pub fn from_parts(counts: QueueCounts, summary: MetricsSummary) -> Self {
        Self {
            total_items: counts.total,
            pending_items: counts.pending,
            processing_items: counts.processing,
            completed_items: counts.completed,
            failed_items: counts.failed,
            retrying_items: counts.retrying,
            cancelled_items: counts.cancelled,
            average_processing_time: summary.average_duration_ms,
            throughput: summary.throughput,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_camel_case_keys() {
        let counts = QueueCounts {
            total: 4,
            pending: 1,
            processing: 1,
            completed: 1,
            cancelled: 1,
            ..QueueCounts::default()
        };
        let summary = MetricsSummary {
            average_duration_ms: 250.0,
            throughput: 1,
            succeeded: 1,
            failed: 0,
        };

        let value = serde_json::to_value(QueueStatus::from_parts(counts, summary)).unwrap();
        assert_eq!(value["totalItems"], 4);
        assert_eq!(value["pendingItems"], 1);
        assert_eq!(value["cancelledItems"], 1);
        assert_eq!(value["averageProcessingTime"], 250.0);
        assert_eq!(value["throughput"], 1);
    }
}
