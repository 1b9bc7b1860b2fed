//! Bounded record of task execution attempts.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{SampleId, TaskId, TaskKind};

/// Default number of samples kept.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Timing and outcome of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSample {
    pub id: SampleId,
    pub operation: TaskKind,
    pub task_id: TaskId,
    /// 1-based attempt number of the task.
    pub attempt: u32,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Milliseconds between start and end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl PerformanceSample {
    /// Sample for an attempt that ran from `start_time` to `end_time`.
    pub fn finished(
        id: SampleId,
        task_id: TaskId,
        operation: TaskKind,
        attempt: u32,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        error: Option<String>,
    ) -> Self {
        let duration = (end_time - start_time).num_milliseconds().max(0) as u64;
        Self {
            id,
            operation,
            task_id,
            attempt,
            start_time,
            end_time: Some(end_time),
            duration: Some(duration),
            success: error.is_none(),
            error,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Aggregates over the samples currently retained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    /// Mean duration of successful samples, in milliseconds.
    pub average_duration_ms: f64,
    /// Successful completions whose end time lies within the trailing minute.
    pub throughput: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Ring buffer of samples. Once full, the oldest sample is evicted first.
#[derive(Debug)]
pub struct MetricsRecorder {
    samples: VecDeque<PerformanceSample>,
    capacity: usize,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MetricsRecorder {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, sample: PerformanceSample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Copy of the retained samples, oldest first.
    pub fn snapshot(&self) -> Vec<PerformanceSample> {
        self.samples.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn aggregate(&self, now: DateTime<Utc>) -> MetricsSummary {
        let window_start = now - Duration::seconds(60);
        let mut summary = MetricsSummary::default();
        let mut total_ms: u64 = 0;
        let mut timed = 0usize;

        for sample in &self.samples {
            if !sample.success {
                summary.failed += 1;
                continue;
            }
            summary.succeeded += 1;
            if let Some(ms) = sample.duration {
                total_ms += ms;
                timed += 1;
            }
            if sample.end_time.is_some_and(|end| end > window_start && end <= now) {
                summary.throughput += 1;
            }
        }

        if timed > 0 {
            summary.average_duration_ms = total_ms as f64 / timed as f64;
        }
        summary
    }
}
