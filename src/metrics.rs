//! Metrics collection for workflow executions.
//!
//! This module provides `WorkflowMetrics` for tracking completed steps,
//! calls to the inference service, retries and failures.

use serde::{Serialize, Deserialize};

/// Aggregated metrics for one workflow execution.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMetrics {
    /// Number of steps completed successfully.
    pub steps_completed: usize,
    /// Calls made to the inference service, retries included.
    pub invocations: usize,
    /// Calls that were retries of an earlier failed call.
    pub retries: usize,
    /// Characters of generated text received.
    pub completion_chars: usize,
    /// Collected failure messages.
    pub failures: Vec<String>,
}

impl WorkflowMetrics {
    /// Record a failure message.
    pub fn record_failure(&mut self, error: String) {
        self.failures.push(error);
    }

    /// Increment the steps completed counter.
    pub fn record_step(&mut self) {
        self.steps_completed += 1;
    }

    /// Record one call to the inference service.
    pub fn record_invocation(&mut self, retry: bool) {
        self.invocations += 1;
        if retry {
            self.retries += 1;
        }
    }

    /// Record generated text.
    pub fn add_completion_chars(&mut self, count: usize) {
        self.completion_chars += count;
    }

    /// Check if there were any failures.
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}
