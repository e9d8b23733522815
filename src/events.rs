//! Structured execution events for tracing and observability.
//!
//! Steps emit these into the per-execution trace log so a caller can see,
//! after the fact, which steps ran, how long they took, which calls were
//! retried and what each turn produced.

use serde::{Serialize, Deserialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Events that can be emitted during an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WorkflowEvent {
    /// A step has started execution.
    StepStart {
        /// Name of the step being executed.
        step_name: String,
    },
    /// A step has finished successfully.
    StepEnd {
        /// Name of the step that completed.
        step_name: String,
        /// Duration of execution in milliseconds.
        duration_ms: u128,
    },
    /// A failed inference call will be retried.
    Retry {
        /// Name of the invoke step.
        step_name: String,
        /// The call that failed, starting at 1.
        attempt: u32,
        /// Backoff before the next call, in milliseconds.
        delay_ms: u128,
        /// The service error.
        message: String,
    },
    /// An intermediate artifact was produced during execution,
    /// such as the response of a single turn.
    Artifact {
        /// Name of the step that produced the artifact.
        step_name: String,
        /// Key identifying the artifact (e.g., "response").
        key: String,
        /// The artifact data as a JSON value.
        data: serde_json::Value,
    },
    /// An error occurred during step execution.
    Error {
        /// Name of the step where the error occurred.
        step_name: String,
        /// Error message describing what went wrong.
        message: String,
    },
}

/// A timestamped trace entry containing a workflow event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Unix epoch timestamp in milliseconds when this event occurred.
    pub timestamp: u128,
    /// The workflow event that was recorded.
    #[serde(flatten)]
    pub event: WorkflowEvent,
}

impl TraceEntry {
    /// Create a new trace entry with the current timestamp.
    #[must_use]
    pub fn new(event: WorkflowEvent) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Self { timestamp, event }
    }
}
