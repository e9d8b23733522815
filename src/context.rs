//! Execution context for workflow runs.
//!
//! Every step receives an `ExecutionContext`. It carries the caller's
//! immutable [`ExecutionInput`] plus the metrics and trace log of the
//! execution. A context belongs to exactly one execution; concurrent
//! executions never share one.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::events::{TraceEntry, WorkflowEvent};
use crate::metrics::WorkflowMetrics;
use crate::state::ExecutionInput;

/// Context passed to every step in an execution.
///
/// Cloning is cheap and clones observe the same metrics and trace log.
///
/// # Example
///
/// ```rust
/// use prompt_chain::{ExecutionContext, ExecutionInput, WorkflowEvent};
///
/// let ctx = ExecutionContext::new(ExecutionInput::new().with("novel", "Dune"));
/// assert_eq!(ctx.input().get_text("novel").as_deref(), Some("Dune"));
///
/// ctx.emit(WorkflowEvent::StepStart {
///     step_name: "Write a Summary: format".to_string(),
/// });
/// assert_eq!(ctx.trace_snapshot().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    input: Arc<ExecutionInput>,
    /// Shared metrics accumulator.
    pub metrics: Arc<Mutex<WorkflowMetrics>>,
    /// Shared trace log for structured workflow events.
    pub traces: Arc<Mutex<Vec<TraceEntry>>>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(ExecutionInput::default())
    }
}

// Metric and trace updates never leave the data half-written, so a poisoned
// lock is still safe to read through.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ExecutionContext {
    /// Create a context for one execution of `input`.
    #[must_use]
    pub fn new(input: ExecutionInput) -> Self {
        Self {
            input: Arc::new(input),
            metrics: Arc::new(Mutex::new(WorkflowMetrics::default())),
            traces: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The caller-supplied input of this execution.
    pub fn input(&self) -> &ExecutionInput {
        &self.input
    }

    /// Increment the steps completed counter.
    pub fn record_step(&self) {
        lock(&self.metrics).record_step();
    }

    /// Record one call to the inference service.
    pub fn record_invocation(&self, retry: bool) {
        lock(&self.metrics).record_invocation(retry);
    }

    /// Record generated text received from the service.
    pub fn record_completion(&self, text: &str) {
        lock(&self.metrics).add_completion_chars(text.chars().count());
    }

    /// Record a failure message.
    pub fn record_failure(&self, error: impl Into<String>) {
        lock(&self.metrics).record_failure(error.into());
    }

    /// Get a snapshot of the current metrics.
    #[must_use]
    pub fn snapshot(&self) -> WorkflowMetrics {
        lock(&self.metrics).clone()
    }

    /// Emit a structured workflow event to the trace log.
    ///
    /// Events are timestamped automatically when emitted.
    pub fn emit(&self, event: WorkflowEvent) {
        let entry = TraceEntry::new(event);
        lock(&self.traces).push(entry);
    }

    /// Emit an artifact event with automatic JSON serialization.
    pub fn emit_artifact<T: serde::Serialize>(&self, step_name: &str, key: &str, data: &T) {
        let json_data = serde_json::to_value(data)
            .unwrap_or_else(|_| serde_json::json!("<serialization_error>"));
        self.emit(WorkflowEvent::Artifact {
            step_name: step_name.to_string(),
            key: key.to_string(),
            data: json_data,
        });
    }

    /// Get a snapshot of the current trace log.
    #[must_use]
    pub fn trace_snapshot(&self) -> Vec<TraceEntry> {
        lock(&self.traces).clone()
    }
}
