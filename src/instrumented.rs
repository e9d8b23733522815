//! Instrumented step wrapper for automatic tracing and metrics.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::state::{StateField, WorkflowState};
use crate::step::{StateStep, Step};
use crate::{ExecutionContext, Result, WorkflowEvent};

/// Wraps any step with automatic event emission and metric recording.
///
/// For each execution, `InstrumentedStep` emits:
/// - A [`WorkflowEvent::StepStart`] before the inner step runs
/// - A [`WorkflowEvent::StepEnd`] with elapsed milliseconds on success
/// - A [`WorkflowEvent::Error`] and failure metric on error
///
/// Wrapping a [`StateStep`] yields a [`StateStep`] with the same reads and
/// writes, so instrumented steps compose into chains like bare ones.
///
/// # Example
///
/// ```rust
/// use prompt_chain::{ExecutionContext, ExecutionInput, ExtractStep, InstrumentedStep, Step};
/// use prompt_chain::state::{TurnOutput, WorkflowState};
///
/// # tokio_test::block_on(async {
/// let step = InstrumentedStep::new(ExtractStep::default());
/// let state = WorkflowState {
///     output: Some(TurnOutput { response: "done".into(), conversation: "...done".into() }),
///     ..WorkflowState::default()
/// };
///
/// let ctx = ExecutionContext::new(ExecutionInput::new());
/// assert_eq!(step.run(&ctx, state).await.unwrap(), "done");
///
/// let traces = ctx.trace_snapshot();
/// assert_eq!(traces.len(), 2); // StepStart + StepEnd
/// # });
/// ```
pub struct InstrumentedStep<S> {
    inner: S,
}

impl<S: Step> InstrumentedStep<S> {
    /// Wrap `inner`, labelling events with its name.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Access the inner step.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S> Step for InstrumentedStep<S>
where
    S: Step,
    S::Input: 'static,
    S::Output: 'static,
{
    type Input = S::Input;
    type Output = S::Output;

    async fn run(&self, ctx: &ExecutionContext, input: S::Input) -> Result<S::Output> {
        let name = self.inner.name();
        debug!(step = %name, "step started");
        ctx.emit(WorkflowEvent::StepStart {
            step_name: name.to_string(),
        });

        let start = Instant::now();
        let result = self.inner.run(ctx, input).await;
        let duration_ms = start.elapsed().as_millis();

        match &result {
            Ok(_) => {
                debug!(step = %name, duration_ms = duration_ms as u64, "step finished");
                ctx.record_step();
                ctx.emit(WorkflowEvent::StepEnd {
                    step_name: name.to_string(),
                    duration_ms,
                });
            }
            Err(e) => {
                warn!(step = %name, "step failed: {e}");
                ctx.record_failure(e.to_string());
                ctx.emit(WorkflowEvent::Error {
                    step_name: name.to_string(),
                    message: e.to_string(),
                });
            }
        }

        result
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

impl<S> StateStep for InstrumentedStep<S>
where
    S: StateStep,
{
    fn reads(&self) -> Vec<StateField> {
        self.inner.reads()
    }

    fn writes(&self) -> Vec<StateField> {
        self.inner.writes()
    }
}
