//! The steps that make up one agent turn, and the terminal extraction.
//!
//! A turn is `FormatStep -> InvokeStep -> FoldStep`:
//!
//! - [`FormatStep`] renders the prompt and writes `model_inputs`.
//! - [`InvokeStep`] calls the inference service, retrying per its
//!   [`RetryPolicy`], and writes `model_outputs`.
//! - [`FoldStep`] writes `output`, appending the prompt and response to the
//!   conversation.
//!
//! [`ExtractStep`] ends a pipeline by projecting `output.response`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::builder::PromptSpec;
use crate::prompt::{format_prompt, PromptTemplate};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::service::{InferenceService, InvokeRequest};
use crate::state::{ModelInputs, ModelOutputs, StateField, TurnOutput, WorkflowState};
use crate::{Error, ExecutionContext, Result, WorkflowEvent};
use super::{StateStep, Step};

/// Formats the request for the current turn. Performs no I/O.
#[derive(Debug, Clone)]
pub struct FormatStep {
    step_name: String,
    template: PromptTemplate,
    max_tokens: u32,
    temperature: f32,
    include_previous_conversation: bool,
}

impl FormatStep {
    /// Create a format step from a prompt spec.
    pub fn new(name: impl Into<String>, spec: &PromptSpec) -> Self {
        Self {
            step_name: name.into(),
            template: spec.template.clone(),
            max_tokens: spec.max_tokens,
            temperature: spec.temperature,
            include_previous_conversation: spec.include_previous_conversation,
        }
    }
}

#[async_trait]
impl Step for FormatStep {
    type Input = WorkflowState;
    type Output = WorkflowState;

    async fn run(&self, ctx: &ExecutionContext, input: WorkflowState) -> Result<WorkflowState> {
        let mut state = input;
        let prompt = {
            // The first turn has no conversation and must not look for one.
            let previous = if self.include_previous_conversation {
                Some(state.require_output(&self.step_name)?.conversation.as_str())
            } else {
                None
            };
            format_prompt(&self.template, ctx.input(), previous)?
        };
        state.model_inputs = Some(ModelInputs {
            prompt,
            max_tokens_to_sample: self.max_tokens,
            temperature: self.temperature,
        });
        Ok(state)
    }

    fn name(&self) -> &str {
        &self.step_name
    }
}

impl StateStep for FormatStep {
    fn reads(&self) -> Vec<StateField> {
        if self.include_previous_conversation {
            vec![StateField::Output]
        } else {
            Vec::new()
        }
    }

    fn writes(&self) -> Vec<StateField> {
        vec![StateField::ModelInputs]
    }
}

/// Sends `model_inputs` to the inference service and keeps the completion.
///
/// This is the only step that performs I/O and the only one that retries.
pub struct InvokeStep {
    step_name: String,
    model_id: String,
    service: Arc<dyn InferenceService>,
    retry_policy: RetryPolicy,
}

impl InvokeStep {
    /// Create an invoke step.
    pub fn new(
        name: impl Into<String>,
        model_id: impl Into<String>,
        service: Arc<dyn InferenceService>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            step_name: name.into(),
            model_id: model_id.into(),
            service,
            retry_policy,
        }
    }

    /// The policy applied to failed calls.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

#[async_trait]
impl Step for InvokeStep {
    type Input = WorkflowState;
    type Output = WorkflowState;

    async fn run(&self, ctx: &ExecutionContext, input: WorkflowState) -> Result<WorkflowState> {
        let mut state = input;
        let request = InvokeRequest {
            model_id: self.model_id.clone(),
            body: state.require_model_inputs(&self.step_name)?.clone(),
        };

        let mut tracker = self.retry_policy.tracker();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            ctx.record_invocation(attempt > 1);
            debug!(step = %self.step_name, attempt, model = %self.model_id, "invoking model");

            let error = match self.service.invoke(&request).await {
                Ok(response) => {
                    let completion = response.body.completion;
                    ctx.record_completion(&completion);
                    state.model_outputs = Some(ModelOutputs {
                        response: completion,
                    });
                    return Ok(state);
                }
                Err(error) => error,
            };

            match tracker.on_failure(&error) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        step = %self.step_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying model invocation: {error}"
                    );
                    ctx.emit(WorkflowEvent::Retry {
                        step_name: self.step_name.clone(),
                        attempt,
                        delay_ms: delay.as_millis(),
                        message: error.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::Exhausted => {
                    return Err(Error::RetriesExhausted {
                        step_name: self.step_name.clone(),
                        attempts: attempt,
                        source: error,
                    });
                }
                RetryDecision::Fail => {
                    return Err(Error::Invocation {
                        step_name: self.step_name.clone(),
                        source: error,
                    });
                }
            }
        }
    }

    fn name(&self) -> &str {
        &self.step_name
    }
}

impl StateStep for InvokeStep {
    fn reads(&self) -> Vec<StateField> {
        vec![StateField::ModelInputs]
    }

    fn writes(&self) -> Vec<StateField> {
        vec![StateField::ModelOutputs]
    }
}

/// Folds the turn's prompt and response into `output`.
///
/// The prompt already carries the earlier conversation, so
/// `conversation = prompt + response` appends exactly this turn.
#[derive(Debug, Clone)]
pub struct FoldStep {
    step_name: String,
}

impl FoldStep {
    /// Create a fold step.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            step_name: name.into(),
        }
    }
}

#[async_trait]
impl Step for FoldStep {
    type Input = WorkflowState;
    type Output = WorkflowState;

    async fn run(&self, ctx: &ExecutionContext, input: WorkflowState) -> Result<WorkflowState> {
        let mut state = input;
        let prompt = &state.require_model_inputs(&self.step_name)?.prompt;
        let response = state.require_model_outputs(&self.step_name)?.response.clone();

        let mut conversation = String::with_capacity(prompt.len() + response.len());
        conversation.push_str(prompt);
        conversation.push_str(&response);

        ctx.emit_artifact(&self.step_name, "response", &response);
        state.output = Some(TurnOutput {
            response,
            conversation,
        });
        Ok(state)
    }

    fn name(&self) -> &str {
        &self.step_name
    }
}

impl StateStep for FoldStep {
    fn reads(&self) -> Vec<StateField> {
        vec![StateField::ModelInputs, StateField::ModelOutputs]
    }

    fn writes(&self) -> Vec<StateField> {
        vec![StateField::Output]
    }
}

/// Ends a pipeline by returning the latest response alone.
#[derive(Debug, Clone)]
pub struct ExtractStep {
    step_name: String,
}

impl Default for ExtractStep {
    fn default() -> Self {
        Self::new("select final answer")
    }
}

impl ExtractStep {
    /// Create an extract step.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            step_name: name.into(),
        }
    }
}

#[async_trait]
impl Step for ExtractStep {
    type Input = WorkflowState;
    type Output = String;

    async fn run(&self, _ctx: &ExecutionContext, input: WorkflowState) -> Result<String> {
        let output = input.require_output(&self.step_name)?;
        Ok(output.response.clone())
    }

    fn name(&self) -> &str {
        &self.step_name
    }
}
