//! Assembling complete pipelines from turn definitions.
//!
//! A [`PipelineSpec`] is plain data: a name, a timeout and an ordered list of
//! turns. [`PipelineAssembler`] builds each turn with a [`ChainBuilder`],
//! joins the turns in order, validates the resulting chain and caps it with
//! an [`ExtractStep`] so the workflow returns the last turn's response.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::workflow::DEFAULT_TIMEOUT;

use crate::builder::{ChainBuilder, PromptSpec};
use crate::step::{Chain, ChainStep, ExtractStep, StateStep, StepExt};
use crate::workflow::{Workflow, WorkflowRuntime};
use crate::{Error, InstrumentedStep, Result};

/// The executable form of an assembled pipeline.
pub type Pipeline = ChainStep<Chain, InstrumentedStep<ExtractStep>>;

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// `timeout_secs` on the wire, fractional seconds allowed.
mod timeout_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(timeout: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(timeout.as_secs_f64())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// One named turn of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnSpec {
    /// Label used in step names, events and logs.
    pub name: String,
    /// Prompt and sampling parameters.
    #[serde(flatten)]
    pub prompt: PromptSpec,
}

/// Declarative definition of a pipeline.
///
/// # Example
///
/// ```rust
/// use prompt_chain::PipelineSpec;
/// use std::time::Duration;
///
/// let spec = PipelineSpec::from_json(r#"{
///     "name": "review",
///     "turns": [
///         {"name": "Summary", "template": "Summarize {novel}.", "include_previous_conversation": false},
///         {"name": "Review", "template": "Review {novel} for {audience}.", "max_tokens": 1000}
///     ]
/// }"#).unwrap();
///
/// assert_eq!(spec.timeout, Duration::from_secs(300));
/// assert_eq!(spec.turns[1].prompt.max_tokens, 1000);
/// assert_eq!(spec.required_inputs(), vec!["novel", "audience"]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Unique name the workflow is registered under.
    pub name: String,
    /// Turns in execution order.
    pub turns: Vec<TurnSpec>,
    /// Wall-clock budget per execution. Serialized as `timeout_secs`.
    #[serde(rename = "timeout_secs", default = "default_timeout", with = "timeout_secs")]
    pub timeout: Duration,
}

impl PipelineSpec {
    /// An empty pipeline with the default timeout.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            turns: Vec::new(),
            timeout: default_timeout(),
        }
    }

    /// Parse a spec from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Append a turn.
    pub fn turn(mut self, name: impl Into<String>, prompt: PromptSpec) -> Self {
        self.turns.push(TurnSpec {
            name: name.into(),
            prompt,
        });
        self
    }

    /// Set the per-execution timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Every input field referenced by any turn, in order of first use.
    pub fn required_inputs(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        for field in self.turns.iter().flat_map(|t| t.prompt.template.fields()) {
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
        fields
    }
}

/// Builds and registers pipelines from [`PipelineSpec`]s.
#[derive(Clone)]
pub struct PipelineAssembler {
    builder: ChainBuilder,
}

impl PipelineAssembler {
    /// An assembler producing turns with `builder`.
    pub fn new(builder: ChainBuilder) -> Self {
        Self { builder }
    }

    /// Build the chain of turns without the terminal extraction.
    ///
    /// # Errors
    ///
    /// Fails if the spec has no turns, a turn has invalid parameters, or a
    /// step would read state no earlier step wrote (for example a first turn
    /// that asks for the previous conversation).
    pub fn chain(&self, spec: &PipelineSpec) -> Result<Chain> {
        if spec.turns.is_empty() {
            return Err(Error::Validation(format!(
                "pipeline '{}' has no turns",
                spec.name
            )));
        }
        let mut chain = Chain::new();
        for turn in &spec.turns {
            chain = chain.next(self.builder.turn(&turn.name, &turn.prompt)?);
        }
        chain.validate().map_err(|e| match e {
            Error::Validation(msg) => Error::Validation(format!("pipeline '{}': {msg}", spec.name)),
            other => other,
        })?;
        Ok(chain)
    }

    /// Build the complete workflow: turns, then the final answer.
    ///
    /// # Errors
    ///
    /// Everything [`chain`](Self::chain) rejects, plus a zero timeout.
    pub fn assemble(&self, spec: &PipelineSpec) -> Result<Workflow<Pipeline>> {
        if spec.timeout.is_zero() {
            return Err(Error::Validation(format!(
                "pipeline '{}': timeout must be greater than zero",
                spec.name
            )));
        }
        let chain = self.chain(spec)?;
        debug!(pipeline = %spec.name, steps = chain.len(), "pipeline assembled");
        let pipeline = chain.then(InstrumentedStep::new(ExtractStep::default()));
        Ok(Workflow::from_pipeline(pipeline)?
            .with_name(spec.name.clone())
            .with_timeout(spec.timeout)
            .with_required_inputs(spec.required_inputs()))
    }

    /// Assemble `spec` and register it with `runtime`.
    pub fn register(
        &self,
        runtime: &mut WorkflowRuntime<Pipeline>,
        spec: &PipelineSpec,
    ) -> Result<()> {
        runtime.register(self.assemble(spec)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::prompt::{AI_PROMPT, HUMAN_PROMPT};
    use crate::service::{InvokeResponse, ServiceError};
    use crate::testing::{EchoService, ScriptedService};
    use crate::{ExecutionContext, ExecutionInput, RetryPolicy, Step, WorkflowEvent};
    use tokio_test::{assert_err, assert_ok};

    fn three_turns() -> PipelineSpec {
        PipelineSpec::new("test")
            .turn(
                "one",
                PromptSpec::new("First about {novel}.").unwrap().without_conversation(),
            )
            .turn("two", PromptSpec::new("Second about {novel}.").unwrap())
            .turn(
                "three",
                PromptSpec::new("Third about {novel}.").unwrap().with_max_tokens(1000),
            )
    }

    fn assembler(service: Arc<dyn crate::InferenceService>) -> PipelineAssembler {
        PipelineAssembler::new(ChainBuilder::new(service).with_retry_policy(RetryPolicy::none()))
    }

    #[tokio::test]
    async fn conversation_grows_by_exactly_one_exchange_per_turn() {
        let service = Arc::new(ScriptedService::new(vec![
            Ok(InvokeResponse::completion("r1")),
            Ok(InvokeResponse::completion("r2")),
            Ok(InvokeResponse::completion("r3")),
        ]));
        let chain = assembler(service.clone()).chain(&three_turns()).unwrap();
        let ctx = ExecutionContext::new(ExecutionInput::new().with("novel", "Dune"));
        let state = chain.run(&ctx, crate::WorkflowState::new()).await.unwrap();

        let prompts: Vec<String> = service.requests().into_iter().map(|r| r.body.prompt).collect();
        let p1 = format!("{HUMAN_PROMPT}First about Dune.{AI_PROMPT}");
        assert_eq!(prompts[0], p1);
        let c1 = format!("{p1}r1");
        assert_eq!(prompts[1], format!("{c1}{HUMAN_PROMPT}Second about Dune.{AI_PROMPT}"));
        let c2 = format!("{}r2", prompts[1]);
        assert_eq!(prompts[2], format!("{c2}{HUMAN_PROMPT}Third about Dune.{AI_PROMPT}"));

        let output = state.output.unwrap();
        assert_eq!(output.conversation, format!("{}r3", prompts[2]));
        assert_eq!(output.response, "r3");
        assert_eq!(service.requests()[2].body.max_tokens_to_sample, 1000);
    }

    #[tokio::test]
    async fn turns_complete_before_the_next_begins() {
        let service: Arc<dyn crate::InferenceService> = Arc::new(EchoService::default());
        let chain = assembler(service).chain(&three_turns()).unwrap();
        let ctx = ExecutionContext::new(ExecutionInput::new().with("novel", "Dune"));
        chain.run(&ctx, crate::WorkflowState::new()).await.unwrap();

        let starts: Vec<String> = ctx
            .trace_snapshot()
            .into_iter()
            .filter_map(|t| match t.event {
                WorkflowEvent::StepStart { step_name } => Some(step_name),
                _ => None,
            })
            .collect();
        assert_eq!(
            starts,
            vec![
                "one: format", "one: invoke", "one: fold",
                "two: format", "two: invoke", "two: fold",
                "three: format", "three: invoke", "three: fold",
            ]
        );
    }

    #[tokio::test]
    async fn workflow_returns_last_response_only() {
        let service = Arc::new(ScriptedService::new(vec![
            Ok(InvokeResponse::completion("a")),
            Ok(InvokeResponse::completion("b")),
            Ok(InvokeResponse::completion("c")),
        ]));
        let workflow = assembler(service).assemble(&three_turns()).unwrap();
        let (answer, metrics) =
            assert_ok!(workflow.run(ExecutionInput::new().with("novel", "Dune")).await);
        assert_eq!(answer, "c");
        assert_eq!(metrics.steps_completed, 10);
        assert_eq!(metrics.invocations, 3);
    }

    #[test]
    fn first_turn_must_not_read_conversation() {
        let spec = PipelineSpec::new("bad").turn("one", PromptSpec::new("Hi {novel}").unwrap());
        let err = assembler(Arc::new(EchoService::default())).assemble(&spec).err().unwrap();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("'one: format' reads output"));
    }

    #[test]
    fn validation_messages_are_not_doubled() {
        let spec = PipelineSpec::new("bad").turn("one", PromptSpec::new("Hi {novel}").unwrap());
        let err = assembler(Arc::new(EchoService::default())).assemble(&spec).err().unwrap();
        assert_eq!(err.to_string().matches("Validation error").count(), 1);
        assert!(err.to_string().starts_with("Validation error: pipeline 'bad': step 'one: format'"));

        let spec = PipelineSpec::new("hot").turn(
            "one",
            PromptSpec::new("Hi {novel}").unwrap().without_conversation().with_temperature(2.0),
        );
        let err = assembler(Arc::new(EchoService::default())).assemble(&spec).err().unwrap();
        assert_eq!(err.to_string().matches("Validation error").count(), 1);
        assert!(err.to_string().contains("turn 'one': temperature"));
    }

    #[tokio::test]
    async fn sub_second_timeouts_keep_their_precision() {
        let spec = PipelineSpec::new("quick")
            .turn("one", PromptSpec::new("Hi {novel}").unwrap().without_conversation())
            .with_timeout(Duration::from_millis(900));
        assert_eq!(spec.timeout, Duration::from_millis(900));

        let service = Arc::new(EchoService {
            delay: Duration::from_millis(1),
        });
        let workflow = assembler(service).assemble(&spec).unwrap();
        assert_eq!(workflow.timeout(), Duration::from_millis(900));
        assert_ok!(workflow.run(ExecutionInput::new().with("novel", "Dune")).await);

        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(PipelineSpec::from_json(&json).unwrap().timeout, Duration::from_millis(900));
        let parsed = PipelineSpec::from_json(
            r#"{"name": "p", "timeout_secs": 1.5, "turns": [{"name": "a", "template": "x"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.timeout, Duration::from_millis(1500));
    }

    #[test]
    fn zero_and_negative_timeouts_are_rejected() {
        let zero = PipelineSpec::from_json(
            r#"{"name": "p", "timeout_secs": 0, "turns": [{"name": "a", "template": "x", "include_previous_conversation": false}]}"#,
        )
        .unwrap();
        let err = assembler(Arc::new(EchoService::default())).assemble(&zero).err().unwrap();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("timeout must be greater than zero")));

        let built = three_turns().with_timeout(Duration::ZERO);
        assert!(assembler(Arc::new(EchoService::default())).assemble(&built).is_err());

        assert!(PipelineSpec::from_json(r#"{"name": "p", "timeout_secs": -1, "turns": []}"#).is_err());
    }

    #[test]
    fn assembled_pipeline_exposes_its_parts() {
        let workflow = assembler(Arc::new(EchoService::default())).assemble(&three_turns()).unwrap();
        let pipeline = workflow.inner();
        assert_eq!(pipeline.first().nodes().len(), 9);
        assert_eq!(pipeline.second().inner().name(), "select final answer");
    }

    #[test]
    fn later_turns_may_start_fresh() {
        let spec = three_turns().turn(
            "fresh",
            PromptSpec::new("Start over on {novel}.").unwrap().without_conversation(),
        );
        assert!(assembler(Arc::new(EchoService::default())).assemble(&spec).is_ok());
    }

    #[test]
    fn empty_pipelines_are_rejected() {
        let err = assembler(Arc::new(EchoService::default()))
            .assemble(&PipelineSpec::new("empty"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("has no turns"));
    }

    #[tokio::test]
    async fn missing_input_fails_before_any_call() {
        let service = Arc::new(ScriptedService::new(Vec::new()));
        let workflow = assembler(service.clone()).assemble(&three_turns()).unwrap();
        let err = assert_err!(workflow.run(ExecutionInput::new().with("title", "Dune")).await);
        assert!(matches!(err, Error::MissingInput(ref f) if f == "novel"));
        assert_eq!(service.calls(), 0);
    }

    #[tokio::test]
    async fn failed_turn_stops_the_pipeline() {
        let service = Arc::new(ScriptedService::new(vec![
            Ok(InvokeResponse::completion("a")),
            Err(ServiceError::permanent("denied")),
        ]));
        let workflow = assembler(service.clone()).assemble(&three_turns()).unwrap();
        let err = assert_err!(workflow.run(ExecutionInput::new().with("novel", "Dune")).await);
        assert!(matches!(err, Error::Invocation { ref step_name, .. } if step_name == "two: invoke"));
        assert_eq!(service.calls(), 2);
    }
}
