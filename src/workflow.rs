//! In-process workflow execution.
//!
//! A [`Workflow`] owns a pipeline and runs it once per execution, each with
//! a fresh [`ExecutionContext`] and an empty [`WorkflowState`], under a
//! wall-clock timeout. A [`WorkflowRuntime`] registers workflows by name and
//! runs any number of independent executions concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{info, info_span, warn, Instrument};

use crate::state::{ExecutionInput, WorkflowState};
use crate::step::{Chain, ChainStep, Step};
use crate::{Error, ExecutionContext, Result, WorkflowMetrics};

/// Budget applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// A named pipeline with an execution timeout.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use prompt_chain::{
///     ChainBuilder, ExecutionInput, InferenceService, InvokeRequest, InvokeResponse,
///     PipelineAssembler, PipelineSpec, PromptSpec, ServiceError,
/// };
///
/// struct Fixed;
///
/// #[async_trait]
/// impl InferenceService for Fixed {
///     async fn invoke(&self, _: &InvokeRequest) -> Result<InvokeResponse, ServiceError> {
///         Ok(InvokeResponse::completion("Spice."))
///     }
/// }
///
/// # tokio_test::block_on(async {
/// let spec = PipelineSpec::new("summary")
///     .turn("Summarize", PromptSpec::new("Summarize {novel}.").unwrap().without_conversation());
/// let workflow = PipelineAssembler::new(ChainBuilder::new(Arc::new(Fixed)))
///     .assemble(&spec)
///     .unwrap();
///
/// let (answer, metrics) = workflow
///     .run(ExecutionInput::new().with("novel", "Dune"))
///     .await
///     .unwrap();
/// assert_eq!(answer, "Spice.");
/// assert_eq!(metrics.invocations, 1);
/// # });
/// ```
pub struct Workflow<S> {
    step: S,
    name: String,
    timeout: Duration,
    required_inputs: Vec<String>,
}

impl<S> Workflow<S>
where
    S: Step<Input = WorkflowState>,
{
    /// Create a new workflow wrapping the given step.
    pub fn new(step: S) -> Self {
        Self {
            step,
            name: "workflow".to_string(),
            timeout: DEFAULT_TIMEOUT,
            required_inputs: Vec::new(),
        }
    }

    /// Set a human-readable name for this workflow.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Bound the total run time of each execution.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Input fields every execution must supply.
    pub fn with_required_inputs<I, T>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.required_inputs = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the name of this workflow.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The per-execution time budget.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Input fields every execution must supply.
    pub fn required_inputs(&self) -> &[String] {
        &self.required_inputs
    }

    /// Run one execution, returning the result along with its metrics.
    ///
    /// A fresh [`ExecutionContext`] and [`WorkflowState`] are created for
    /// each invocation.
    pub async fn run(&self, input: ExecutionInput) -> Result<(S::Output, WorkflowMetrics)> {
        let ctx = ExecutionContext::new(input);
        let output = self.run_with_ctx(&ctx).await?;
        Ok((output, ctx.snapshot()))
    }

    /// Run one execution against a caller-provided context.
    ///
    /// Useful for inspecting the trace log afterwards. The context must not
    /// be shared with another execution.
    pub async fn run_with_ctx(&self, ctx: &ExecutionContext) -> Result<S::Output> {
        if let Some(missing) = self
            .required_inputs
            .iter()
            .find(|field| !ctx.input().contains(field))
        {
            return Err(Error::MissingInput(missing.clone()));
        }

        let span = info_span!("workflow", name = %self.name);
        async {
            info!("execution started");
            let run = self.step.run(ctx, WorkflowState::new());
            match tokio::time::timeout(self.timeout, run).await {
                Ok(Ok(output)) => {
                    info!("execution succeeded");
                    Ok(output)
                }
                Ok(Err(e)) => {
                    warn!("execution failed: {e}");
                    Err(e)
                }
                Err(_) => {
                    warn!(timeout_ms = self.timeout.as_millis() as u64, "execution timed out");
                    ctx.record_failure(format!("timed out after {:?}", self.timeout));
                    Err(Error::Timeout {
                        workflow: self.name.clone(),
                        timeout: self.timeout,
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Access the inner step.
    pub fn inner(&self) -> &S {
        &self.step
    }
}

impl Workflow<Chain> {
    /// Wrap `chain` after checking it can run from an empty state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if a step reads state no earlier step
    /// writes, or the chain is empty.
    pub fn from_chain(chain: Chain) -> Result<Self> {
        chain.validate()?;
        Ok(Self::new(chain))
    }
}

impl<B> Workflow<ChainStep<Chain, B>>
where
    B: Step<Input = WorkflowState>,
{
    /// Wrap a chain capped by a final step, validating the chain first.
    pub fn from_pipeline(pipeline: ChainStep<Chain, B>) -> Result<Self> {
        pipeline.first().validate()?;
        Ok(Self::new(pipeline))
    }
}

/// Registry of named workflows that share an output type.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use prompt_chain::{
///     scenarios, ChainBuilder, InferenceService, InvokeRequest, InvokeResponse,
///     PipelineAssembler, ServiceError, WorkflowRuntime,
/// };
///
/// struct Fixed;
///
/// #[async_trait]
/// impl InferenceService for Fixed {
///     async fn invoke(&self, _: &InvokeRequest) -> Result<InvokeResponse, ServiceError> {
///         Ok(InvokeResponse::completion("ok"))
///     }
/// }
///
/// let assembler = PipelineAssembler::new(ChainBuilder::new(Arc::new(Fixed)));
/// let mut runtime = WorkflowRuntime::new();
/// scenarios::register_all(&assembler, &mut runtime).unwrap();
/// assert_eq!(runtime.names().len(), 5);
/// ```
pub struct WorkflowRuntime<S> {
    workflows: HashMap<String, Arc<Workflow<S>>>,
}

impl<S> Default for WorkflowRuntime<S> {
    fn default() -> Self {
        Self {
            workflows: HashMap::new(),
        }
    }
}

impl<S> WorkflowRuntime<S>
where
    S: Step<Input = WorkflowState>,
{
    /// An empty runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `workflow` under its name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the name is already taken.
    pub fn register(&mut self, workflow: Workflow<S>) -> Result<()> {
        let name = workflow.name().to_string();
        if self.workflows.contains_key(&name) {
            return Err(Error::Validation(format!(
                "workflow '{name}' is already registered"
            )));
        }
        info!(workflow = %name, "workflow registered");
        self.workflows.insert(name, Arc::new(workflow));
        Ok(())
    }

    /// Look up a workflow, e.g. to run it on a spawned task.
    pub fn get(&self, name: &str) -> Option<Arc<Workflow<S>>> {
        self.workflows.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.workflows.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run one execution of the named workflow.
    pub async fn execute(
        &self,
        name: &str,
        input: ExecutionInput,
    ) -> Result<(S::Output, WorkflowMetrics)> {
        let workflow = self
            .workflows
            .get(name)
            .ok_or_else(|| Error::UnknownWorkflow(name.to_string()))?;
        workflow.run(input).await
    }

    /// Run one execution per input concurrently. Results keep input order
    /// and one failure does not affect the others.
    pub async fn execute_all(
        &self,
        name: &str,
        inputs: Vec<ExecutionInput>,
    ) -> Result<Vec<Result<(S::Output, WorkflowMetrics)>>> {
        let workflow = self
            .workflows
            .get(name)
            .ok_or_else(|| Error::UnknownWorkflow(name.to_string()))?;
        Ok(join_all(inputs.into_iter().map(|input| workflow.run(input))).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Pipeline, PipelineAssembler, PipelineSpec};
    use crate::testing::{EchoService, ScriptedService};
    use crate::{
        ChainBuilder, ErrorClass, ExtractStep, FoldStep, PromptSpec, RetryPolicy, RetryRule,
        ServiceError, StateStep, StepExt,
    };
    use crate::service::InvokeResponse;

    fn spec() -> PipelineSpec {
        PipelineSpec::new("slow")
            .turn("one", PromptSpec::new("About {novel}.").unwrap().without_conversation())
            .turn("two", PromptSpec::new("More on {novel}.").unwrap())
    }

    fn assemble(builder: ChainBuilder, spec: &PipelineSpec) -> Workflow<Pipeline> {
        PipelineAssembler::new(builder).assemble(spec).unwrap()
    }

    #[tokio::test]
    async fn timeout_fails_the_execution() {
        let service = Arc::new(EchoService {
            delay: Duration::from_millis(200),
        });
        let workflow = assemble(ChainBuilder::new(service), &spec())
            .with_timeout(Duration::from_millis(20));

        let ctx = ExecutionContext::new(ExecutionInput::new().with("novel", "Dune"));
        let err = workflow.run_with_ctx(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { ref workflow, .. } if workflow == "slow"));
        assert!(ctx.snapshot().has_failures());
    }

    #[tokio::test]
    async fn timeout_covers_retry_backoff() {
        let service = Arc::new(ScriptedService::new(vec![Err(ServiceError::throttling("429"))]));
        let policy = RetryPolicy::new(vec![RetryRule::new(
            vec![ErrorClass::Throttling],
            Duration::from_secs(30),
            2.0,
            3,
        )
        .unwrap()]);
        let workflow = assemble(
            ChainBuilder::new(service.clone()).with_retry_policy(policy),
            &spec(),
        )
        .with_timeout(Duration::from_millis(20));

        let err = workflow
            .run(ExecutionInput::new().with("novel", "Dune"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn spec_timeout_is_applied() {
        let spec = spec().with_timeout(Duration::from_secs(42));
        let workflow = assemble(ChainBuilder::new(Arc::new(EchoService::default())), &spec);
        assert_eq!(workflow.timeout(), Duration::from_secs(42));
        assert_eq!(workflow.required_inputs(), ["novel".to_string()]);
        assert_eq!(workflow.name(), "slow");
    }

    #[test]
    fn hand_built_chains_are_validated() {
        let builder = ChainBuilder::new(Arc::new(EchoService::default()));
        let follow_up = PromptSpec::new("More on {novel}.").unwrap();

        let unchecked = builder.turn("two", &follow_up).unwrap();
        let err = Workflow::from_chain(unchecked.clone()).err().unwrap();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("'two: format' reads output")));
        assert!(Workflow::from_pipeline(unchecked.then(ExtractStep::default())).is_err());

        let opening = PromptSpec::new("About {novel}.").unwrap().without_conversation();
        let valid = builder
            .turn("one", &opening)
            .unwrap()
            .next(builder.turn("two", &follow_up).unwrap());
        let workflow = Workflow::from_chain(valid).unwrap();
        assert_eq!(workflow.inner().len(), 6);
        assert!(Workflow::from_chain(Chain::new()).is_err());
        assert!(Workflow::from_chain(FoldStep::new("fold").next(FoldStep::new("again"))).is_err());
    }

    #[tokio::test]
    async fn each_run_starts_from_empty_state() {
        let service = Arc::new(ScriptedService::new(vec![
            Ok(InvokeResponse::completion("first a")),
            Ok(InvokeResponse::completion("first b")),
        ]));
        let workflow = assemble(ChainBuilder::new(service.clone()), &spec());
        let input = ExecutionInput::new().with("novel", "Dune");

        workflow.run(input.clone()).await.unwrap();
        workflow.run(input).await.unwrap();

        let requests = service.requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[0].body.prompt, requests[2].body.prompt);
        assert!(!requests[2].body.prompt.contains("first"));
    }
}
