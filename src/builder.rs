//! Building one agent turn.
//!
//! [`ChainBuilder::turn`] turns a [`PromptSpec`] into the three-step group
//! `format -> invoke -> fold`, each step instrumented, as a [`Chain`] ready
//! to be joined to the turns around it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::prompt::PromptTemplate;
use crate::retry::RetryPolicy;
use crate::service::{InferenceService, DEFAULT_MODEL_ID};
use crate::step::{Chain, FoldStep, FormatStep, InvokeStep, StateStep};
use crate::{Error, InstrumentedStep, Result};

fn default_max_tokens() -> u32 {
    250
}

fn default_temperature() -> f32 {
    1.0
}

fn default_include_previous_conversation() -> bool {
    true
}

/// What to ask in one turn and how to sample the answer.
///
/// # Example
///
/// ```rust
/// use prompt_chain::PromptSpec;
///
/// let spec: PromptSpec = serde_json::from_str(r#"{"template": "Summarize {novel}."}"#).unwrap();
/// assert_eq!(spec.max_tokens, 250);
/// assert_eq!(spec.temperature, 1.0);
/// assert!(spec.include_previous_conversation);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSpec {
    /// Template rendered against the execution input.
    pub template: PromptTemplate,
    /// Upper bound on generated tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Prefix the prompt with the conversation so far. Must be `false` for
    /// the first turn of a pipeline.
    #[serde(default = "default_include_previous_conversation")]
    pub include_previous_conversation: bool,
}

impl PromptSpec {
    /// Parse `template` and apply the defaults.
    pub fn new(template: &str) -> Result<Self> {
        Ok(Self {
            template: PromptTemplate::parse(template)?,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            include_previous_conversation: default_include_previous_conversation(),
        })
    }

    /// Set the token budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Do not prefix the prompt with earlier conversation.
    pub fn without_conversation(mut self) -> Self {
        self.include_previous_conversation = false;
        self
    }

    /// Reject token budgets of zero and temperatures outside `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(Error::Validation("max_tokens must be greater than 0".into()));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(Error::Validation(format!(
                "temperature must be within [0, 1], got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}

/// Produces agent turns bound to one inference service.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use prompt_chain::{ChainBuilder, InferenceService, InvokeRequest, InvokeResponse, PromptSpec, ServiceError};
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
/// let builder = ChainBuilder::new(Arc::new(Fixed));
/// let spec = PromptSpec::new("Describe {novel}.").unwrap();
/// let turn = builder.turn("Describe", &spec).unwrap();
/// assert_eq!(
///     turn.step_names(),
///     vec!["Describe: format", "Describe: invoke", "Describe: fold"]
/// );
/// ```
#[derive(Clone)]
pub struct ChainBuilder {
    service: Arc<dyn InferenceService>,
    model_id: String,
    retry_policy: RetryPolicy,
}

impl ChainBuilder {
    /// A builder using the default model and [`RetryPolicy::default`].
    pub fn new(service: Arc<dyn InferenceService>) -> Self {
        Self {
            service,
            model_id: DEFAULT_MODEL_ID.to_string(),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Target a different model.
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Attach a different retry policy to every invoke step.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// The model every invoke step targets.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Build the `format -> invoke -> fold` group for one turn.
    pub fn turn(&self, name: &str, spec: &PromptSpec) -> Result<Chain> {
        spec.validate().map_err(|e| match e {
            Error::Validation(msg) => Error::Validation(format!("turn '{name}': {msg}")),
            other => other,
        })?;

        let format = InstrumentedStep::new(FormatStep::new(format!("{name}: format"), spec));
        let invoke = InstrumentedStep::new(InvokeStep::new(
            format!("{name}: invoke"),
            self.model_id.clone(),
            Arc::clone(&self.service),
            self.retry_policy.clone(),
        ));
        let fold = InstrumentedStep::new(FoldStep::new(format!("{name}: fold")));

        Ok(format.next(invoke).next(fold))
    }
}
