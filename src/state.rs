//! Typed workflow state threaded through a chain.
//!
//! A fresh [`WorkflowState`] is created for every execution. Each step of a
//! turn replaces exactly one of its fields and leaves the others untouched,
//! so turns compose without knowing each other's contracts. The caller's
//! [`ExecutionInput`] is not part of the state: it travels, immutable, in the
//! [`ExecutionContext`](crate::ExecutionContext).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Caller-supplied fields for one execution, e.g. `{"novel": "Dune"}`.
///
/// # Example
///
/// ```rust
/// use prompt_chain::ExecutionInput;
///
/// let input = ExecutionInput::new().with("novel", "Dune");
/// assert_eq!(input.get_text("novel").as_deref(), Some("Dune"));
///
/// let parsed = ExecutionInput::from_json(r#"{"novel": "Dune"}"#).unwrap();
/// assert_eq!(parsed, input);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionInput(BTreeMap<String, Value>);

impl ExecutionInput {
    /// Create an empty input record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, returning the updated record.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Parse a record from a JSON object.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Raw access to a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The text a template substitutes for `key`.
    ///
    /// Strings render verbatim; other JSON values render as JSON.
    pub fn get_text(&self, key: &str) -> Option<String> {
        self.0.get(key).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Whether the record has a field named `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
}

/// The fields of [`WorkflowState`] a step may read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateField {
    /// `model_inputs`: the current turn's formatted request.
    ModelInputs,
    /// `model_outputs`: the current turn's raw response.
    ModelOutputs,
    /// `output`: the latest response and the cumulative conversation.
    Output,
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateField::ModelInputs => "model_inputs",
            StateField::ModelOutputs => "model_outputs",
            StateField::Output => "output",
        };
        f.write_str(name)
    }
}

/// Request body sent to the inference service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInputs {
    /// Fully rendered prompt, including any prior conversation.
    pub prompt: String,
    /// Upper bound on generated tokens.
    pub max_tokens_to_sample: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

/// The single field kept from the service's response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOutputs {
    /// Generated text.
    pub response: String,
}

/// Result of the most recent turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOutput {
    /// The latest response alone.
    pub response: String,
    /// Every prompt and response so far, in order.
    pub conversation: String,
}

/// Per-execution state passed from step to step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Written by the format step of the current turn.
    pub model_inputs: Option<ModelInputs>,
    /// Written by the invoke step of the current turn.
    pub model_outputs: Option<ModelOutputs>,
    /// Written by the fold step at the end of each turn.
    pub output: Option<TurnOutput>,
}

impl WorkflowState {
    /// An empty state, as seen by the first step of an execution.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cumulative conversation, if any turn has completed.
    pub fn conversation(&self) -> Option<&str> {
        self.output.as_ref().map(|o| o.conversation.as_str())
    }

    /// The latest response, if any turn has completed.
    pub fn response(&self) -> Option<&str> {
        self.output.as_ref().map(|o| o.response.as_str())
    }

    pub(crate) fn require_model_inputs(&self, step_name: &str) -> Result<&ModelInputs> {
        self.model_inputs.as_ref().ok_or_else(|| Error::MissingState {
            step_name: step_name.to_string(),
            field: StateField::ModelInputs,
        })
    }

    pub(crate) fn require_model_outputs(&self, step_name: &str) -> Result<&ModelOutputs> {
        self.model_outputs.as_ref().ok_or_else(|| Error::MissingState {
            step_name: step_name.to_string(),
            field: StateField::ModelOutputs,
        })
    }

    pub(crate) fn require_output(&self, step_name: &str) -> Result<&TurnOutput> {
        self.output.as_ref().ok_or_else(|| Error::MissingState {
            step_name: step_name.to_string(),
            field: StateField::Output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_string_inputs_render_as_json() {
        let input = ExecutionInput::new().with("servings", 4).with("novel", "Dune");
        assert_eq!(input.get_text("servings").as_deref(), Some("4"));
        assert_eq!(input.get_text("novel").as_deref(), Some("Dune"));
        assert!(input.get_text("missing").is_none());
    }

    #[test]
    fn missing_state_names_step_and_field() {
        let state = WorkflowState::new();
        let err = state.require_output("fold").unwrap_err();
        assert_eq!(err.to_string(), "Step 'fold' read output before it was written");
    }

    #[test]
    fn input_must_be_a_json_object() {
        assert!(ExecutionInput::from_json(r#"["Dune"]"#).is_err());
    }
}
