//! Error types for pipeline construction and execution.

use std::time::Duration;

use thiserror::Error;

use crate::service::ServiceError;
use crate::state::StateField;

/// The main error type for prompt-chain operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A prompt template could not be parsed.
    #[error("Template error: {0}")]
    Template(String),

    /// A pipeline, turn or policy failed construction-time validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The execution input lacks a field a template references.
    #[error("Missing execution input field '{0}'")]
    MissingInput(String),

    /// A step read a state field no earlier step wrote.
    #[error("Step '{step_name}' read {field} before it was written")]
    MissingState {
        /// The step that attempted the read.
        step_name: String,
        /// The absent field.
        field: StateField,
    },

    /// The inference service failed with a non-retriable error.
    #[error("Step '{step_name}' failed: {source}")]
    Invocation {
        /// The invoke step that failed.
        step_name: String,
        /// The service failure.
        #[source]
        source: ServiceError,
    },

    /// The inference service kept failing until the retry budget ran out.
    #[error("Step '{step_name}' exhausted retries after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// The invoke step that failed.
        step_name: String,
        /// Total calls made, including the first.
        attempts: u32,
        /// The last service failure.
        #[source]
        source: ServiceError,
    },

    /// The execution exceeded its wall-clock budget.
    #[error("Workflow '{workflow}' timed out after {timeout:?}")]
    Timeout {
        /// Name of the workflow.
        workflow: String,
        /// The configured budget.
        timeout: Duration,
    },

    /// No workflow is registered under the given name.
    #[error("Unknown workflow '{0}'")]
    UnknownWorkflow(String),

    /// A JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if the error came from the inference service.
    pub fn is_invocation(&self) -> bool {
        matches!(
            self,
            Error::Invocation { .. } | Error::RetriesExhausted { .. }
        )
    }
}

/// A specialized `Result` type for prompt-chain operations.
pub type Result<T> = std::result::Result<T, Error>;
