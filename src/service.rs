//! Interface to the external inference service.
//!
//! The crate never generates text itself. An [`InferenceService`] takes a
//! model identifier and a formatted request and returns a completion, or a
//! [`ServiceError`] classified so the retry policy can decide what to do.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::ModelInputs;

/// Model used when none is configured.
pub const DEFAULT_MODEL_ID: &str = "anthropic.claude-instant-v1";

/// Request envelope: `{model_id, body: {prompt, max_tokens_to_sample, temperature}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// Target model.
    pub model_id: String,
    /// Generation request.
    pub body: ModelInputs,
}

/// Response envelope: `{body: {completion}}`. Other fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeResponse {
    /// Response body.
    pub body: CompletionBody,
}

/// The part of the response body that carries generated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionBody {
    /// Generated text.
    pub completion: String,
}

impl InvokeResponse {
    /// Wrap a completion in a response envelope.
    pub fn completion(text: impl Into<String>) -> Self {
        Self {
            body: CompletionBody {
                completion: text.into(),
            },
        }
    }
}

/// Retry-relevant classification of a service failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The service is rate-limiting the caller.
    Throttling,
    /// Timeouts, temporary unavailability, networking faults.
    Transient,
    /// Bad requests, authorization failures, malformed payloads.
    Permanent,
}

/// A classified failure reported by an [`InferenceService`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{class:?} service error: {message}")]
pub struct ServiceError {
    /// Classification used by the retry policy.
    pub class: ErrorClass,
    /// Collaborator-provided detail.
    pub message: String,
}

impl ServiceError {
    /// Create an error of the given class.
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    /// Rate-limiting failure.
    pub fn throttling(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Throttling, message)
    }

    /// Transient failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Transient, message)
    }

    /// Non-retriable failure.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Permanent, message)
    }
}

/// A stateless request/response text-generation endpoint.
///
/// Implementations must be safe to call from many executions at once.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use prompt_chain::{InferenceService, InvokeRequest, InvokeResponse, ServiceError};
///
/// struct Shout;
///
/// #[async_trait]
/// impl InferenceService for Shout {
///     async fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse, ServiceError> {
///         Ok(InvokeResponse::completion(request.body.prompt.to_uppercase()))
///     }
/// }
/// ```
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Send one request and wait for its completion.
    async fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse, ServiceError>;
}
