//! # prompt-chain
//!
//! Typed, async prompt-chaining pipelines in Rust.
//!
//! A pipeline is a linear sequence of agent turns. Each turn formats a
//! prompt, sends it to an external inference service and folds the response
//! into a growing conversation that the next turn builds on. The last turn's
//! response is the pipeline's result.
//!
//! ## Core Concepts
//!
//! - **PromptTemplate / format_prompt**: Render `{field}` templates, prefixed by the conversation so far
//! - **InferenceService**: The external text-generation endpoint
//! - **RetryPolicy**: Which service failures are retried, with what backoff
//! - **Step / StateStep**: Async units of work; state steps declare their reads and writes
//! - **Chain**: Linear composition of state steps via `.next()`
//! - **ChainBuilder**: One agent turn, `format -> invoke -> fold`
//! - **PipelineAssembler**: Turns a `PipelineSpec` into a runnable `Workflow`
//! - **WorkflowRuntime**: Named workflows, independent concurrent executions
//!
//! ## Example: A Two-Turn Pipeline
//!
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use prompt_chain::{
//!     ChainBuilder, ExecutionInput, InferenceService, InvokeRequest, InvokeResponse,
//!     PipelineAssembler, PipelineSpec, PromptSpec, ServiceError,
//! };
//!
//! struct Counter;
//!
//! #[async_trait]
//! impl InferenceService for Counter {
//!     async fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse, ServiceError> {
//!         let turns = request.body.prompt.matches("Human:").count();
//!         Ok(InvokeResponse::completion(format!("answer {turns}")))
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let spec = PipelineSpec::new("review")
//!     .turn("Summary", PromptSpec::new("Summarize {novel}.").unwrap().without_conversation())
//!     .turn("Review", PromptSpec::new("Review {novel}.").unwrap().with_max_tokens(1000));
//!
//! let workflow = PipelineAssembler::new(ChainBuilder::new(Arc::new(Counter)))
//!     .assemble(&spec)
//!     .unwrap();
//! let (answer, metrics) = workflow
//!     .run(ExecutionInput::new().with("novel", "Dune"))
//!     .await
//!     .unwrap();
//!
//! assert_eq!(answer, "answer 2"); // the second prompt carries both turns
//! assert_eq!(metrics.invocations, 2);
//! # });
//! ```

pub mod error;
pub mod context;
pub mod metrics;
pub mod events;
pub mod state;
pub mod prompt;
pub mod service;
pub mod retry;
pub mod step;
pub mod instrumented;
pub mod builder;
pub mod pipeline;
pub mod workflow;
pub mod scenarios;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use context::ExecutionContext;
pub use metrics::WorkflowMetrics;
pub use events::{TraceEntry, WorkflowEvent};
pub use state::{ExecutionInput, StateField, WorkflowState};
pub use prompt::{format_prompt, PromptTemplate, AI_PROMPT, HUMAN_PROMPT};
pub use service::{ErrorClass, InferenceService, InvokeRequest, InvokeResponse, ServiceError};
pub use retry::{RetryDecision, RetryPolicy, RetryRule};
pub use instrumented::InstrumentedStep;
pub use builder::{ChainBuilder, PromptSpec};
pub use pipeline::{Pipeline, PipelineAssembler, PipelineSpec, TurnSpec};
pub use workflow::{Workflow, WorkflowRuntime};

// Re-export step types
pub use step::{StateStep, Step, StepExt};
pub use step::chain::{Chain, ChainStep};
pub use step::turn::{ExtractStep, FoldStep, FormatStep, InvokeStep};
