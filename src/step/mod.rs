//! Core step traits.
//!
//! [`Step`] is the unit of async work: typed input in, typed output out.
//! [`StateStep`] narrows it to steps that transform a [`WorkflowState`] and
//! declare which fields they read and write, which is what lets a
//! [`Chain`] check at construction time that every read is satisfied by an
//! earlier write.

use std::sync::Arc;

use async_trait::async_trait;

use crate::state::{StateField, WorkflowState};
use crate::{ExecutionContext, Result};

pub mod chain;
pub mod turn;

pub use chain::{Chain, ChainStep};
pub use turn::{ExtractStep, FoldStep, FormatStep, InvokeStep};

/// The fundamental trait for composable, async workflow steps.
///
/// Each step receives the execution context (caller input, metrics,
/// tracing) and typed input, and produces typed output or an error.
#[async_trait]
pub trait Step: Send + Sync {
    /// The input type for this step.
    type Input: Send;
    /// The output type produced by this step.
    type Output: Send;

    /// Execute this step with the provided context and input.
    async fn run(&self, ctx: &ExecutionContext, input: Self::Input) -> Result<Self::Output>;

    /// Returns a human-readable name for this step. Defaults to the type name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A step over [`WorkflowState`] with declared reads and writes.
///
/// `next` composes state steps into a [`Chain`]. Composition flattens, so
/// `a.next(b).next(c)` and `a.next(b.next(c))` produce the same sequence.
///
/// # Example
///
/// ```rust
/// use prompt_chain::{FoldStep, FormatStep, PromptSpec, StateStep};
///
/// let spec = PromptSpec::new("Write a 1-2 sentence summary for the book {novel}.")
///     .unwrap()
///     .without_conversation();
/// let chain = FormatStep::new("summary: format", &spec).next(FoldStep::new("summary: fold"));
/// assert_eq!(chain.step_names(), vec!["summary: format", "summary: fold"]);
/// ```
pub trait StateStep: Step<Input = WorkflowState, Output = WorkflowState> {
    /// Fields this step requires to be present when it runs.
    fn reads(&self) -> Vec<StateField>;

    /// Fields this step replaces.
    fn writes(&self) -> Vec<StateField>;

    /// The graph nodes this value contributes to a chain.
    fn into_nodes(self) -> Vec<Arc<dyn StateStep>>
    where
        Self: Sized + 'static,
    {
        vec![Arc::new(self)]
    }

    /// Append `next` after this step, returning the combined chain.
    fn next<S>(self, next: S) -> Chain
    where
        Self: Sized + 'static,
        S: StateStep + 'static,
    {
        let mut nodes = self.into_nodes();
        nodes.extend(next.into_nodes());
        Chain::from_nodes(nodes)
    }
}

/// Extension trait providing typed sequential composition for all [`Step`] implementors.
pub trait StepExt: Step + Sized {
    /// Chain this step with another, feeding this step's output into `next`.
    ///
    /// Unlike [`StateStep::next`], the two sides may have different
    /// output types; this is how a chain of turns is capped with an
    /// [`ExtractStep`].
    fn then<S>(self, next: S) -> ChainStep<Self, S>
    where
        S: Step<Input = Self::Output>,
        Self::Output: 'static,
    {
        ChainStep::new(self, next)
    }
}

impl<T: Step + Sized> StepExt for T {}
