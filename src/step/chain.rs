//! Sequential step composition.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::state::{StateField, WorkflowState};
use crate::{Error, ExecutionContext, Result};
use super::{StateStep, Step};

/// Two steps composed sequentially: the output of `A` feeds into `B`.
///
/// Constructed via [`StepExt::then`](crate::StepExt::then).
pub struct ChainStep<A, B> {
    first: A,
    second: B,
}

impl<A, B> ChainStep<A, B> {
    /// Create a new chained step.
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    /// The first step.
    pub fn first(&self) -> &A {
        &self.first
    }

    /// The second step.
    pub fn second(&self) -> &B {
        &self.second
    }
}

#[async_trait]
impl<A, B> Step for ChainStep<A, B>
where
    A: Step,
    B: Step<Input = A::Output>,
    A::Output: 'static,
{
    type Input = A::Input;
    type Output = B::Output;

    async fn run(&self, ctx: &ExecutionContext, input: A::Input) -> Result<B::Output> {
        let intermediate = self.first.run(ctx, input).await?;
        self.second.run(ctx, intermediate).await
    }
}

/// A linear graph of [`StateStep`]s with one entry and one exit.
///
/// Steps run strictly in order; step *i + 1* starts only after step *i*
/// has returned successfully, and the first error stops the chain.
///
/// # Example
///
/// ```rust
/// use prompt_chain::{FoldStep, StateStep, Step};
///
/// let a = FoldStep::new("a");
/// let b = FoldStep::new("b");
/// let c = FoldStep::new("c");
///
/// let left = a.next(b).next(c);
/// let right = FoldStep::new("a").next(FoldStep::new("b").next(FoldStep::new("c")));
/// assert_eq!(left.step_names(), right.step_names());
/// assert_eq!(left.entry().map(|s| s.name()), Some("a"));
/// assert_eq!(left.exit().map(|s| s.name()), Some("c"));
/// ```
#[derive(Clone, Default)]
pub struct Chain {
    nodes: Vec<Arc<dyn StateStep>>,
}

impl Chain {
    /// An empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_nodes(nodes: Vec<Arc<dyn StateStep>>) -> Self {
        Self { nodes }
    }

    /// The nodes in execution order.
    pub fn nodes(&self) -> &[Arc<dyn StateStep>] {
        &self.nodes
    }

    /// The step names in execution order.
    pub fn step_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|node| node.name()).collect()
    }

    /// The first step, if any.
    pub fn entry(&self) -> Option<&dyn StateStep> {
        self.nodes.first().map(|node| &**node)
    }

    /// The last step, if any.
    pub fn exit(&self) -> Option<&dyn StateStep> {
        self.nodes.last().map(|node| &**node)
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the chain has no steps.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check that the chain can run from an empty [`WorkflowState`].
    ///
    /// Walks the steps in order and fails on the first step that reads a
    /// field no earlier step has written.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::Validation("chain has no steps".into()));
        }
        let mut written: Vec<StateField> = Vec::new();
        for node in &self.nodes {
            if let Some(field) = node.reads().into_iter().find(|f| !written.contains(f)) {
                return Err(Error::Validation(format!(
                    "step '{}' reads {field} before any step writes it",
                    node.name()
                )));
            }
            for field in node.writes() {
                if !written.contains(&field) {
                    written.push(field);
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("steps", &self.step_names())
            .finish()
    }
}

#[async_trait]
impl Step for Chain {
    type Input = WorkflowState;
    type Output = WorkflowState;

    async fn run(&self, ctx: &ExecutionContext, input: WorkflowState) -> Result<WorkflowState> {
        let mut state = input;
        for node in &self.nodes {
            state = node.run(ctx, state).await?;
        }
        Ok(state)
    }

    fn name(&self) -> &str {
        "chain"
    }
}

impl StateStep for Chain {
    /// Fields read before the chain itself writes them.
    fn reads(&self) -> Vec<StateField> {
        let mut written = Vec::new();
        let mut external = Vec::new();
        for node in &self.nodes {
            for field in node.reads() {
                if !written.contains(&field) && !external.contains(&field) {
                    external.push(field);
                }
            }
            written.extend(node.writes());
        }
        external
    }

    fn writes(&self) -> Vec<StateField> {
        let mut written = Vec::new();
        for field in self.nodes.iter().flat_map(|node| node.writes()) {
            if !written.contains(&field) {
                written.push(field);
            }
        }
        written
    }

    fn into_nodes(self) -> Vec<Arc<dyn StateStep>> {
        self.nodes
    }
}
