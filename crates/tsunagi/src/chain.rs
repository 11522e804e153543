//! Erased stage nodes and the sequential walk over them.

use async_trait::async_trait;
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use tsunagi_core::{
    CancellationToken, Payload, StepInstance, StepName, WorkflowError, WorkflowOptions,
};

/// Copies a stage input so the stage can be replayed by a retry branch.
pub(crate) type CloneFn = fn(&Payload) -> Result<Payload, WorkflowError>;

/// Builds a fresh step for one stage execution.
pub(crate) type Factory<C, I, O> = Arc<dyn Fn(&C) -> StepInstance<I, O> + Send + Sync>;

/// Why a walk ended without a value.
#[derive(Debug)]
pub(crate) enum Interrupt {
    Stopped,
    Canceled,
    Failed(WorkflowError),
}

impl From<WorkflowError> for Interrupt {
    fn from(error: WorkflowError) -> Self {
        match error {
            WorkflowError::Canceled => Interrupt::Canceled,
            WorkflowError::Stopped => Interrupt::Stopped,
            other => Interrupt::Failed(other),
        }
    }
}

/// Everything a node needs from the running workflow.
pub(crate) struct Scope<'a, C> {
    pub(crate) context: &'a C,
    pub(crate) cancel: &'a CancellationToken,
    pub(crate) options: &'a WorkflowOptions,
}

impl<C> Scope<'_, C> {
    pub(crate) fn checkpoint(&self) -> Result<(), Interrupt> {
        if self.cancel.is_cancelled() {
            Err(Interrupt::Canceled)
        } else {
            Ok(())
        }
    }

    /// Sleeps for `delay` unless cancellation arrives first.
    pub(crate) async fn sleep(&self, delay: Duration) -> Result<(), Interrupt> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Interrupt::Canceled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    pub(crate) async fn invoke<I: Send + 'static, O: 'static>(
        &self,
        step: StepInstance<I, O>,
        input: I,
    ) -> Result<O, Interrupt> {
        run_step(step, input, self.cancel, self.options.step_timeout).await
    }
}

/// Invokes one step, applying the timeout to asynchronous shapes.
///
/// A failure observed after cancellation counts as cancellation.
pub(crate) async fn run_step<I: Send + 'static, O: 'static>(
    step: StepInstance<I, O>,
    input: I,
    cancel: &CancellationToken,
    limit: Option<Duration>,
) -> Result<O, Interrupt> {
    let name = step.name().clone();
    let outcome = match limit {
        Some(limit) if step.is_async() => match timeout(limit, step.invoke(input, cancel)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Step '{}' timed out after {:?}", name, limit);
                return Err(Interrupt::Failed(WorkflowError::Timeout { step_name: name }));
            }
        },
        _ => step.invoke(input, cancel).await,
    };
    outcome.map_err(|error| {
        if cancel.is_cancelled() {
            Interrupt::Canceled
        } else {
            warn!("Step '{}' failed: {}", name, error);
            WorkflowError::from_step(name, error).into()
        }
    })
}

/// One erased stage of a chain.
#[async_trait]
pub(crate) trait Node<C>: Send + Sync {
    async fn execute(
        &self,
        input: Payload,
        scope: &Scope<'_, C>,
        upstream: Option<&Upstream<'_, C>>,
    ) -> Result<Payload, Interrupt>;

    /// How to copy the input of the node before this one, if this node may
    /// ask for it to be replayed.
    fn replay_input(&self) -> Option<CloneFn> {
        None
    }
}

/// Replayable copies of stage inputs, indexed like the pipeline's nodes.
type Saved = [Option<(Payload, CloneFn)>];

/// The stage preceding a node, kept so it can be run again.
pub(crate) struct Upstream<'a, C> {
    nodes: &'a [Box<dyn Node<C>>],
    saved: &'a Saved,
    index: usize,
}

impl<'a, C> Upstream<'a, C> {
    /// The upstream of the node at `index`, if its predecessor kept a copy
    /// of its input.
    fn of(nodes: &'a [Box<dyn Node<C>>], saved: &'a Saved, index: usize) -> Option<Self> {
        let previous = index.checked_sub(1)?;
        match saved.get(previous) {
            Some(Some(_)) => Some(Self {
                nodes,
                saved,
                index: previous,
            }),
            _ => None,
        }
    }

    /// Runs the preceding stage again with a copy of its last input.
    ///
    /// The stage sees its own upstream, so a retry inside it can replay
    /// further back.
    pub(crate) async fn replay(&self, scope: &Scope<'_, C>) -> Result<Payload, Interrupt> {
        let (input, clone) = match self.saved.get(self.index) {
            Some(Some((input, clone))) => (input, *clone),
            _ => {
                return Err(Interrupt::Failed(WorkflowError::Configuration(
                    "no input was kept for the preceding stage".to_string(),
                )))
            }
        };
        let node = match self.nodes.get(self.index) {
            Some(node) => node,
            None => {
                return Err(Interrupt::Failed(WorkflowError::Configuration(
                    "the preceding stage is missing".to_string(),
                )))
            }
        };
        let parent = Upstream::of(self.nodes, self.saved, self.index);
        node.execute(clone(input)?, scope, parent.as_ref()).await
    }
}

/// An ordered list of nodes, each feeding the next.
pub(crate) struct Pipeline<C> {
    nodes: Vec<Box<dyn Node<C>>>,
}

impl<C> Default for Pipeline<C> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<C> Pipeline<C> {
    pub(crate) fn push(&mut self, node: Box<dyn Node<C>>) {
        self.nodes.push(node);
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) async fn walk(
        &self,
        mut value: Payload,
        scope: &Scope<'_, C>,
    ) -> Result<Payload, Interrupt> {
        let mut saved: Vec<Option<(Payload, CloneFn)>> = Vec::with_capacity(self.nodes.len());
        for (index, node) in self.nodes.iter().enumerate() {
            scope.checkpoint()?;
            let copy = match self.nodes.get(index + 1).and_then(|next| next.replay_input()) {
                Some(clone) => Some((clone(&value)?, clone)),
                None => None,
            };
            let upstream = Upstream::of(&self.nodes, &saved, index);
            value = node.execute(value, scope, upstream.as_ref()).await?;
            saved.push(copy);
        }
        Ok(value)
    }
}

/// A single step stage.
pub(crate) struct StageNode<C, I, O> {
    factory: Factory<C, I, O>,
}

impl<C, I, O> StageNode<C, I, O> {
    pub(crate) fn new(factory: Factory<C, I, O>) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl<C, I, O> Node<C> for StageNode<C, I, O>
where
    C: Send + Sync + 'static,
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    async fn execute(
        &self,
        input: Payload,
        scope: &Scope<'_, C>,
        _upstream: Option<&Upstream<'_, C>>,
    ) -> Result<Payload, Interrupt> {
        scope.checkpoint()?;
        let input = input.downcast::<I>()?;
        let step = (self.factory)(scope.context);
        let name: StepName = step.name().clone();
        debug!("Dispatching step '{}'", name);
        let output = scope.invoke(step, input).await?;
        info!("Step '{}' completed successfully", name);
        Ok(Payload::new(output))
    }
}

/// Recovers a typed value from the erased output of a conditional block.
pub(crate) struct CastNode<T> {
    _target: PhantomData<fn() -> T>,
}

impl<T> CastNode<T> {
    pub(crate) fn new() -> Self {
        Self {
            _target: PhantomData,
        }
    }
}

#[async_trait]
impl<C, T> Node<C> for CastNode<T>
where
    C: Send + Sync + 'static,
    T: Any + Send + Sync,
{
    async fn execute(
        &self,
        input: Payload,
        _scope: &Scope<'_, C>,
        _upstream: Option<&Upstream<'_, C>>,
    ) -> Result<Payload, Interrupt> {
        let value = input.downcast::<T>()?;
        Ok(Payload::new(value))
    }
}
