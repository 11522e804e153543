//! Conditional blocks: ordered predicates, each with one action.
//!
//! A block is opened with [`Chain::when`](crate::Chain::when), extended with
//! [`else_when`](Conditional::else_when) and
//! [`otherwise`](Conditional::otherwise), and closed with
//! [`end_when`](Conditional::end_when). Each predicate is followed by exactly
//! one action from [`BranchBuilder`]. After `otherwise` no further branch can
//! be added.

use crate::builder::{async_ctx_factory, async_factory, sync_ctx_factory, sync_factory, Chain};
use crate::chain::{CloneFn, Factory, Interrupt, Node, Pipeline, Scope, StageNode, Upstream};
use async_trait::async_trait;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::{debug, info, warn};
use tsunagi_core::{
    clone_payload, IntoAsyncStep, IntoStep, NoMatchPolicy, Payload, RetryPolicy, StepError,
    WorkflowError,
};

type Predicate<P> = Box<dyn Fn(&P) -> bool + Send + Sync>;

/// More branches may follow.
#[derive(Debug)]
pub struct Open;

/// An `otherwise` branch was added; only `end_when` remains.
#[derive(Debug)]
pub struct Closed;

enum Action<C> {
    Continue(Box<dyn Node<C>>),
    Stop,
    Throw(Box<dyn Fn() -> StepError + Send + Sync>),
    Retry(RetryPolicy),
}

struct Branch<C, P> {
    predicate: Predicate<P>,
    action: Action<C>,
}

/// A conditional block under construction, testing values of type `P`.
#[must_use = "close the block with end_when"]
pub struct Conditional<C, P, L, S> {
    pipeline: Pipeline<C>,
    branches: Vec<Branch<C, P>>,
    replay: Option<CloneFn>,
    _state: PhantomData<fn() -> (L, S)>,
}

/// A branch predicate waiting for its action.
#[must_use = "a branch needs an action"]
pub struct BranchBuilder<C, P, L, S> {
    conditional: Conditional<C, P, L, S>,
    predicate: Predicate<P>,
}

impl<C, P, L> BranchBuilder<C, P, L, Open> {
    pub(crate) fn first(pipeline: Pipeline<C>, predicate: Predicate<P>) -> Self {
        Self {
            conditional: Conditional {
                pipeline,
                branches: Vec::new(),
                replay: None,
                _state: PhantomData,
            },
            predicate,
        }
    }
}

impl<C, P, L, S> BranchBuilder<C, P, L, S>
where
    C: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    fn action(self, action: Action<C>) -> Conditional<C, P, L, S> {
        let mut conditional = self.conditional;
        conditional.branches.push(Branch {
            predicate: self.predicate,
            action,
        });
        conditional
    }

    fn continue_with<R>(self, factory: Factory<C, P, R>) -> Conditional<C, P, L, S>
    where
        R: Send + Sync + 'static,
    {
        self.action(Action::Continue(Box::new(StageNode::new(factory))))
    }

    /// Runs a synchronous step on the matched value.
    pub fn then<F, St, R, M>(self, factory: F) -> Conditional<C, P, L, S>
    where
        F: Fn() -> St + Send + Sync + 'static,
        St: IntoStep<P, R, M>,
        R: Send + Sync + 'static,
    {
        self.continue_with(sync_factory::<C, P, R, F, St, M>(factory))
    }

    /// Runs a synchronous step, built from the context, on the matched value.
    pub fn then_ctx<F, St, R, M>(self, factory: F) -> Conditional<C, P, L, S>
    where
        F: Fn(&C) -> St + Send + Sync + 'static,
        St: IntoStep<P, R, M>,
        R: Send + Sync + 'static,
    {
        self.continue_with(sync_ctx_factory::<C, P, R, F, St, M>(factory))
    }

    /// Runs an asynchronous step on the matched value.
    pub fn then_async<F, St, R, M>(self, factory: F) -> Conditional<C, P, L, S>
    where
        F: Fn() -> St + Send + Sync + 'static,
        St: IntoAsyncStep<P, R, M>,
        R: Send + Sync + 'static,
    {
        self.continue_with(async_factory::<C, P, R, F, St, M>(factory))
    }

    /// Runs an asynchronous step, built from the context, on the matched value.
    pub fn then_async_ctx<F, St, R, M>(self, factory: F) -> Conditional<C, P, L, S>
    where
        F: Fn(&C) -> St + Send + Sync + 'static,
        St: IntoAsyncStep<P, R, M>,
        R: Send + Sync + 'static,
    {
        self.continue_with(async_ctx_factory::<C, P, R, F, St, M>(factory))
    }

    /// Ends the run early. The result is reported as canceled.
    pub fn stop(self) -> Conditional<C, P, L, S> {
        self.action(Action::Stop)
    }

    /// Fails the run with the error built by `error`.
    pub fn throw<F, E>(self, error: F) -> Conditional<C, P, L, S>
    where
        F: Fn() -> E + Send + Sync + 'static,
        E: Into<StepError>,
    {
        self.action(Action::Throw(Box::new(move || error().into())))
    }

    /// Runs the stage before the block again, at most `max_attempts`
    /// times, waiting `delay` before each attempt.
    ///
    /// Every replay feeds its output back into this block, starting from
    /// the first branch. Once the attempts are used up the run fails with
    /// `MaxRetriesExceeded`.
    pub fn retry(self, delay: Duration, max_attempts: u32) -> Conditional<C, P, L, S>
    where
        L: Clone + Send + Sync + 'static,
    {
        self.retry_with(RetryPolicy::fixed(max_attempts, delay))
    }

    /// Like [`retry`](Self::retry), with the delays and attempt budget
    /// taken from `policy`.
    pub fn retry_with(self, policy: RetryPolicy) -> Conditional<C, P, L, S>
    where
        L: Clone + Send + Sync + 'static,
    {
        let mut conditional = self.action(Action::Retry(policy));
        conditional.replay = Some(clone_payload::<L> as CloneFn);
        conditional
    }
}

impl<C, P, L> Conditional<C, P, L, Open>
where
    C: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    /// Adds a branch tried when every earlier predicate failed.
    pub fn else_when<Pred>(self, predicate: Pred) -> BranchBuilder<C, P, L, Open>
    where
        Pred: Fn(&P) -> bool + Send + Sync + 'static,
    {
        BranchBuilder {
            conditional: self,
            predicate: Box::new(predicate),
        }
    }

    /// Adds the catch-all branch.
    pub fn otherwise(self) -> BranchBuilder<C, P, L, Closed> {
        BranchBuilder {
            conditional: Conditional {
                pipeline: self.pipeline,
                branches: self.branches,
                replay: self.replay,
                _state: PhantomData,
            },
            predicate: Box::new(|_: &P| true),
        }
    }
}

impl<C, P, L, S> Conditional<C, P, L, S>
where
    C: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    /// Closes the block.
    ///
    /// The output is whatever the matched branch produced, erased into a
    /// [`Payload`]; use [`Chain::cast`] to get a typed value back.
    pub fn end_when(self) -> Chain<C, Payload, P> {
        let mut pipeline = self.pipeline;
        pipeline.push(Box::new(ConditionalNode {
            branches: self.branches,
            replay: self.replay,
        }));
        Chain::from_pipeline(pipeline)
    }
}

pub(crate) struct ConditionalNode<C, P> {
    branches: Vec<Branch<C, P>>,
    replay: Option<CloneFn>,
}

#[async_trait]
impl<C, P> Node<C> for ConditionalNode<C, P>
where
    C: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    async fn execute(
        &self,
        input: Payload,
        scope: &Scope<'_, C>,
        upstream: Option<&Upstream<'_, C>>,
    ) -> Result<Payload, Interrupt> {
        // Retry budgets live for one execution only.
        let mut remaining: Vec<u32> = self
            .branches
            .iter()
            .map(|branch| match &branch.action {
                Action::Retry(policy) => policy.max_retries(),
                _ => 0,
            })
            .collect();
        let mut value = input.downcast::<P>()?;

        loop {
            let matched = self
                .branches
                .iter()
                .enumerate()
                .find(|(_, branch)| (branch.predicate)(&value));
            let Some((index, branch)) = matched else {
                return match scope.options.no_match {
                    NoMatchPolicy::Fail => {
                        warn!("No condition was met");
                        Err(Interrupt::Failed(WorkflowError::NoConditionMatched))
                    }
                    NoMatchPolicy::PassThrough => {
                        debug!("No condition was met, passing value through");
                        Ok(Payload::new(value))
                    }
                };
            };
            scope.checkpoint()?;
            debug!("Branch {} matched", index);

            match &branch.action {
                Action::Continue(node) => {
                    return node.execute(Payload::new(value), scope, None).await;
                }
                Action::Stop => {
                    warn!("Workflow stopped by branch {}", index);
                    return Err(Interrupt::Stopped);
                }
                Action::Throw(raise) => {
                    let error = raise();
                    warn!("Branch {} raised: {}", index, error);
                    return Err(Interrupt::Failed(WorkflowError::Raised(error)));
                }
                Action::Retry(policy) => {
                    let max = policy.max_retries();
                    let attempt = match remaining.get_mut(index) {
                        Some(left) if *left > 0 => {
                            *left -= 1;
                            max - *left - 1
                        }
                        _ => {
                            warn!("Branch {} exhausted {} retries", index, max);
                            return Err(Interrupt::Failed(WorkflowError::MaxRetriesExceeded {
                                attempts: max,
                            }));
                        }
                    };
                    let Some(upstream) = upstream else {
                        return Err(Interrupt::Failed(WorkflowError::Configuration(
                            "retry requires a preceding stage".to_string(),
                        )));
                    };
                    info!("Retrying previous stage ({}/{})", attempt + 1, max);
                    if let Some(delay) = policy.delay_for_attempt(attempt) {
                        scope.sleep(delay).await?;
                    }
                    value = upstream.replay(scope).await?.downcast::<P>()?;
                }
            }
        }
    }

    fn replay_input(&self) -> Option<CloneFn> {
        self.replay
    }
}
