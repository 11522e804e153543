//! Strongly typed chain builder.

use crate::chain::{CastNode, Factory, Pipeline, StageNode};
use crate::conditional::{BranchBuilder, Open};
use crate::parallel::{ParallelFactory, ParallelNode};
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use tsunagi_core::{IntoAsyncStep, IntoStep, Payload};

pub(crate) fn sync_factory<C, I, O, F, S, M>(factory: F) -> Factory<C, I, O>
where
    F: Fn() -> S + Send + Sync + 'static,
    S: IntoStep<I, O, M>,
{
    Arc::new(move |_: &C| <S as IntoStep<I, O, M>>::into_step(factory()))
}

pub(crate) fn sync_ctx_factory<C, I, O, F, S, M>(factory: F) -> Factory<C, I, O>
where
    F: Fn(&C) -> S + Send + Sync + 'static,
    S: IntoStep<I, O, M>,
{
    Arc::new(move |ctx: &C| <S as IntoStep<I, O, M>>::into_step(factory(ctx)))
}

pub(crate) fn async_factory<C, I, O, F, S, M>(factory: F) -> Factory<C, I, O>
where
    F: Fn() -> S + Send + Sync + 'static,
    S: IntoAsyncStep<I, O, M>,
{
    Arc::new(move |_: &C| <S as IntoAsyncStep<I, O, M>>::into_step(factory()))
}

pub(crate) fn async_ctx_factory<C, I, O, F, S, M>(factory: F) -> Factory<C, I, O>
where
    F: Fn(&C) -> S + Send + Sync + 'static,
    S: IntoAsyncStep<I, O, M>,
{
    Arc::new(move |ctx: &C| <S as IntoAsyncStep<I, O, M>>::into_step(factory(ctx)))
}

/// Entry point handed to the build callback of
/// [`Workflow::new`](crate::Workflow::new).
///
/// Every factory is invoked once per execution of its stage, so each run
/// gets fresh step instances. The `_ctx` variants receive the workflow
/// context.
pub struct WorkflowBuilder<C> {
    _context: PhantomData<fn(&C)>,
}

impl<C> std::fmt::Debug for WorkflowBuilder<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowBuilder").finish()
    }
}

impl<C: Send + Sync + 'static> WorkflowBuilder<C> {
    pub(crate) fn new() -> Self {
        Self {
            _context: PhantomData,
        }
    }

    /// Starts the chain with a synchronous step.
    pub fn start_with<F, S, O, M>(self, factory: F) -> Chain<C, O>
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: IntoStep<(), O, M>,
        O: Send + Sync + 'static,
    {
        Chain::head(sync_factory::<C, (), O, F, S, M>(factory))
    }

    /// Starts the chain with a synchronous step built from the context.
    pub fn start_with_ctx<F, S, O, M>(self, factory: F) -> Chain<C, O>
    where
        F: Fn(&C) -> S + Send + Sync + 'static,
        S: IntoStep<(), O, M>,
        O: Send + Sync + 'static,
    {
        Chain::head(sync_ctx_factory::<C, (), O, F, S, M>(factory))
    }

    /// Starts the chain with an asynchronous step.
    pub fn start_with_async<F, S, O, M>(self, factory: F) -> Chain<C, O>
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: IntoAsyncStep<(), O, M>,
        O: Send + Sync + 'static,
    {
        Chain::head(async_factory::<C, (), O, F, S, M>(factory))
    }

    /// Starts the chain with an asynchronous step built from the context.
    pub fn start_with_async_ctx<F, S, O, M>(self, factory: F) -> Chain<C, O>
    where
        F: Fn(&C) -> S + Send + Sync + 'static,
        S: IntoAsyncStep<(), O, M>,
        O: Send + Sync + 'static,
    {
        Chain::head(async_ctx_factory::<C, (), O, F, S, M>(factory))
    }
}

/// A chain of stages whose last stage produces `O`.
///
/// `L` is the input type of the last stage; a retry branch that follows
/// replays that stage with a copy of its input, so `L` must be `Clone`
/// for `retry` to be available.
#[must_use = "a chain does nothing until it is returned to Workflow::new"]
pub struct Chain<C, O, L = ()> {
    pipeline: Pipeline<C>,
    _types: PhantomData<fn() -> (O, L)>,
}

impl<C, O, L> std::fmt::Debug for Chain<C, O, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("stages", &self.pipeline.len())
            .field("output", &std::any::type_name::<O>())
            .finish()
    }
}

impl<C, O, L> Chain<C, O, L> {
    pub(crate) fn from_pipeline(pipeline: Pipeline<C>) -> Self {
        Self {
            pipeline,
            _types: PhantomData,
        }
    }

    pub(crate) fn into_pipeline(self) -> Pipeline<C> {
        self.pipeline
    }
}

impl<C, O> Chain<C, O>
where
    C: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    fn head(factory: Factory<C, (), O>) -> Self {
        let mut pipeline = Pipeline::default();
        pipeline.push(Box::new(StageNode::new(factory)));
        Self::from_pipeline(pipeline)
    }
}

impl<C, O, L> Chain<C, O, L>
where
    C: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    fn stage<R>(mut self, factory: Factory<C, O, R>) -> Chain<C, R, O>
    where
        R: Send + Sync + 'static,
    {
        self.pipeline.push(Box::new(StageNode::new(factory)));
        Chain::from_pipeline(self.pipeline)
    }

    /// Appends a synchronous step fed by the previous stage's output.
    pub fn then<F, S, R, M>(self, factory: F) -> Chain<C, R, O>
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: IntoStep<O, R, M>,
        R: Send + Sync + 'static,
    {
        self.stage(sync_factory::<C, O, R, F, S, M>(factory))
    }

    /// Appends a synchronous step built from the context.
    pub fn then_ctx<F, S, R, M>(self, factory: F) -> Chain<C, R, O>
    where
        F: Fn(&C) -> S + Send + Sync + 'static,
        S: IntoStep<O, R, M>,
        R: Send + Sync + 'static,
    {
        self.stage(sync_ctx_factory::<C, O, R, F, S, M>(factory))
    }

    /// Appends an asynchronous step fed by the previous stage's output.
    pub fn then_async<F, S, R, M>(self, factory: F) -> Chain<C, R, O>
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: IntoAsyncStep<O, R, M>,
        R: Send + Sync + 'static,
    {
        self.stage(async_factory::<C, O, R, F, S, M>(factory))
    }

    /// Appends an asynchronous step built from the context.
    pub fn then_async_ctx<F, S, R, M>(self, factory: F) -> Chain<C, R, O>
    where
        F: Fn(&C) -> S + Send + Sync + 'static,
        S: IntoAsyncStep<O, R, M>,
        R: Send + Sync + 'static,
    {
        self.stage(async_ctx_factory::<C, O, R, F, S, M>(factory))
    }

    /// Fans the previous output out to every step the factory returns.
    ///
    /// The steps run concurrently on the runtime, each with its own copy of
    /// the input. Outputs are collected in the order the factory listed the
    /// steps, whatever order they finish in.
    pub fn parallel<F, It, S, R, M>(self, factory: F) -> Chain<C, Vec<R>, O>
    where
        O: Clone,
        F: Fn() -> It + Send + Sync + 'static,
        It: IntoIterator<Item = S>,
        S: IntoAsyncStep<O, R, M>,
        R: Send + Sync + 'static,
    {
        let factory: ParallelFactory<C, O, R> = Arc::new(move |_: &C| {
            factory()
                .into_iter()
                .map(<S as IntoAsyncStep<O, R, M>>::into_step)
                .collect::<Vec<_>>()
        });
        self.fan_out(factory)
    }

    /// Like [`parallel`](Self::parallel), with the context available to
    /// the factory.
    pub fn parallel_ctx<F, It, S, R, M>(self, factory: F) -> Chain<C, Vec<R>, O>
    where
        O: Clone,
        F: Fn(&C) -> It + Send + Sync + 'static,
        It: IntoIterator<Item = S>,
        S: IntoAsyncStep<O, R, M>,
        R: Send + Sync + 'static,
    {
        let factory: ParallelFactory<C, O, R> = Arc::new(move |ctx: &C| {
            factory(ctx)
                .into_iter()
                .map(<S as IntoAsyncStep<O, R, M>>::into_step)
                .collect::<Vec<_>>()
        });
        self.fan_out(factory)
    }

    fn fan_out<R>(mut self, factory: ParallelFactory<C, O, R>) -> Chain<C, Vec<R>, O>
    where
        O: Clone,
        R: Send + Sync + 'static,
    {
        self.pipeline.push(Box::new(ParallelNode::new(factory)));
        Chain::from_pipeline(self.pipeline)
    }

    /// Opens a conditional block whose first branch runs when `predicate`
    /// holds for the previous output.
    pub fn when<Pred>(self, predicate: Pred) -> BranchBuilder<C, O, L, Open>
    where
        Pred: Fn(&O) -> bool + Send + Sync + 'static,
    {
        BranchBuilder::first(self.pipeline, Box::new(predicate))
    }
}

impl<C, L> Chain<C, Payload, L>
where
    C: Send + Sync + 'static,
{
    /// Recovers a typed value from the output of a conditional block.
    ///
    /// Fails the run with `TypeMismatch` if the branch that ran produced
    /// something else.
    pub fn cast<T>(mut self) -> Chain<C, T, Payload>
    where
        T: Any + Send + Sync,
    {
        self.pipeline.push(Box::new(CastNode::<T>::new()));
        Chain::from_pipeline(self.pipeline)
    }
}
