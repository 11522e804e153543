//! Concurrent fan-out of asynchronous steps sharing one input.

use crate::chain::{run_step, Interrupt, Node, Scope, Upstream};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tsunagi_core::{Payload, StepInstance, WorkflowError};

/// Builds the steps of one parallel stage execution.
pub(crate) type ParallelFactory<C, I, O> =
    Arc<dyn Fn(&C) -> Vec<StepInstance<I, O>> + Send + Sync>;

pub(crate) struct ParallelNode<C, I, O> {
    factory: ParallelFactory<C, I, O>,
}

impl<C, I, O> ParallelNode<C, I, O> {
    pub(crate) fn new(factory: ParallelFactory<C, I, O>) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl<C, I, O> Node<C> for ParallelNode<C, I, O>
where
    C: Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
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
        let steps = (self.factory)(scope.context);
        scope.checkpoint()?;

        debug!("Starting {} parallel steps", steps.len());
        let limit = scope.options.step_timeout;
        let mut handles: Vec<JoinHandle<Result<O, Interrupt>>> = steps
            .into_iter()
            .map(|step| {
                let input = input.clone();
                let cancel = scope.cancel.clone();
                tokio::spawn(async move { run_step(step, input, &cancel, limit).await })
            })
            .collect();

        let joined = tokio::select! {
            biased;
            _ = scope.cancel.cancelled() => None,
            joined = join_all(handles.iter_mut()) => Some(joined),
        };
        let Some(joined) = joined else {
            warn!("Parallel stage canceled, aborting {} steps", handles.len());
            for handle in &handles {
                handle.abort();
            }
            return Err(Interrupt::Canceled);
        };
        // A fault and a cancellation seen together resolve to cancellation.
        scope.checkpoint()?;

        let mut outputs = Vec::with_capacity(joined.len());
        for outcome in joined {
            match outcome {
                Ok(Ok(output)) => outputs.push(output),
                Ok(Err(interrupt)) => return Err(interrupt),
                Err(error) => {
                    return Err(Interrupt::Failed(WorkflowError::Join(error.to_string())));
                }
            }
        }
        info!("Parallel stage completed with {} results", outputs.len());
        Ok(Payload::new(outputs))
    }
}
