//! The workflow driver: builds a chain once and runs it on demand.

use crate::builder::{Chain, WorkflowBuilder};
use crate::chain::{Interrupt, Pipeline, Scope};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::{Builder, Handle};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tsunagi_core::{CancellationToken, Payload, WorkflowError, WorkflowOptions, WorkflowResult};

/// A composed chain of steps bound to a context value.
///
/// The chain is built exactly once, when the workflow is constructed. Every
/// `run` walks the same chain with fresh step instances.
///
/// # Examples
///
/// ```
/// use tsunagi::prelude::*;
///
/// struct Seed;
///
/// impl Step<u32> for Seed {
///     fn run(&mut self, _cancel: &CancellationToken) -> StepResult<u32> {
///         Ok(20)
///     }
/// }
///
/// struct AddTwo;
///
/// impl InputStep<u32, u32> for AddTwo {
///     fn run(&mut self, input: u32, _cancel: &CancellationToken) -> StepResult<u32> {
///         Ok(input + 2)
///     }
/// }
///
/// let workflow = Workflow::new((), |builder| builder.start_with(|| Seed).then(|| AddTwo));
/// let result = workflow.run(&CancellationToken::new())?;
/// assert_eq!(result.output(), Some(&22));
/// # Ok::<(), WorkflowError>(())
/// ```
pub struct Workflow<C, T> {
    context: Arc<C>,
    pipeline: Pipeline<C>,
    options: WorkflowOptions,
    _output: PhantomData<fn() -> T>,
}

impl<C, T> fmt::Debug for Workflow<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("stages", &self.pipeline.len())
            .field("options", &self.options)
            .finish()
    }
}

impl<C, T> Workflow<C, T>
where
    C: Send + Sync + 'static,
    T: Send + 'static,
{
    /// Creates a workflow over `context`, building the chain with `build`.
    pub fn new<L, F>(context: C, build: F) -> Self
    where
        F: FnOnce(WorkflowBuilder<C>) -> Chain<C, T, L>,
    {
        Self::with_context(Arc::new(context), build)
    }

    /// Like [`new`](Self::new), sharing an existing context.
    pub fn with_context<L, F>(context: Arc<C>, build: F) -> Self
    where
        F: FnOnce(WorkflowBuilder<C>) -> Chain<C, T, L>,
    {
        let pipeline = build(WorkflowBuilder::new()).into_pipeline();
        Self {
            context,
            pipeline,
            options: WorkflowOptions::default(),
            _output: PhantomData,
        }
    }

    /// Replaces the run options.
    pub fn with_options(mut self, options: WorkflowOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the context value.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Returns the run options.
    pub fn options(&self) -> &WorkflowOptions {
        &self.options
    }

    /// Runs the chain to completion.
    ///
    /// Cancellation and `stop` branches yield a canceled result. Any other
    /// error yields a faulted result, or is returned as `Err` when
    /// [`WorkflowOptions::rethrow`] is set.
    pub async fn run_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<WorkflowResult<T>, WorkflowError> {
        let started = Instant::now();
        let scope = Scope {
            context: self.context.as_ref(),
            cancel,
            options: &self.options,
        };
        let outcome = self.pipeline.walk(Payload::new(()), &scope).await;
        let duration = started.elapsed();

        match outcome {
            Ok(output) => match output.downcast::<T>() {
                Ok(output) => {
                    info!("Workflow completed in {:?}", duration);
                    Ok(WorkflowResult::completed(output, duration))
                }
                Err(error) => self.fault(error, duration),
            },
            Err(Interrupt::Canceled) => {
                warn!("Workflow was canceled after {:?}", duration);
                Ok(WorkflowResult::canceled(duration))
            }
            Err(Interrupt::Stopped) if self.options.strict_stop => {
                self.fault(WorkflowError::Stopped, duration)
            }
            Err(Interrupt::Stopped) => {
                info!("Workflow stopped after {:?}", duration);
                Ok(WorkflowResult::canceled(duration))
            }
            Err(Interrupt::Failed(error)) => self.fault(error, duration),
        }
    }

    /// Blocking counterpart of [`run_async`](Self::run_async).
    ///
    /// Outside a runtime this drives the chain on a private current-thread
    /// runtime. Inside one it does the same on a scoped helper thread, so
    /// the caller's runtime is never re-entered.
    pub fn run(&self, cancel: &CancellationToken) -> Result<WorkflowResult<T>, WorkflowError> {
        if Handle::try_current().is_err() {
            return self.block_on(cancel);
        }
        std::thread::scope(|scope| {
            match scope.spawn(|| self.block_on(cancel)).join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        })
    }

    /// Runs the workflow as a task on the current runtime.
    pub fn spawn(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<WorkflowResult<T>, WorkflowError>> {
        tokio::spawn(async move { self.run_async(&cancel).await })
    }

    /// Drives [`run_async`](Self::run_async) on `handle` from a thread
    /// that may block, such as one from the blocking pool.
    pub(crate) fn run_on(
        &self,
        handle: &Handle,
        cancel: &CancellationToken,
    ) -> Result<WorkflowResult<T>, WorkflowError> {
        handle.block_on(self.run_async(cancel))
    }

    fn block_on(&self, cancel: &CancellationToken) -> Result<WorkflowResult<T>, WorkflowError> {
        match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime.block_on(self.run_async(cancel)),
            Err(error) => self.fault(WorkflowError::Runtime(error), Duration::ZERO),
        }
    }

    fn fault(
        &self,
        error: WorkflowError,
        duration: Duration,
    ) -> Result<WorkflowResult<T>, WorkflowError> {
        warn!("Workflow faulted after {:?}: {}", duration, error);
        if self.options.rethrow {
            Err(error)
        } else {
            Ok(WorkflowResult::faulted(error, duration))
        }
    }
}
