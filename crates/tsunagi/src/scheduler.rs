//! Repeated, timer-driven execution of a workflow.

use crate::schedule::{ClockMark, SchedulerTiming};
use crate::workflow::Workflow;
use chrono::Local;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};
use tsunagi_core::{CancellationToken, WorkflowError, WorkflowResult};

/// How often a clock mark is compared against the wall clock.
const CLOCK_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pause after a repeating clock mark fires, so the same minute is not
/// matched twice.
const CLOCK_REPEAT_PAUSE: Duration = Duration::from_secs(60);

/// Stand-in deadline for intervals too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

type WorkflowFactory<C, T> = Arc<dyn Fn() -> Workflow<C, T> + Send + Sync>;
type ExecutedCallback<T> = Arc<dyn Fn(&WorkflowResult<T>) + Send + Sync>;

/// Runs a freshly built workflow on a timer.
///
/// Each setting can be applied once; applying it again, or configuring a
/// second timing, is a configuration error. Runs never overlap: a run that
/// outlasts its interval delays the next one.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use tsunagi::prelude::*;
///
/// struct Ping;
///
/// impl Step<()> for Ping {
///     fn run(&mut self, _cancel: &CancellationToken) -> StepResult<()> {
///         Ok(())
///     }
/// }
///
/// # async fn demo() -> Result<(), WorkflowError> {
/// let mut scheduler = WorkflowScheduler::new();
/// scheduler
///     .use_factory(|| Workflow::new((), |builder| builder.start_with(|| Ping)))?
///     .configure(SchedulerTiming::Frequency(Duration::from_secs(30)))?
///     .on_executed(|result| println!("{}", result.message()));
///
/// let handle = scheduler.start(&CancellationToken::new())?;
/// scheduler.stop();
/// let _ = handle.await;
/// # Ok(())
/// # }
/// ```
pub struct WorkflowScheduler<C, T> {
    factory: Option<WorkflowFactory<C, T>>,
    timing: Option<SchedulerTiming>,
    execution_limit: Option<u32>,
    execute_async: Option<bool>,
    on_executed: Option<ExecutedCallback<T>>,
    shutdown: CancellationToken,
    started: bool,
}

impl<C, T> fmt::Debug for WorkflowScheduler<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowScheduler")
            .field("timing", &self.timing)
            .field("execution_limit", &self.execution_limit)
            .field("execute_async", &self.execute_async)
            .field("started", &self.started)
            .finish()
    }
}

impl<C, T> Default for WorkflowScheduler<C, T> {
    fn default() -> Self {
        Self {
            factory: None,
            timing: None,
            execution_limit: None,
            execute_async: None,
            on_executed: None,
            shutdown: CancellationToken::new(),
            started: false,
        }
    }
}

fn already_set(what: &str) -> WorkflowError {
    WorkflowError::Configuration(format!(
        "{} cannot be changed once it has been set",
        what
    ))
}

impl<C, T> WorkflowScheduler<C, T>
where
    C: Send + Sync + 'static,
    T: Send + 'static,
{
    /// Creates an unconfigured scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the factory that builds the workflow for each run.
    pub fn use_factory<F>(&mut self, factory: F) -> Result<&mut Self, WorkflowError>
    where
        F: Fn() -> Workflow<C, T> + Send + Sync + 'static,
    {
        if self.factory.is_some() {
            return Err(already_set("the workflow factory"));
        }
        self.factory = Some(Arc::new(factory));
        Ok(self)
    }

    /// Sets when runs happen.
    pub fn configure(&mut self, timing: SchedulerTiming) -> Result<&mut Self, WorkflowError> {
        if self.timing.is_some() {
            return Err(already_set("the scheduler timing"));
        }
        timing.validate()?;
        self.timing = Some(timing);
        Ok(self)
    }

    /// Stops the scheduler after `runs` runs.
    pub fn execution_limit(&mut self, runs: u32) -> Result<&mut Self, WorkflowError> {
        if self.execution_limit.is_some() {
            return Err(already_set("the execution limit"));
        }
        self.execution_limit = Some(runs);
        Ok(self)
    }

    /// Chooses between `run_async` on the scheduler task (`true`) and a
    /// blocking run on the blocking pool (`false`, the default). Blocking
    /// runs are driven on the scheduler's own runtime.
    pub fn execute_async(&mut self, execute_async: bool) -> Result<&mut Self, WorkflowError> {
        if self.execute_async.is_some() {
            return Err(already_set("the execution mode"));
        }
        self.execute_async = Some(execute_async);
        Ok(self)
    }

    /// Registers a callback invoked with the result of every run.
    pub fn on_executed<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&WorkflowResult<T>) + Send + Sync + 'static,
    {
        self.on_executed = Some(Arc::new(callback));
        self
    }

    /// Starts the background loop on the current runtime.
    ///
    /// The loop ends when `cancel` fires, when [`stop`](Self::stop) is
    /// called or the scheduler is dropped, when the execution limit is
    /// reached, or after a non-repeating clock mark fires.
    pub fn start(&mut self, cancel: &CancellationToken) -> Result<JoinHandle<()>, WorkflowError> {
        if self.started {
            return Err(WorkflowError::Configuration(
                "the scheduler has already been started".to_string(),
            ));
        }
        let factory = self.factory.clone().ok_or_else(|| {
            WorkflowError::Configuration("a workflow factory must be set".to_string())
        })?;
        let timing = self.timing.ok_or_else(|| {
            WorkflowError::Configuration("a frequency or clock mark must be set".to_string())
        })?;
        self.started = true;

        let ticker = Ticker {
            factory,
            execution_limit: self.execution_limit,
            execute_async: self.execute_async.unwrap_or(false),
            on_executed: self.on_executed.clone(),
            cancel: cancel.clone(),
            shutdown: self.shutdown.clone(),
            executions: 0,
        };
        info!("Starting scheduler with {:?}", timing);
        Ok(tokio::spawn(ticker.run(timing)))
    }

    /// Stops the loop. A run in progress is left to finish.
    pub fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            debug!("Stopping scheduler");
            self.shutdown.cancel();
        }
    }
}

impl<C, T> Drop for WorkflowScheduler<C, T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// `now + interval`, saturating to a far-future deadline instead of
/// overflowing.
fn deadline_after(interval: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(interval).unwrap_or_else(|| {
        debug!("Interval {:?} is out of range, waiting for shutdown only", interval);
        now + FAR_FUTURE
    })
}

struct Ticker<C, T> {
    factory: WorkflowFactory<C, T>,
    execution_limit: Option<u32>,
    execute_async: bool,
    on_executed: Option<ExecutedCallback<T>>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
    executions: u32,
}

impl<C, T> Ticker<C, T>
where
    C: Send + Sync + 'static,
    T: Send + 'static,
{
    async fn run(mut self, timing: SchedulerTiming) {
        match timing {
            SchedulerTiming::Frequency(interval) => self.run_frequency(interval).await,
            SchedulerTiming::AtClock(mark) => self.run_clock(mark).await,
        }
        info!("Scheduler finished after {} runs", self.executions);
    }

    fn halted(&self) -> bool {
        self.cancel.is_cancelled()
            || self.shutdown.is_cancelled()
            || self
                .execution_limit
                .map_or(false, |limit| self.executions >= limit)
    }

    /// Waits until `deadline`; `false` if the loop was told to end first.
    async fn pause_until(&self, deadline: Instant) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = self.shutdown.cancelled() => false,
            _ = sleep_until(deadline) => true,
        }
    }

    async fn run_frequency(&mut self, interval: Duration) {
        let mut next = deadline_after(interval);
        while !self.halted() {
            if !self.pause_until(next).await || self.halted() {
                break;
            }
            next = deadline_after(interval);
            self.tick().await;
        }
    }

    async fn run_clock(&mut self, mark: ClockMark) {
        while !self.halted() {
            if mark.matches(&Local::now()) {
                self.tick().await;
                if !mark.is_repeating() {
                    break;
                }
                if !self.pause_until(Instant::now() + CLOCK_REPEAT_PAUSE).await {
                    break;
                }
            } else if !self.pause_until(Instant::now() + CLOCK_POLL_INTERVAL).await {
                break;
            }
        }
    }

    async fn tick(&mut self) {
        let started = Instant::now();
        let workflow = (self.factory)();
        let outcome = if self.execute_async {
            workflow.run_async(&self.cancel).await
        } else {
            let cancel = self.cancel.clone();
            let handle = Handle::current();
            match tokio::task::spawn_blocking(move || workflow.run_on(&handle, &cancel)).await {
                Ok(outcome) => outcome,
                Err(join) => Err(WorkflowError::Join(join.to_string())),
            }
        };
        self.executions += 1;

        let result = outcome.unwrap_or_else(|err| {
            error!("Scheduled workflow run failed: {}", err);
            WorkflowResult::faulted(err, started.elapsed())
        });
        debug!(
            "Scheduled run {} finished: {}",
            self.executions,
            result.message()
        );
        if let Some(callback) = &self.on_executed {
            callback(&result);
        }
    }
}
