use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_test::{assert_err, assert_ok};
use tsunagi::prelude::*;

#[derive(Debug, Default)]
struct Counters {
    seeds: AtomicUsize,
    fetches: AtomicUsize,
    branches: AtomicUsize,
    fallbacks: AtomicUsize,
    parallel: AtomicUsize,
}

impl Counters {
    fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

struct Seed(u32);

impl Step<u32> for Seed {
    fn run(&mut self, _cancel: &CancellationToken) -> StepResult<u32> {
        Ok(self.0)
    }
}

struct CountedSeed(Arc<Counters>);

impl Step<u32> for CountedSeed {
    fn run(&mut self, _cancel: &CancellationToken) -> StepResult<u32> {
        self.0.seeds.fetch_add(1, Ordering::SeqCst);
        Ok(1)
    }
}

struct AddTen;

impl InputStep<u32, u32> for AddTen {
    fn run(&mut self, input: u32, _cancel: &CancellationToken) -> StepResult<u32> {
        Ok(input + 10)
    }
}

struct Triple;

#[async_trait]
impl AsyncInputStep<u32, u32> for Triple {
    async fn run(&mut self, input: u32, _cancel: &CancellationToken) -> StepResult<u32> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(input * 3)
    }
}

struct Render;

impl InputStep<u32, String> for Render {
    fn run(&mut self, input: u32, _cancel: &CancellationToken) -> StepResult<String> {
        Ok(format!("#{input}"))
    }
}

/// Returns the number of times it has been invoked, so a retry branch can
/// wait for a given attempt.
struct Fetch(Arc<Counters>);

impl InputStep<u32, usize> for Fetch {
    fn run(&mut self, _input: u32, _cancel: &CancellationToken) -> StepResult<usize> {
        Ok(self.0.fetches.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

struct Mark(Arc<Counters>, &'static str);

impl InputStep<u32, &'static str> for Mark {
    fn run(&mut self, _input: u32, _cancel: &CancellationToken) -> StepResult<&'static str> {
        self.0.branches.fetch_add(1, Ordering::SeqCst);
        Ok(self.1)
    }
}

struct Fallback(Arc<Counters>);

impl InputStep<u32, &'static str> for Fallback {
    fn run(&mut self, _input: u32, _cancel: &CancellationToken) -> StepResult<&'static str> {
        self.0.fallbacks.fetch_add(1, Ordering::SeqCst);
        Ok("fallback")
    }
}

struct Accept;

impl InputStep<usize, usize> for Accept {
    fn run(&mut self, attempt: usize, _cancel: &CancellationToken) -> StepResult<usize> {
        Ok(attempt)
    }
}

struct Delayed {
    delay: Duration,
    counters: Arc<Counters>,
}

#[async_trait]
impl AsyncInputStep<u32, u64> for Delayed {
    async fn run(&mut self, input: u32, _cancel: &CancellationToken) -> StepResult<u64> {
        self.counters.parallel.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(self.delay.as_millis() as u64 + input as u64)
    }
}

struct CancelNow;

impl InputStep<u32, u32> for CancelNow {
    fn run(&mut self, input: u32, cancel: &CancellationToken) -> StepResult<u32> {
        cancel.cancel();
        Ok(input)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("card declined")]
struct CardDeclined;

struct Charge;

#[async_trait]
impl AsyncInputStep<u32, u32> for Charge {
    async fn run(&mut self, _input: u32, _cancel: &CancellationToken) -> StepResult<u32> {
        Err(Box::new(CardDeclined))
    }
}

struct Hang;

#[async_trait]
impl AsyncInputStep<u32, u32> for Hang {
    async fn run(&mut self, input: u32, _cancel: &CancellationToken) -> StepResult<u32> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(input)
    }
}

fn counters() -> Arc<Counters> {
    Arc::new(Counters::default())
}

#[tokio::test]
async fn test_sequential_chain_matches_composition() {
    let workflow = Workflow::new((), |builder| {
        builder
            .start_with(|| Seed(4))
            .then(|| AddTen)
            .then_async(|| Triple)
            .then(|| Render)
    });

    let result = assert_ok!(workflow.run_async(&CancellationToken::new()).await);
    assert!(result.is_completed());
    assert_eq!(result.message(), "The workflow has completed successfully.");
    assert_eq!(result.into_output(), Some(format!("#{}", (4 + 10) * 3)));
}

#[tokio::test]
async fn test_factories_run_once_per_execution() {
    let counters = counters();
    let workflow = Workflow::new(counters.clone(), |builder| {
        builder
            .start_with_ctx(|ctx: &Arc<Counters>| CountedSeed(ctx.clone()))
            .then(|| AddTen)
    });

    let cancel = CancellationToken::new();
    assert_ok!(workflow.run_async(&cancel).await);
    assert_ok!(workflow.run_async(&cancel).await);
    assert_eq!(Counters::get(&counters.seeds), 2);
}

#[tokio::test]
async fn test_parallel_keeps_declaration_order() {
    let counters = counters();
    let workflow = Workflow::new(counters.clone(), |builder| {
        builder.start_with(|| Seed(1)).parallel_ctx(|ctx: &Arc<Counters>| {
            vec![
                Delayed {
                    delay: Duration::from_millis(100),
                    counters: ctx.clone(),
                },
                Delayed {
                    delay: Duration::from_millis(50),
                    counters: ctx.clone(),
                },
            ]
        })
    });

    let started = Instant::now();
    let result = assert_ok!(workflow.run_async(&CancellationToken::new()).await);
    assert_eq!(result.output(), Some(&vec![101, 51]));
    assert!(started.elapsed() < Duration::from_millis(150));
    assert_eq!(Counters::get(&counters.parallel), 2);
}

#[tokio::test]
async fn test_parallel_accepts_boxed_steps() {
    let workflow = Workflow::new((), |builder| {
        builder.start_with(|| Seed(2)).parallel(|| {
            let steps: Vec<Box<dyn AsyncInputStep<u32, u32>>> =
                vec![Box::new(Triple), Box::new(Triple)];
            steps
        })
    });

    let result = assert_ok!(workflow.run_async(&CancellationToken::new()).await);
    assert_eq!(result.into_output(), Some(vec![6, 6]));
}

#[tokio::test]
async fn test_only_else_runs_when_nothing_matches() {
    let counters = counters();
    let workflow = Workflow::new(counters.clone(), |builder| {
        builder
            .start_with(|| Seed(7))
            .when(|value: &u32| *value == 1)
            .then_ctx(|ctx: &Arc<Counters>| Mark(ctx.clone(), "one"))
            .else_when(|value: &u32| *value == 2)
            .then_ctx(|ctx: &Arc<Counters>| Mark(ctx.clone(), "two"))
            .otherwise()
            .then_ctx(|ctx: &Arc<Counters>| Fallback(ctx.clone()))
            .end_when()
            .cast::<&'static str>()
    });

    let result = assert_ok!(workflow.run_async(&CancellationToken::new()).await);
    assert_eq!(result.output(), Some(&"fallback"));
    assert_eq!(Counters::get(&counters.branches), 0);
    assert_eq!(Counters::get(&counters.fallbacks), 1);
}

#[tokio::test]
async fn test_first_matching_branch_wins() {
    let counters = counters();
    let workflow = Workflow::new(counters.clone(), |builder| {
        builder
            .start_with(|| Seed(2))
            .when(|value: &u32| *value > 1)
            .then_ctx(|ctx: &Arc<Counters>| Mark(ctx.clone(), "big"))
            .else_when(|value: &u32| *value == 2)
            .then_ctx(|ctx: &Arc<Counters>| Mark(ctx.clone(), "two"))
            .end_when()
            .cast::<&'static str>()
    });

    let result = assert_ok!(workflow.run_async(&CancellationToken::new()).await);
    assert_eq!(result.output(), Some(&"big"));
    assert_eq!(Counters::get(&counters.branches), 1);
}

#[tokio::test]
async fn test_retry_replays_previous_stage_until_accepted() {
    let counters = counters();
    let workflow = Workflow::new(counters.clone(), |builder| {
        builder
            .start_with(|| Seed(0))
            .then_ctx(|ctx: &Arc<Counters>| Fetch(ctx.clone()))
            .when(|attempt: &usize| *attempt < 3)
            .retry(Duration::from_millis(10), 3)
            .otherwise()
            .then(|| Accept)
            .end_when()
            .cast::<usize>()
    });

    let result = assert_ok!(workflow.run_async(&CancellationToken::new()).await);
    assert!(result.is_completed());
    assert_eq!(result.output(), Some(&3));
    assert_eq!(Counters::get(&counters.fetches), 3);
}

#[tokio::test]
async fn test_retry_budget_is_per_run() {
    let counters = counters();
    let workflow = Workflow::new(counters.clone(), |builder| {
        builder
            .start_with(|| Seed(0))
            .then_ctx(|ctx: &Arc<Counters>| Fetch(ctx.clone()))
            .when(|attempt: &usize| *attempt % 2 == 1)
            .retry(Duration::from_millis(1), 1)
            .otherwise()
            .then(|| Accept)
            .end_when()
    });

    let cancel = CancellationToken::new();
    let first = assert_ok!(workflow.run_async(&cancel).await);
    let second = assert_ok!(workflow.run_async(&cancel).await);
    assert!(first.is_completed());
    assert!(second.is_completed());
    assert_eq!(Counters::get(&counters.fetches), 4);
}

#[tokio::test]
async fn test_exhausted_retry_faults() {
    let counters = counters();
    let workflow = Workflow::new(counters.clone(), |builder| {
        builder
            .start_with(|| Seed(0))
            .then_ctx(|ctx: &Arc<Counters>| Fetch(ctx.clone()))
            .when(|_: &usize| true)
            .retry(Duration::from_millis(5), 3)
            .end_when()
    });

    let result = assert_ok!(workflow.run_async(&CancellationToken::new()).await);
    assert!(result.is_faulted());
    assert!(matches!(
        result.error(),
        Some(WorkflowError::MaxRetriesExceeded { attempts: 3 })
    ));
    assert_eq!(Counters::get(&counters.fetches), 4);
    assert!(result.output().is_none());
}

#[tokio::test]
async fn test_retry_replays_a_block_that_retries_itself() {
    let counters = counters();
    let workflow = Workflow::new(counters.clone(), |builder| {
        builder
            .start_with(|| Seed(0))
            .then_ctx(|ctx: &Arc<Counters>| Fetch(ctx.clone()))
            .when(|attempt: &usize| *attempt % 2 == 1)
            .retry(Duration::from_millis(1), 5)
            .otherwise()
            .then(|| Accept)
            .end_when()
            .when(|accepted: &Payload| accepted.downcast_ref::<usize>().map_or(false, |n| *n < 4))
            .retry(Duration::from_millis(1), 3)
            .end_when()
            .cast::<usize>()
    })
    .with_options(WorkflowOptions::default().no_match(NoMatchPolicy::PassThrough));

    let result = assert_ok!(workflow.run_async(&CancellationToken::new()).await);
    assert_eq!(result.output(), Some(&4));
    assert_eq!(Counters::get(&counters.fetches), 4);
}

#[tokio::test]
async fn test_exponential_retry_policy() {
    let counters = counters();
    let policy = RetryPolicy::exponential(2, Duration::from_millis(5));
    let workflow = Workflow::new(counters.clone(), move |builder| {
        builder
            .start_with(|| Seed(0))
            .then_ctx(|ctx: &Arc<Counters>| Fetch(ctx.clone()))
            .when(|attempt: &usize| *attempt < 3)
            .retry_with(policy)
            .otherwise()
            .then(|| Accept)
            .end_when()
            .cast::<usize>()
    });

    let result = assert_ok!(workflow.run_async(&CancellationToken::new()).await);
    assert_eq!(result.output(), Some(&3));
}

#[tokio::test]
async fn test_cancel_before_parallel_starts_nothing() {
    let counters = counters();
    let workflow = Workflow::new(counters.clone(), |builder| {
        builder
            .start_with(|| Seed(1))
            .then(|| CancelNow)
            .parallel_ctx(|ctx: &Arc<Counters>| {
                vec![Delayed {
                    delay: Duration::from_millis(10),
                    counters: ctx.clone(),
                }]
            })
    });

    let result = assert_ok!(workflow.run_async(&CancellationToken::new()).await);
    assert!(result.is_canceled());
    assert_eq!(result.message(), "The workflow was canceled.");
    assert_eq!(Counters::get(&counters.parallel), 0);
    assert_eq!(result.output_or_default(), Vec::<u64>::new());
}

#[tokio::test]
async fn test_cancel_during_join_does_not_wait() {
    let workflow = Workflow::new((), |builder| {
        builder
            .start_with(|| Seed(1))
            .parallel(|| vec![Hang, Hang, Hang])
    });

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = assert_ok!(workflow.run_async(&cancel).await);
    assert!(result.is_canceled());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_step_failure_is_captured() {
    let workflow = Workflow::new((), |builder| builder.start_with(|| Seed(1)).then_async(|| Charge));

    let result = assert_ok!(workflow.run_async(&CancellationToken::new()).await);
    assert!(result.is_faulted());
    let error = result.error();
    assert!(matches!(
        error,
        Some(WorkflowError::StepFailed { step_name, .. }) if step_name.as_str() == "Charge"
    ));
    assert!(error
        .and_then(|e| e.downcast_ref::<CardDeclined>())
        .is_some());
    assert_eq!(result.output_or_default(), 0);
}

#[tokio::test]
async fn test_rethrow_returns_error() {
    let workflow = Workflow::new((), |builder| builder.start_with(|| Seed(1)).then_async(|| Charge))
        .with_options(WorkflowOptions::default().rethrow(true));

    let error = assert_err!(workflow.run_async(&CancellationToken::new()).await);
    assert!(error.downcast_ref::<CardDeclined>().is_some());
}

#[tokio::test]
async fn test_throw_branch_raises() {
    let workflow = Workflow::new((), |builder| {
        builder
            .start_with(|| Seed(9))
            .when(|value: &u32| *value > 5)
            .throw(|| CardDeclined)
            .end_when()
    });

    let result = assert_ok!(workflow.run_async(&CancellationToken::new()).await);
    assert!(matches!(result.error(), Some(WorkflowError::Raised(_))));
    assert!(result
        .error()
        .and_then(|e| e.downcast_ref::<CardDeclined>())
        .is_some());
    assert_eq!(
        result.message(),
        "The workflow was stopped because an error was raised."
    );
}

#[tokio::test]
async fn test_stop_is_canceled_unless_strict() {
    let build = |builder: tsunagi::WorkflowBuilder<()>| {
        builder
            .start_with(|| Seed(1))
            .when(|_: &u32| true)
            .stop()
            .end_when()
            .cast::<u32>()
            .then(|| AddTen)
    };

    let lenient = Workflow::new((), build);
    let result = assert_ok!(lenient.run_async(&CancellationToken::new()).await);
    assert!(result.is_canceled());

    let strict = Workflow::new((), build).with_options(WorkflowOptions::default().strict_stop(true));
    let result = assert_ok!(strict.run_async(&CancellationToken::new()).await);
    assert!(matches!(result.error(), Some(WorkflowError::Stopped)));
}

#[tokio::test]
async fn test_no_match_policies() {
    let build = |builder: tsunagi::WorkflowBuilder<()>| {
        builder
            .start_with(|| Seed(3))
            .when(|value: &u32| *value == 0)
            .then(|| AddTen)
            .end_when()
            .cast::<u32>()
    };

    let failing = Workflow::new((), build);
    let result = assert_ok!(failing.run_async(&CancellationToken::new()).await);
    assert!(matches!(
        result.error(),
        Some(WorkflowError::NoConditionMatched)
    ));

    let passing = Workflow::new((), build)
        .with_options(WorkflowOptions::default().no_match(NoMatchPolicy::PassThrough));
    let result = assert_ok!(passing.run_async(&CancellationToken::new()).await);
    assert_eq!(result.output(), Some(&3));
}

#[tokio::test]
async fn test_cast_mismatch_faults() {
    let workflow = Workflow::new((), |builder| {
        builder
            .start_with(|| Seed(3))
            .when(|_: &u32| true)
            .then(|| Render)
            .end_when()
            .cast::<u32>()
    });

    let result = assert_ok!(workflow.run_async(&CancellationToken::new()).await);
    assert!(matches!(
        result.error(),
        Some(WorkflowError::TypeMismatch { .. })
    ));
}

#[tokio::test]
async fn test_step_timeout() {
    let workflow = Workflow::new((), |builder| builder.start_with(|| Seed(1)).then_async(|| Hang))
        .with_options(WorkflowOptions::default().step_timeout(Duration::from_millis(50)));

    let result = assert_ok!(workflow.run_async(&CancellationToken::new()).await);
    assert!(matches!(
        result.error(),
        Some(WorkflowError::Timeout { step_name }) if step_name.as_str() == "Hang"
    ));
}

#[test]
fn test_blocking_run_outside_runtime() {
    let workflow = Workflow::new((), |builder| {
        builder
            .start_with(|| Seed(1))
            .then_async(|| Triple)
            .parallel(|| vec![Triple, Triple])
    });

    let result = assert_ok!(workflow.run(&CancellationToken::new()));
    assert_eq!(result.into_output(), Some(vec![9, 9]));
}

#[tokio::test]
async fn test_blocking_run_inside_runtime() {
    let workflow = Workflow::new((), |builder| builder.start_with(|| Seed(5)).then_async(|| Triple));

    let result = assert_ok!(workflow.run(&CancellationToken::new()));
    assert_eq!(result.output(), Some(&15));
}

#[tokio::test]
async fn test_spawned_run() {
    let workflow = Arc::new(Workflow::new((), |builder| {
        builder.start_with(|| Seed(2)).then(|| Render)
    }));

    let joined = workflow.spawn(CancellationToken::new()).await;
    let result = assert_ok!(assert_ok!(joined));
    assert_eq!(result.output().map(String::as_str), Some("#2"));
}

#[tokio::test]
async fn test_canceled_before_start() {
    let workflow = Workflow::new((), |builder| builder.start_with(|| Seed(2)));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = assert_ok!(workflow.run_async(&cancel).await);
    assert!(result.is_canceled());
    assert!(result.output().is_none());
}
