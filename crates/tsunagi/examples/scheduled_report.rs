//! A report workflow run on a timer.
//!
//! Demonstrates:
//! - Reading the scheduler timing from configuration
//! - Bounding a scheduler with an execution limit
//! - Observing each run through the executed callback

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tsunagi::prelude::*;

const CONFIG: &str = r#"{ "frequency": { "secs": 1, "nanos": 0 } }"#;

struct Report {
    sequence: Arc<AtomicU64>,
}

impl Step<u64> for Report {
    fn run(&mut self, _cancel: &CancellationToken) -> StepResult<u64> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        println!("Building report #{}", sequence);
        Ok(sequence)
    }
}

struct Publish;

impl InputStep<u64, String> for Publish {
    fn run(&mut self, sequence: u64, _cancel: &CancellationToken) -> StepResult<String> {
        Ok(format!("report-{:04}.csv", sequence))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let timing: SchedulerTiming = serde_json::from_str(CONFIG)?;
    let sequence = Arc::new(AtomicU64::new(0));

    let mut scheduler = WorkflowScheduler::new();
    scheduler
        .use_factory(move || {
            let sequence = sequence.clone();
            Workflow::new((), move |builder| {
                builder
                    .start_with(move || Report {
                        sequence: sequence.clone(),
                    })
                    .then(|| Publish)
            })
        })?
        .configure(timing)?
        .execution_limit(3)?
        .on_executed(|result: &WorkflowResult<String>| match result.output() {
            Some(file) => println!("Published {}", file),
            None => println!("{}", result.message()),
        });

    let handle = scheduler.start(&CancellationToken::new())?;
    handle.await?;
    Ok(())
}
