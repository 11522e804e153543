//! Health probes fanned out across regions.
//!
//! Demonstrates:
//! - Running several async steps concurrently on the same input
//! - Collecting outputs in declaration order
//! - Per-step timeouts and cancelling a run from outside

use async_trait::async_trait;
use std::time::Duration;
use tsunagi::prelude::*;

#[derive(Debug, Clone)]
struct Target {
    service: String,
    path: String,
}

#[derive(Debug)]
struct Probe {
    region: &'static str,
    latency: Duration,
}

#[derive(Debug)]
struct ProbeReport {
    region: &'static str,
    healthy: bool,
    latency: Duration,
}

struct Discover;

impl Step<Target> for Discover {
    fn run(&mut self, _cancel: &CancellationToken) -> StepResult<Target> {
        Ok(Target {
            service: "checkout".to_string(),
            path: "/healthz".to_string(),
        })
    }
}

#[async_trait]
impl AsyncInputStep<Target, ProbeReport> for Probe {
    async fn run(&mut self, target: Target, cancel: &CancellationToken) -> StepResult<ProbeReport> {
        println!(
            "Probing {}{} from {}...",
            target.service, target.path, self.region
        );
        tokio::select! {
            _ = cancel.cancelled() => Err("probe interrupted".into()),
            _ = tokio::time::sleep(self.latency) => Ok(ProbeReport {
                region: self.region,
                healthy: self.latency < Duration::from_millis(300),
                latency: self.latency,
            }),
        }
    }
}

struct Summarize;

impl InputStep<Vec<ProbeReport>, String> for Summarize {
    fn run(&mut self, reports: Vec<ProbeReport>, _cancel: &CancellationToken) -> StepResult<String> {
        let lines: Vec<String> = reports
            .iter()
            .map(|r| {
                format!(
                    "{}: {} ({}ms)",
                    r.region,
                    if r.healthy { "healthy" } else { "degraded" },
                    r.latency.as_millis()
                )
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

fn probe_workflow(slowest: Duration) -> Workflow<(), String> {
    Workflow::new((), move |builder| {
        builder
            .start_with(|| Discover)
            .parallel(move || {
                vec![
                    Probe {
                        region: "eu-west",
                        latency: Duration::from_millis(120),
                    },
                    Probe {
                        region: "us-east",
                        latency: Duration::from_millis(40),
                    },
                    Probe {
                        region: "ap-south",
                        latency: slowest,
                    },
                ]
            })
            .then(|| Summarize)
    })
    .with_options(WorkflowOptions::default().step_timeout(Duration::from_secs(2)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let result = probe_workflow(Duration::from_millis(350))
        .run_async(&CancellationToken::new())
        .await?;
    println!("{} ({:?})", result.message(), result.duration());
    if let Some(summary) = result.output() {
        println!("{}", summary);
    }

    // A probe that never answers in time; cancel the whole run after 500ms.
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });
    let result = probe_workflow(Duration::from_secs(10))
        .run_async(&cancel)
        .await?;
    println!("{} ({:?})", result.message(), result.duration());

    Ok(())
}
