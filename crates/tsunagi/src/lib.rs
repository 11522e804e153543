//! A compositional workflow engine for Rust.
//!
//! A workflow is a chain of steps run in sequence, split by conditional
//! blocks or fanned out in parallel, executed with cooperative cancellation
//! and reported as a completed, canceled or faulted [`WorkflowResult`]. A
//! [`WorkflowScheduler`] runs a workflow repeatedly on a fixed frequency or
//! at a wall-clock mark.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use tsunagi::prelude::*;
//!
//! struct LoadOrder;
//!
//! impl Step<u32> for LoadOrder {
//!     fn run(&mut self, _cancel: &CancellationToken) -> StepResult<u32> {
//!         Ok(3)
//!     }
//! }
//!
//! struct Price;
//!
//! #[async_trait]
//! impl AsyncInputStep<u32, f64> for Price {
//!     async fn run(&mut self, quantity: u32, _cancel: &CancellationToken) -> StepResult<f64> {
//!         Ok(quantity as f64 * 2.5)
//!     }
//! }
//!
//! struct Free;
//!
//! impl InputStep<f64, String> for Free {
//!     fn run(&mut self, _total: f64, _cancel: &CancellationToken) -> StepResult<String> {
//!         Ok("free".to_string())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), WorkflowError> {
//! let workflow = Workflow::new((), |builder| {
//!     builder
//!         .start_with(|| LoadOrder)
//!         .then_async(|| Price)
//!         .when(|total: &f64| *total == 0.0)
//!         .then(|| Free)
//!         .otherwise()
//!         .stop()
//!         .end_when()
//! });
//!
//! let result = workflow.run_async(&CancellationToken::new()).await?;
//! assert!(result.is_canceled());
//! # Ok(())
//! # }
//! ```

mod builder;
mod chain;
mod conditional;
mod parallel;
mod schedule;
mod scheduler;
mod workflow;

// Re-export core types
pub use tsunagi_core::*;

pub use builder::{Chain, WorkflowBuilder};
pub use conditional::{BranchBuilder, Closed, Conditional, Open};
pub use schedule::{ClockMark, SchedulerTiming};
pub use scheduler::WorkflowScheduler;
pub use workflow::Workflow;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        AsyncInputStep, AsyncStep, CancellationToken, ClockMark, InputStep, NoMatchPolicy,
        Payload, RetryPolicy, SchedulerTiming, Step, StepError, StepName, StepResult, Workflow,
        WorkflowError, WorkflowOptions, WorkflowResult, WorkflowScheduler,
    };
}
