//! Core contracts for the tsunagi workflow engine.
//!
//! This crate has no runtime of its own. Library authors depend on it to
//! implement steps; the `tsunagi` crate composes and runs them.
//!
//! # Core Types
//!
//! - [`Step`], [`InputStep`], [`AsyncStep`], [`AsyncInputStep`] - the four step shapes
//! - [`StepInstance`] - a constructed step behind a single `invoke`
//! - [`Payload`] - the erased value leaving a conditional block
//! - [`WorkflowResult`] - completed / canceled / faulted outcome of a run
//! - [`WorkflowOptions`] - rethrow, stop, no-match and timeout settings
//! - [`WorkflowError`] - error types for configuration and execution

mod error;
mod options;
mod payload;
mod result;
mod step;

pub use error::WorkflowError;
pub use options::{NoMatchPolicy, WorkflowOptions};
pub use payload::{clone_payload, Payload};
pub use result::WorkflowResult;
pub use step::{
    AsyncInputStep, AsyncStep, InputStep, IntoAsyncStep, IntoStep, Plain, RetryPolicy, Step,
    StepError, StepInstance, StepName, StepResult, WithInput,
};

pub use tokio_util::sync::CancellationToken;
