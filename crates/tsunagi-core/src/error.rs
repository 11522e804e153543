//! Workflow error types.

use crate::step::{StepError, StepName};
use thiserror::Error;

/// Errors that can occur while configuring or running a workflow.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WorkflowError {
    /// A step returned an error of its own.
    #[error("Step failed: {step_name}, details: {source}")]
    StepFailed {
        /// The name of the step that failed.
        step_name: StepName,
        /// The error raised by the step.
        #[source]
        source: StepError,
    },

    /// A conditional branch raised an error through `throw`.
    #[error("Workflow raised an error: {0}")]
    Raised(#[source] StepError),

    /// A retry branch used up its budget.
    #[error("Max retry limit of {attempts} has been met within the workflow")]
    MaxRetriesExceeded {
        /// How many re-invocations were allowed.
        attempts: u32,
    },

    /// None of the branch predicates matched the incoming value.
    #[error("No condition was met in the workflow")]
    NoConditionMatched,

    /// A `stop` branch short-circuited the workflow.
    #[error("The workflow has stopped")]
    Stopped,

    /// Cancellation was observed.
    #[error("The workflow was canceled")]
    Canceled,

    /// An asynchronous step exceeded the configured step timeout.
    #[error("Timeout occurred in step: {step_name}")]
    Timeout {
        /// The name of the step that timed out.
        step_name: StepName,
    },

    /// An erased value did not hold the type a stage expected.
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// The type the stage asked for.
        expected: &'static str,
        /// The type the value actually holds.
        found: &'static str,
    },

    /// The workflow or scheduler configuration is invalid.
    #[error("Invalid workflow configuration: {0}")]
    Configuration(String),

    /// A clock field was outside its allowed range.
    #[error("Invalid {field}: {value} (expected {min}..={max})")]
    InvalidClockField {
        /// Which field was rejected.
        field: &'static str,
        /// The rejected value.
        value: u32,
        /// Lowest accepted value.
        min: u32,
        /// Highest accepted value.
        max: u32,
    },

    /// A spawned step task panicked or was aborted.
    #[error("Parallel task failed to join: {0}")]
    Join(String),

    /// The blocking entry point could not build a runtime.
    #[error("Failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

impl WorkflowError {
    /// Wraps an error returned by a step.
    ///
    /// A `WorkflowError` that travelled through the step's boxed error is
    /// returned as-is instead of being nested.
    pub fn from_step(step_name: StepName, error: StepError) -> Self {
        match error.downcast::<WorkflowError>() {
            Ok(inner) => *inner,
            Err(source) => WorkflowError::StepFailed { step_name, source },
        }
    }

    /// Returns the user error underneath a step failure or raised error.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            WorkflowError::StepFailed { source, .. } | WorkflowError::Raised(source) => {
                source.downcast_ref::<E>()
            }
            _ => None,
        }
    }

    /// Returns `true` for the errors that mean the run was interrupted
    /// rather than broken.
    pub fn is_interruption(&self) -> bool {
        matches!(self, WorkflowError::Canceled | WorkflowError::Stopped)
    }
}
