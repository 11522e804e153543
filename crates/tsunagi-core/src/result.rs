//! Outcome of a single workflow run.

use crate::error::WorkflowError;
use std::time::Duration;

#[derive(Debug)]
enum Outcome<T> {
    Completed(T),
    Canceled,
    Faulted(WorkflowError),
}

/// The immutable record produced by one `run` of a workflow.
///
/// Exactly one of [`is_completed`](Self::is_completed),
/// [`is_canceled`](Self::is_canceled) and [`is_faulted`](Self::is_faulted)
/// is `true`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tsunagi_core::WorkflowResult;
///
/// let result = WorkflowResult::completed(7u32, Duration::from_millis(3));
/// assert!(result.is_completed());
/// assert_eq!(result.output(), Some(&7));
///
/// let canceled = WorkflowResult::<u32>::canceled(Duration::ZERO);
/// assert_eq!(canceled.output(), None);
/// assert_eq!(canceled.output_or_default(), 0);
/// ```
#[derive(Debug)]
pub struct WorkflowResult<T> {
    outcome: Outcome<T>,
    duration: Duration,
}

impl<T> WorkflowResult<T> {
    /// A run that produced `output`.
    pub fn completed(output: T, duration: Duration) -> Self {
        Self {
            outcome: Outcome::Completed(output),
            duration,
        }
    }

    /// A run that observed cancellation or was stopped.
    pub fn canceled(duration: Duration) -> Self {
        Self {
            outcome: Outcome::Canceled,
            duration,
        }
    }

    /// A run that ended with `error`.
    pub fn faulted(error: WorkflowError, duration: Duration) -> Self {
        Self {
            outcome: Outcome::Faulted(error),
            duration,
        }
    }

    /// Returns `true` if the run produced an output.
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, Outcome::Completed(_))
    }

    /// Returns `true` if the run was canceled or stopped.
    pub fn is_canceled(&self) -> bool {
        matches!(self.outcome, Outcome::Canceled)
    }

    /// Returns `true` if the run ended with an error.
    pub fn is_faulted(&self) -> bool {
        matches!(self.outcome, Outcome::Faulted(_))
    }

    /// Returns the output of a completed run.
    pub fn output(&self) -> Option<&T> {
        match &self.outcome {
            Outcome::Completed(output) => Some(output),
            _ => None,
        }
    }

    /// Consumes the result, returning the output of a completed run.
    pub fn into_output(self) -> Option<T> {
        match self.outcome {
            Outcome::Completed(output) => Some(output),
            _ => None,
        }
    }

    /// Consumes the result, falling back to `T::default()` unless completed.
    pub fn output_or_default(self) -> T
    where
        T: Default,
    {
        self.into_output().unwrap_or_default()
    }

    /// Returns the error of a faulted run.
    pub fn error(&self) -> Option<&WorkflowError> {
        match &self.outcome {
            Outcome::Faulted(error) => Some(error),
            _ => None,
        }
    }

    /// Wall-clock time spent in the run.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// A human-readable summary of the outcome.
    pub fn message(&self) -> &'static str {
        match self.outcome {
            Outcome::Completed(_) => "The workflow has completed successfully.",
            Outcome::Canceled => "The workflow was canceled.",
            Outcome::Faulted(_) => "The workflow was stopped because an error was raised.",
        }
    }
}
