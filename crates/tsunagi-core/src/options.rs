//! Per-workflow run options.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a conditional block does when no branch matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoMatchPolicy {
    /// Fault the run with `NoConditionMatched`.
    #[default]
    Fail,
    /// Forward the incoming value unchanged.
    PassThrough,
}

/// Options applied to every run of a workflow.
///
/// Every field has a default, so partial configuration documents are
/// accepted:
///
/// ```
/// use tsunagi_core::{NoMatchPolicy, WorkflowOptions};
///
/// let options = WorkflowOptions::default()
///     .rethrow(true)
///     .no_match(NoMatchPolicy::PassThrough);
/// assert!(options.rethrow);
/// assert!(!options.strict_stop);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowOptions {
    /// Return runtime errors as `Err` instead of a faulted result.
    pub rethrow: bool,
    /// Report a `stop` branch as a fault instead of a cancellation.
    pub strict_stop: bool,
    /// Behaviour of a conditional block with no matching branch.
    pub no_match: NoMatchPolicy,
    /// Upper bound on each asynchronous step invocation.
    pub step_timeout: Option<Duration>,
}

impl WorkflowOptions {
    /// Sets the rethrow flag.
    pub fn rethrow(mut self, rethrow: bool) -> Self {
        self.rethrow = rethrow;
        self
    }

    /// Sets strict stop reporting.
    pub fn strict_stop(mut self, strict: bool) -> Self {
        self.strict_stop = strict;
        self
    }

    /// Sets the no-match policy.
    pub fn no_match(mut self, policy: NoMatchPolicy) -> Self {
        self.no_match = policy;
        self
    }

    /// Sets the step timeout.
    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }
}
