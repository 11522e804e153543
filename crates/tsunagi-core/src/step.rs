//! Step traits and related types.
//!
//! A step comes in one of four shapes: synchronous or asynchronous, with or
//! without an input value. Each shape is its own trait; [`IntoStep`] and
//! [`IntoAsyncStep`] fold them into a single [`StepInstance`] that the engine
//! invokes uniformly.

use crate::error::WorkflowError;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Error type returned by user steps.
pub type StepError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type returned by user steps.
pub type StepResult<T> = Result<T, StepError>;

/// Type-safe step name wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepName(String);

impl StepName {
    /// Creates a new StepName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Creates a StepName from the short type name of `T`.
    ///
    /// Generic arguments and the module path are dropped, so
    /// `my_app::steps::Reserve<Order>` becomes `Reserve`.
    pub fn from_type_name<T: ?Sized>() -> Self {
        let full_name = std::any::type_name::<T>();
        let path = full_name.split('<').next().unwrap_or(full_name);
        let short_name = path.rsplit("::").next().unwrap_or("UnknownStep");
        Self::new(short_name)
    }

    /// Returns the step name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StepName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A synchronous step that produces a value without an input.
///
/// # Examples
///
/// ```
/// use tsunagi_core::{Step, StepResult};
/// use tokio_util::sync::CancellationToken;
///
/// struct LoadOrder;
///
/// impl Step<u32> for LoadOrder {
///     fn run(&mut self, _cancel: &CancellationToken) -> StepResult<u32> {
///         Ok(42)
///     }
/// }
/// ```
pub trait Step<O>: Send {
    /// Runs the step.
    fn run(&mut self, cancel: &CancellationToken) -> StepResult<O>;
}

/// A synchronous step that transforms the previous stage's output.
pub trait InputStep<I, O>: Send {
    /// Runs the step against the upstream value.
    fn run(&mut self, input: I, cancel: &CancellationToken) -> StepResult<O>;
}

/// An asynchronous step that produces a value without an input.
#[async_trait]
pub trait AsyncStep<O>: Send {
    /// Runs the step.
    async fn run(&mut self, cancel: &CancellationToken) -> StepResult<O>;
}

/// An asynchronous step that transforms the previous stage's output.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use tsunagi_core::{AsyncInputStep, StepResult};
/// use tokio_util::sync::CancellationToken;
///
/// struct PriceOrder;
///
/// #[async_trait]
/// impl AsyncInputStep<u32, f64> for PriceOrder {
///     async fn run(&mut self, quantity: u32, _cancel: &CancellationToken) -> StepResult<f64> {
///         Ok(quantity as f64 * 9.5)
///     }
/// }
/// ```
#[async_trait]
pub trait AsyncInputStep<I, O>: Send {
    /// Runs the step against the upstream value.
    async fn run(&mut self, input: I, cancel: &CancellationToken) -> StepResult<O>;
}

#[async_trait]
impl<I, O> AsyncInputStep<I, O> for Box<dyn AsyncInputStep<I, O>>
where
    I: Send + 'static,
    O: 'static,
{
    async fn run(&mut self, input: I, cancel: &CancellationToken) -> StepResult<O> {
        (**self).run(input, cancel).await
    }
}

enum Shape<I, O> {
    Sync(Box<dyn Step<O>>),
    SyncInput(Box<dyn InputStep<I, O>>),
    Async(Box<dyn AsyncStep<O>>),
    AsyncInput(Box<dyn AsyncInputStep<I, O>>),
}

/// A freshly constructed step, ready to be invoked once.
pub struct StepInstance<I, O> {
    name: StepName,
    shape: Shape<I, O>,
}

impl<I, O> fmt::Debug for StepInstance<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self.shape {
            Shape::Sync(_) => "sync",
            Shape::SyncInput(_) => "sync-input",
            Shape::Async(_) => "async",
            Shape::AsyncInput(_) => "async-input",
        };
        f.debug_struct("StepInstance")
            .field("name", &self.name)
            .field("shape", &shape)
            .finish()
    }
}

impl<I, O> StepInstance<I, O> {
    /// Returns the step name.
    pub fn name(&self) -> &StepName {
        &self.name
    }

    /// Overrides the name derived from the step type.
    pub fn named(mut self, name: impl Into<StepName>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns `true` if the step returns a future.
    pub fn is_async(&self) -> bool {
        matches!(self.shape, Shape::Async(_) | Shape::AsyncInput(_))
    }
}

impl<I: Send + 'static, O: 'static> StepInstance<I, O> {
    /// Invokes the step, handing it `input` when its shape takes one.
    ///
    /// Steps without an input drop the value.
    pub async fn invoke(self, input: I, cancel: &CancellationToken) -> StepResult<O> {
        match self.shape {
            Shape::Sync(mut step) => step.run(cancel),
            Shape::SyncInput(mut step) => step.run(input, cancel),
            Shape::Async(mut step) => step.run(cancel).await,
            Shape::AsyncInput(mut step) => step.run(input, cancel).await,
        }
    }
}

/// Marker for steps that ignore the upstream value.
#[derive(Debug)]
pub struct Plain;

/// Marker for steps that consume the upstream value.
#[derive(Debug)]
pub struct WithInput;

/// Conversion from a synchronous step into a [`StepInstance`].
///
/// `M` only disambiguates the blanket impls and is always inferred.
pub trait IntoStep<I, O, M>: Send + 'static {
    /// Wraps the step.
    fn into_step(self) -> StepInstance<I, O>;
}

impl<I, O, S> IntoStep<I, O, Plain> for S
where
    S: Step<O> + 'static,
{
    fn into_step(self) -> StepInstance<I, O> {
        StepInstance {
            name: StepName::from_type_name::<S>(),
            shape: Shape::Sync(Box::new(self)),
        }
    }
}

impl<I, O, S> IntoStep<I, O, WithInput> for S
where
    S: InputStep<I, O> + 'static,
{
    fn into_step(self) -> StepInstance<I, O> {
        StepInstance {
            name: StepName::from_type_name::<S>(),
            shape: Shape::SyncInput(Box::new(self)),
        }
    }
}

/// Conversion from an asynchronous step into a [`StepInstance`].
pub trait IntoAsyncStep<I, O, M>: Send + 'static {
    /// Wraps the step.
    fn into_step(self) -> StepInstance<I, O>;
}

impl<I, O, S> IntoAsyncStep<I, O, Plain> for S
where
    S: AsyncStep<O> + 'static,
{
    fn into_step(self) -> StepInstance<I, O> {
        StepInstance {
            name: StepName::from_type_name::<S>(),
            shape: Shape::Async(Box::new(self)),
        }
    }
}

impl<I, O, S> IntoAsyncStep<I, O, WithInput> for S
where
    S: AsyncInputStep<I, O> + 'static,
{
    fn into_step(self) -> StepInstance<I, O> {
        StepInstance {
            name: StepName::from_type_name::<S>(),
            shape: Shape::AsyncInput(Box::new(self)),
        }
    }
}

/// Delay schedule used by retry branches.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// No retry - fail immediately.
    #[default]
    None,
    /// Fixed delay between retries.
    Fixed {
        /// Maximum number of retry attempts.
        max_retries: u32,
        /// Delay between each retry.
        delay: Duration,
    },
    /// Exponential backoff with configurable parameters.
    ExponentialBackoff {
        /// Maximum number of retry attempts.
        max_retries: u32,
        /// Initial delay before first retry.
        initial_delay: Duration,
        /// Maximum delay cap.
        max_delay: Duration,
        /// Multiplier for each retry.
        multiplier: u32,
    },
}

impl RetryPolicy {
    /// Creates a fixed retry policy.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        RetryPolicy::Fixed { max_retries, delay }
    }

    /// Creates an exponential backoff retry policy with default settings.
    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        RetryPolicy::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay: Duration::from_secs(60),
            multiplier: 2,
        }
    }

    /// Creates an exponential backoff retry policy with custom settings.
    pub fn exponential_backoff(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: u32,
    ) -> Result<Self, WorkflowError> {
        if multiplier == 0 {
            return Err(WorkflowError::Configuration(
                "multiplier must be greater than 0".to_string(),
            ));
        }
        if multiplier > 10 {
            return Err(WorkflowError::Configuration(
                "multiplier must be 10 or less to avoid overflow".to_string(),
            ));
        }
        if max_delay < initial_delay {
            return Err(WorkflowError::Configuration(
                "max_delay must be >= initial_delay".to_string(),
            ));
        }
        Ok(RetryPolicy::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay,
            multiplier,
        })
    }

    /// Returns the maximum number of retries for this policy.
    pub fn max_retries(&self) -> u32 {
        match self {
            RetryPolicy::None => 0,
            RetryPolicy::Fixed { max_retries, .. } => *max_retries,
            RetryPolicy::ExponentialBackoff { max_retries, .. } => *max_retries,
        }
    }

    /// Calculates the delay for the given zero-based retry attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryPolicy::None => None,
            RetryPolicy::Fixed { delay, .. } => Some(*delay),
            RetryPolicy::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let factor = multiplier.saturating_pow(attempt);
                Some(initial_delay.saturating_mul(factor).min(*max_delay))
            }
        }
    }
}
