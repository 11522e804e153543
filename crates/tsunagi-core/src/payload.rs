//! Type-erased values passed between workflow stages.

use crate::error::WorkflowError;
use std::any::{type_name, Any};
use std::fmt;

/// A value whose concrete type is only known to the stages on either side
/// of it.
///
/// The output of a conditional block is a `Payload`; use
/// [`Payload::downcast`] (or `cast::<T>()` on the chain) to recover it.
///
/// # Examples
///
/// ```
/// use tsunagi_core::Payload;
///
/// let payload = Payload::new(42u64);
/// assert!(payload.is::<u64>());
/// assert_eq!(payload.downcast_ref::<u64>(), Some(&42));
/// assert_eq!(payload.downcast::<u64>().ok(), Some(42));
/// ```
pub struct Payload {
    value: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Payload {
    /// Erases `value`.
    ///
    /// Wrapping a `Payload` returns it unchanged instead of nesting it.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        let boxed: Box<dyn Any + Send + Sync> = Box::new(value);
        match boxed.downcast::<Payload>() {
            Ok(payload) => *payload,
            Err(value) => Self {
                value,
                type_name: type_name::<T>(),
            },
        }
    }

    /// Returns the name of the type held.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns `true` if the held value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }

    /// Returns a reference to the held value if it is a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        let this: &dyn Any = self;
        this.downcast_ref::<T>()
            .or_else(|| self.value.downcast_ref::<T>())
    }

    /// Recovers the held value.
    ///
    /// Asking for `Payload` itself always succeeds.
    pub fn downcast<T: Any>(self) -> Result<T, WorkflowError> {
        let found = self.type_name;
        let outer: Box<dyn Any + Send + Sync> = Box::new(self);
        let outer = match outer.downcast::<T>() {
            Ok(value) => return Ok(*value),
            Err(outer) => outer,
        };
        let mismatch = || WorkflowError::TypeMismatch {
            expected: type_name::<T>(),
            found,
        };
        let this = *outer.downcast::<Payload>().map_err(|_| mismatch())?;
        this.value
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| mismatch())
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Payload").field(&self.type_name).finish()
    }
}

/// Clones the `T` held by `payload` into a new payload.
///
/// Used to keep a replayable copy of a stage input.
pub fn clone_payload<T>(payload: &Payload) -> Result<Payload, WorkflowError>
where
    T: Any + Clone + Send + Sync,
{
    payload
        .downcast_ref::<T>()
        .map(|value| Payload::new(value.clone()))
        .ok_or(WorkflowError::TypeMismatch {
            expected: type_name::<T>(),
            found: payload.type_name(),
        })
}
