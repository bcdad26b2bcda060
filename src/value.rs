//! Single-assignment value slots shared between producers and consumers.
//!
//! A service publishes values through [`Provided`] handles while it starts
//! and reads its dependencies' values through [`Required`] handles. The
//! controller copies each dependency's value into the dependent's
//! `Required` slot right before the dependent's start runs, and clears the
//! slots again when the dependent stops.

use std::any::{type_name, Any};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{LifecycleError, LifecycleResult};
use crate::name::ServiceName;

// Type-erased Arc for storage
pub(crate) type AnyArc = Arc<dyn Any + Send + Sync>;

/// Type-erased value cell.
pub(crate) struct ValueSlot {
    name: Option<ServiceName>,
    value: RwLock<Option<AnyArc>>,
}

impl ValueSlot {
    pub(crate) fn new(name: Option<ServiceName>) -> Arc<Self> {
        Arc::new(Self {
            name,
            value: RwLock::new(None),
        })
    }

    pub(crate) fn name(&self) -> Option<&ServiceName> {
        self.name.as_ref()
    }

    /// Producer-side write; false when the slot already holds a value.
    pub(crate) fn set(&self, value: AnyArc) -> bool {
        let mut guard = self.value.write();
        if guard.is_some() {
            return false;
        }
        *guard = Some(value);
        true
    }

    /// Injection overwrites whatever the slot held.
    pub(crate) fn inject(&self, value: Option<AnyArc>) {
        *self.value.write() = value;
    }

    pub(crate) fn clear(&self) {
        self.value.write().take();
    }

    pub(crate) fn get(&self) -> Option<AnyArc> {
        self.value.read().clone()
    }

    pub(crate) fn is_set(&self) -> bool {
        self.value.read().is_some()
    }
}

fn downcast<T: Send + Sync + 'static>(name: ServiceName, value: AnyArc) -> LifecycleResult<Arc<T>> {
    value.downcast::<T>().map_err(|_| LifecycleError::TypeMismatch {
        name,
        expected: type_name::<T>(),
    })
}

/// Read handle for a dependency's value.
///
/// Obtained from [`ServiceBuilder::requires`](crate::ServiceBuilder::requires)
/// and friends. The value becomes readable once the dependency is up and
/// the dependent's own start begins; reading earlier fails with
/// [`LifecycleError::ValueNotAvailable`].
pub struct Required<T> {
    name: ServiceName,
    slot: Arc<ValueSlot>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Required<T> {
    pub(crate) fn new(name: ServiceName, slot: Arc<ValueSlot>) -> Self {
        Self {
            name,
            slot,
            _marker: PhantomData,
        }
    }

    /// Name of the dependency this handle reads.
    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    /// Returns the injected value.
    pub fn get(&self) -> LifecycleResult<Arc<T>> {
        let name = self.name().clone();
        match self.slot.get() {
            Some(value) => downcast(name, value),
            None => Err(LifecycleError::ValueNotAvailable(name)),
        }
    }

    /// Returns the injected value, or `None` when nothing is injected
    /// (for example an optional dependency that is not installed).
    pub fn try_get(&self) -> Option<Arc<T>> {
        self.get().ok()
    }
}

impl<T> Clone for Required<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            slot: Arc::clone(&self.slot),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Required<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Required")
            .field("name", &self.name)
            .field("set", &self.slot.is_set())
            .finish()
    }
}

/// Write handle for a value this service provides.
///
/// Obtained from [`ServiceBuilder::provides`](crate::ServiceBuilder::provides).
/// The service sets it during start; the controller checks that every
/// provided value was set before reporting the service up, and clears the
/// value again once the service stops.
pub struct Provided<T> {
    name: ServiceName,
    slot: Arc<ValueSlot>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Send + Sync + 'static> Provided<T> {
    pub(crate) fn new(name: ServiceName, slot: Arc<ValueSlot>) -> Self {
        Self {
            name,
            slot,
            _marker: PhantomData,
        }
    }

    /// Name the value is published under.
    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    /// Publishes the value. Fails if it was already set during this start.
    pub fn set(&self, value: T) -> LifecycleResult<()> {
        self.set_arc(Arc::new(value))
    }

    /// Publishes an already shared value.
    pub fn set_arc(&self, value: Arc<T>) -> LifecycleResult<()> {
        if self.slot.set(value) {
            Ok(())
        } else {
            Err(LifecycleError::ValueAlreadySet(self.name.clone()))
        }
    }

    pub fn is_set(&self) -> bool {
        self.slot.is_set()
    }
}

impl<T> Clone for Provided<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            slot: Arc::clone(&self.slot),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Provided<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provided")
            .field("name", &self.name)
            .field("set", &self.slot.is_set())
            .finish()
    }
}

/// Outbound injection target.
///
/// Receives a service's primary value while the service is up. Attach it
/// with [`ServiceBuilder::add_injection`](crate::ServiceBuilder::add_injection).
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::Injector;
///
/// let target: Injector<u32> = Injector::new();
/// assert!(target.get().is_none());
/// ```
pub struct Injector<T> {
    slot: Arc<ValueSlot>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Injector<T> {
    pub fn new() -> Self {
        Self {
            slot: ValueSlot::new(None),
            _marker: PhantomData,
        }
    }

    /// The injected value, if the producing service is up.
    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.get().and_then(|v| v.downcast::<T>().ok())
    }

    pub(crate) fn slot(&self) -> Arc<ValueSlot> {
        Arc::clone(&self.slot)
    }
}

impl<T: Send + Sync + 'static> Default for Injector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Injector<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            _marker: PhantomData,
        }
    }
}
