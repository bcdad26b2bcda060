//! Contexts handed to a service's start and stop operations.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::builder::ServiceBuilder;
use crate::error::{LifecycleError, LifecycleResult, StartError};
use crate::name::ServiceName;

use super::ServiceControllerImpl;

#[derive(Default)]
struct Completion {
    asynchronous: bool,
    completed: bool,
}

/// Context of a running start operation.
///
/// By default the start is complete when [`Service::start`](crate::Service::start)
/// returns. Calling [`asynchronous`](Self::asynchronous) hands back a
/// [`StartCompletion`] and the controller waits for it instead.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::{Service, StartContext, StartError};
/// use std::thread;
///
/// struct Warmup;
///
/// impl Service for Warmup {
///     fn start(&self, context: &StartContext) -> Result<(), StartError> {
///         let completion = context.asynchronous();
///         thread::spawn(move || {
///             // ... load caches ...
///             completion.complete().ok();
///         });
///         Ok(())
///     }
/// }
/// ```
pub struct StartContext {
    controller: Arc<ServiceControllerImpl>,
    completion: Arc<Mutex<Completion>>,
}

impl StartContext {
    pub(crate) fn new(controller: Arc<ServiceControllerImpl>) -> Self {
        Self {
            controller,
            completion: Arc::new(Mutex::new(Completion::default())),
        }
    }

    /// Primary name of the starting service.
    pub fn name(&self) -> &ServiceName {
        self.controller.primary_name()
    }

    /// Switches to asynchronous completion.
    pub fn asynchronous(&self) -> StartCompletion {
        self.completion.lock().asynchronous = true;
        StartCompletion {
            controller: Arc::clone(&self.controller),
            completion: Arc::clone(&self.completion),
        }
    }

    /// Target for installing child services of the starting service.
    pub fn child_target(&self) -> ChildTarget {
        ChildTarget {
            parent: Arc::clone(&self.controller),
        }
    }

    /// Resolves the outcome of the synchronous part of the start.
    ///
    /// Returns the result to record now, or `None` when completion is left
    /// to a [`StartCompletion`] (or one already happened).
    pub(crate) fn settle(&self, result: Result<(), StartError>) -> Option<Result<(), StartError>> {
        let mut completion = self.completion.lock();
        if completion.completed {
            if let Err(err) = result {
                tracing::warn!(
                    service = %self.name(),
                    error = %err,
                    "start returned an error after it was already completed"
                );
            }
            return None;
        }
        if completion.asynchronous && result.is_ok() {
            return None;
        }
        completion.completed = true;
        Some(result)
    }
}

impl fmt::Debug for StartContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartContext")
            .field("service", self.name())
            .finish()
    }
}

/// Completes an asynchronous start from any thread.
#[derive(Clone)]
pub struct StartCompletion {
    controller: Arc<ServiceControllerImpl>,
    completion: Arc<Mutex<Completion>>,
}

impl StartCompletion {
    /// Reports success.
    pub fn complete(&self) -> LifecycleResult<()> {
        self.finish(Ok(()))
    }

    /// Reports failure.
    pub fn failed(&self, error: StartError) -> LifecycleResult<()> {
        self.finish(Err(error))
    }

    fn finish(&self, result: Result<(), StartError>) -> LifecycleResult<()> {
        {
            let mut completion = self.completion.lock();
            if completion.completed {
                return Err(LifecycleError::IllegalState("start already completed"));
            }
            completion.completed = true;
        }
        self.controller.complete_start(result);
        Ok(())
    }
}

impl fmt::Debug for StartCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartCompletion")
            .field("service", self.controller.primary_name())
            .field("completed", &self.completion.lock().completed)
            .finish()
    }
}

/// Context of a running stop operation.
pub struct StopContext {
    controller: Arc<ServiceControllerImpl>,
    completion: Arc<Mutex<Completion>>,
}

impl StopContext {
    pub(crate) fn new(controller: Arc<ServiceControllerImpl>) -> Self {
        Self {
            controller,
            completion: Arc::new(Mutex::new(Completion::default())),
        }
    }

    pub fn name(&self) -> &ServiceName {
        self.controller.primary_name()
    }

    /// Switches to asynchronous completion; the service stays STOPPING
    /// until [`StopCompletion::complete`] is called.
    pub fn asynchronous(&self) -> StopCompletion {
        self.completion.lock().asynchronous = true;
        StopCompletion {
            controller: Arc::clone(&self.controller),
            completion: Arc::clone(&self.completion),
        }
    }

    /// True when the stop should be completed now. A panicking stop is
    /// always completed.
    pub(crate) fn settle(&self, panicked: bool) -> bool {
        let mut completion = self.completion.lock();
        if completion.completed || (completion.asynchronous && !panicked) {
            return false;
        }
        completion.completed = true;
        true
    }
}

impl fmt::Debug for StopContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopContext")
            .field("service", self.name())
            .finish()
    }
}

/// Completes an asynchronous stop from any thread.
#[derive(Clone)]
pub struct StopCompletion {
    controller: Arc<ServiceControllerImpl>,
    completion: Arc<Mutex<Completion>>,
}

impl StopCompletion {
    pub fn complete(&self) -> LifecycleResult<()> {
        {
            let mut completion = self.completion.lock();
            if completion.completed {
                return Err(LifecycleError::IllegalState("stop already completed"));
            }
            completion.completed = true;
        }
        self.controller.complete_stop();
        Ok(())
    }
}

impl fmt::Debug for StopCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopCompletion")
            .field("service", self.controller.primary_name())
            .finish()
    }
}

/// Installs children of a starting service.
///
/// Children implicitly depend on the parent and are removed when the
/// parent stops or fails. They may only be installed while the parent is
/// starting or up.
pub struct ChildTarget {
    parent: Arc<ServiceControllerImpl>,
}

impl ChildTarget {
    /// Starts building a child service.
    pub fn add_service(&self, name: ServiceName) -> LifecycleResult<ServiceBuilder> {
        let registry = self
            .parent
            .engine()
            .registry
            .upgrade()
            .ok_or(LifecycleError::IllegalState("container has been dropped"))?;
        let mut builder = ServiceBuilder::new(registry, Arc::clone(self.parent.engine()), name);
        builder.set_parent(Arc::clone(&self.parent));
        Ok(builder)
    }

    /// Name of the parent service.
    pub fn parent_name(&self) -> &ServiceName {
        self.parent.primary_name()
    }
}

impl fmt::Debug for ChildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildTarget")
            .field("parent", self.parent.primary_name())
            .finish()
    }
}
