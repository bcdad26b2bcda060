//! The user-facing service behavior.

use std::fmt;

use crate::controller::{StartContext, StopContext};
use crate::error::StartError;

/// Start and stop behavior of a service.
///
/// `start` runs on an executor thread once every required dependency is up
/// and their values have been injected. Returning an error (or panicking)
/// puts the service into START_FAILED. `stop` runs when the service has to
/// go down; it cannot fail.
///
/// Either operation may hand its completion to another thread through the
/// context's `asynchronous()` method.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::{Provided, Service, StartContext, StartError, StopContext};
///
/// struct Pool {
///     size: usize,
///     handle: Provided<Vec<u8>>,
/// }
///
/// impl Service for Pool {
///     fn start(&self, _context: &StartContext) -> Result<(), StartError> {
///         self.handle
///             .set(vec![0; self.size])
///             .map_err(|e| StartError::with_source("cannot publish pool", e))
///     }
///
///     fn stop(&self, _context: &StopContext) {}
/// }
/// ```
pub trait Service: Send + Sync + 'static {
    fn start(&self, context: &StartContext) -> Result<(), StartError>;

    fn stop(&self, context: &StopContext) {
        let _ = context;
    }
}

/// Service with no behavior. Useful for grouping dependencies under a name.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullService;

impl Service for NullService {
    fn start(&self, _context: &StartContext) -> Result<(), StartError> {
        Ok(())
    }
}

type StartFn = dyn Fn(&StartContext) -> Result<(), StartError> + Send + Sync;
type StopFn = dyn Fn(&StopContext) + Send + Sync;

/// Service assembled from closures.
///
/// ```rust
/// use ferrous_lifecycle::FnService;
///
/// let service = FnService::new(|_| Ok(())).on_stop(|ctx| {
///     println!("stopping {}", ctx.name());
/// });
/// # let _ = service;
/// ```
pub struct FnService {
    start: Box<StartFn>,
    stop: Option<Box<StopFn>>,
}

impl FnService {
    pub fn new<F>(start: F) -> Self
    where
        F: Fn(&StartContext) -> Result<(), StartError> + Send + Sync + 'static,
    {
        Self {
            start: Box::new(start),
            stop: None,
        }
    }

    pub fn on_stop<G>(mut self, stop: G) -> Self
    where
        G: Fn(&StopContext) + Send + Sync + 'static,
    {
        self.stop = Some(Box::new(stop));
        self
    }
}

impl Service for FnService {
    fn start(&self, context: &StartContext) -> Result<(), StartError> {
        (self.start)(context)
    }

    fn stop(&self, context: &StopContext) {
        if let Some(stop) = &self.stop {
            stop(context);
        }
    }
}

impl fmt::Debug for FnService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnService")
            .field("has_stop", &self.stop.is_some())
            .finish()
    }
}
