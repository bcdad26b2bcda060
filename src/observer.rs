//! Lifecycle listeners for service traceability.
//!
//! Listeners observe a controller's substate transitions and coarse
//! lifecycle events. Every callback runs as its own executor task, so a slow
//! listener delays the controller's next transition but never blocks the
//! thread that caused it.

use std::sync::Arc;

use crate::mode::{LifecycleEvent, Substate};
use crate::ServiceController;

/// Observer of a single controller's lifecycle.
///
/// Register with [`ServiceBuilder::add_listener`](crate::ServiceBuilder::add_listener)
/// before install, or [`ServiceController::add_listener`] afterwards. All
/// methods have empty defaults.
///
/// The controller counts each outstanding callback as pending work: the
/// controller (and therefore the container) is not stable until every
/// listener call has returned. A panicking listener is logged and otherwise
/// ignored.
///
/// # Examples
///
/// ```
/// use ferrous_lifecycle::{LifecycleEvent, ServiceController, ServiceListener};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Default)]
/// struct UpCounter(AtomicUsize);
///
/// impl ServiceListener for UpCounter {
///     fn lifecycle_event(&self, _controller: &ServiceController, event: LifecycleEvent) {
///         if event == LifecycleEvent::Up {
///             self.0.fetch_add(1, Ordering::SeqCst);
///         }
///     }
/// }
/// ```
pub trait ServiceListener: Send + Sync {
    /// The listener was attached to an installed controller.
    fn listener_added(&self, controller: &ServiceController) {
        let _ = controller;
    }

    /// The controller moved from one substate to another.
    fn transition(&self, controller: &ServiceController, from: Substate, to: Substate) {
        let _ = (controller, from, to);
    }

    /// The service came up, went down, failed or was removed.
    fn lifecycle_event(&self, controller: &ServiceController, event: LifecycleEvent) {
        let _ = (controller, event);
    }
}

/// A listener call queued by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListenerCall {
    Added,
    Transition(Substate, Substate),
    Event(LifecycleEvent),
}

impl ListenerCall {
    pub(crate) fn invoke(self, listener: &Arc<dyn ServiceListener>, controller: &ServiceController) {
        match self {
            ListenerCall::Added => listener.listener_added(controller),
            ListenerCall::Transition(from, to) => listener.transition(controller, from, to),
            ListenerCall::Event(event) => listener.lifecycle_event(controller, event),
        }
    }
}

/// Built-in listener that reports through `tracing`.
///
/// Transitions are logged at `DEBUG`, lifecycle events at `INFO` (failures
/// at `WARN`, with the recorded start error).
///
/// # Examples
///
/// ```
/// use ferrous_lifecycle::{LoggingListener, ServiceContainer, ServiceName};
/// use std::sync::Arc;
///
/// let container = ServiceContainer::new();
/// let mut builder = container.add_service(ServiceName::parse("app.logged").unwrap());
/// builder.add_listener(Arc::new(LoggingListener::new()));
/// builder.install().unwrap();
/// container.await_stability();
/// container.shutdown();
/// ```
pub struct LoggingListener {
    prefix: String,
}

impl LoggingListener {
    /// Creates a logging listener with the default prefix.
    pub fn new() -> Self {
        Self {
            prefix: "ferrous-lifecycle".to_string(),
        }
    }

    /// Creates a logging listener with a custom prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for LoggingListener {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceListener for LoggingListener {
    fn listener_added(&self, controller: &ServiceController) {
        tracing::debug!(prefix = %self.prefix, service = %controller.name(), "listener attached");
    }

    fn transition(&self, controller: &ServiceController, from: Substate, to: Substate) {
        tracing::debug!(
            prefix = %self.prefix,
            service = %controller.name(),
            %from,
            %to,
            "transition"
        );
    }

    fn lifecycle_event(&self, controller: &ServiceController, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Failed => {
                let reason = controller
                    .start_error()
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                tracing::warn!(
                    prefix = %self.prefix,
                    service = %controller.name(),
                    %reason,
                    "service failed to start"
                );
            }
            other => {
                tracing::info!(
                    prefix = %self.prefix,
                    service = %controller.name(),
                    event = ?other,
                    "service lifecycle event"
                );
            }
        }
    }
}
