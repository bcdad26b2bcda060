//! The service container.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::builder::ServiceBuilder;
use crate::config::ContainerConfig;
use crate::controller::ServiceController;
use crate::error::{LifecycleError, LifecycleResult};
use crate::executor::{Executor, ThreadPoolExecutor};
use crate::mode::Mode;
use crate::name::ServiceName;
use crate::registration::ServiceRegistry;
use crate::stability::StabilityMonitor;

/// Shared by every controller of one container.
pub(crate) struct EngineContext {
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) monitor: Arc<StabilityMonitor>,
    pub(crate) registry: Weak<ServiceRegistry>,
    pub(crate) default_mode: Mode,
}

#[cfg(test)]
impl EngineContext {
    /// Engine with a private pool and no registry.
    pub(crate) fn for_tests() -> Arc<Self> {
        Arc::new(Self {
            executor: Arc::new(ThreadPoolExecutor::new("test-engine", Duration::from_secs(1))),
            monitor: Arc::new(StabilityMonitor::new()),
            registry: Weak::new(),
            default_mode: Mode::Active,
        })
    }
}

/// Owns a graph of services.
///
/// The container holds the name registry, the executor every controller
/// task runs on and a [`StabilityMonitor`] covering all of its services.
/// Install services with [`add_service`](Self::add_service); wait for the
/// graph to settle with [`await_stability`](Self::await_stability).
///
/// Dropping the container does not stop running services; call
/// [`shutdown`](Self::shutdown) first.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::{ContainerConfig, ServiceContainer, ServiceName, State};
///
/// let container = ServiceContainer::with_config(ContainerConfig::default().with_name("demo"));
/// let svc = container.add_service(ServiceName::parse("demo.clock").unwrap()).install().unwrap();
/// container.await_stability();
///
/// assert_eq!(svc.state(), State::Up);
/// assert_eq!(container.service_names(), vec![ServiceName::parse("demo.clock").unwrap()]);
/// container.shutdown();
/// assert!(container.service_names().is_empty());
/// ```
pub struct ServiceContainer {
    name: String,
    registry: Arc<ServiceRegistry>,
    engine: Arc<EngineContext>,
}

impl ServiceContainer {
    /// Container with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    pub fn with_config(config: ContainerConfig) -> Self {
        let executor = ThreadPoolExecutor::new(config.thread_name_prefix.clone(), config.worker_keep_alive);
        Self::with_executor(config, Arc::new(executor))
    }

    /// Container running its tasks on a custom executor.
    pub fn with_executor(config: ContainerConfig, executor: Arc<dyn Executor>) -> Self {
        let registry = Arc::new(ServiceRegistry::new());
        let engine = Arc::new(EngineContext {
            executor,
            monitor: Arc::new(StabilityMonitor::new()),
            registry: Arc::downgrade(&registry),
            default_mode: config.default_mode,
        });
        tracing::debug!(container = %config.name, "container created");
        Self {
            name: config.name,
            registry,
            engine,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts building a service with the given primary name.
    pub fn add_service(&self, name: ServiceName) -> ServiceBuilder {
        ServiceBuilder::new(Arc::clone(&self.registry), Arc::clone(&self.engine), name)
    }

    /// Controller installed under `name` (primary, alias or provided name).
    pub fn service(&self, name: &ServiceName) -> Option<ServiceController> {
        self.registry.installed(name).map(ServiceController::new)
    }

    pub fn required_service(&self, name: &ServiceName) -> LifecycleResult<ServiceController> {
        self.service(name)
            .ok_or_else(|| LifecycleError::ServiceNotFound(name.clone()))
    }

    /// Sorted names that currently have a service installed.
    pub fn service_names(&self) -> Vec<ServiceName> {
        self.registry.installed_names()
    }

    /// The monitor covering every service in this container.
    pub fn monitor(&self) -> &Arc<StabilityMonitor> {
        &self.engine.monitor
    }

    pub fn is_stable(&self) -> bool {
        self.engine.monitor.is_stable()
    }

    /// Blocks until every service has come to rest.
    pub fn await_stability(&self) {
        self.engine.monitor.await_stability();
    }

    /// Returns true when stable before the timeout.
    pub fn await_stability_timeout(&self, timeout: Duration) -> bool {
        self.engine.monitor.await_stability_timeout(timeout)
    }

    /// Removes every service and waits until they are gone.
    pub fn shutdown(&self) {
        tracing::debug!(container = %self.name, "shutting down");
        for controller in self.registry.controllers() {
            if let Err(err) = controller.change_mode(None, Mode::Remove) {
                tracing::debug!(service = %controller.primary_name(), error = %err, "remove skipped");
            }
        }
        self.await_stability();
    }
}

impl Default for ServiceContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("name", &self.name)
            .field("registry", &self.registry)
            .field("unstable", &self.engine.monitor.unstable_count())
            .finish()
    }
}
