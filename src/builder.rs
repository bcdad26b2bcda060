//! Service builder: declares a service, then installs it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::container::EngineContext;
use crate::controller::{ControllerParts, ServiceController, ServiceControllerImpl, StartContext, StopContext};
use crate::dependency::{AntiDependency, Dependency, DependencyLink, OptionalDependency};
use crate::error::{LifecycleError, LifecycleResult, StartError};
use crate::internal::find_cycle;
use crate::mode::{DependencyKind, Mode};
use crate::name::ServiceName;
use crate::observer::ServiceListener;
use crate::registration::{DirectDependency, Registration, ServiceRegistry};
use crate::service::{FnService, NullService, Service};
use crate::stability::StabilityMonitor;
use crate::value::{Injector, Provided, Required, ValueSlot};

struct DeclaredDependency {
    name: ServiceName,
    kind: DependencyKind,
    injections: Vec<Arc<ValueSlot>>,
}

/// Declares one service and installs it into a container.
///
/// Obtained from [`ServiceContainer::add_service`](crate::ServiceContainer::add_service)
/// or [`ChildTarget::add_service`](crate::ChildTarget::add_service).
/// Configuration methods take `&mut self`; [`install`](Self::install)
/// consumes the builder.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::{FnService, ServiceContainer, ServiceName};
///
/// let container = ServiceContainer::new();
///
/// let mut db = container.add_service(ServiceName::parse("app.db").unwrap());
/// let url = db.provides::<String>();
/// db.set_service(FnService::new(move |_| {
///     url.set("postgres://localhost".to_string()).map_err(|e| e.to_string().into())
/// }));
/// db.install().unwrap();
///
/// let mut api = container.add_service(ServiceName::parse("app.api").unwrap());
/// let db_url = api.requires::<String>(ServiceName::parse("app.db").unwrap());
/// api.set_service(FnService::new(move |_| {
///     let url = db_url.get().map_err(|e| e.to_string())?;
///     assert!(url.starts_with("postgres"));
///     Ok(())
/// }));
/// let api = api.install().unwrap();
///
/// container.await_stability();
/// assert_eq!(api.state(), ferrous_lifecycle::State::Up);
/// container.shutdown();
/// ```
pub struct ServiceBuilder {
    registry: Arc<ServiceRegistry>,
    engine: Arc<EngineContext>,
    name: ServiceName,
    aliases: Vec<ServiceName>,
    dependencies: Vec<DeclaredDependency>,
    conflict: Option<ServiceName>,
    primary_slot: Arc<ValueSlot>,
    primary_required: bool,
    provided: Vec<(ServiceName, Arc<ValueSlot>)>,
    outbound: Vec<Arc<ValueSlot>>,
    mode: Option<Mode>,
    listeners: Vec<Arc<dyn ServiceListener>>,
    monitors: Vec<Arc<StabilityMonitor>>,
    service: Option<Arc<dyn Service>>,
    parent: Option<Arc<ServiceControllerImpl>>,
}

impl ServiceBuilder {
    pub(crate) fn new(registry: Arc<ServiceRegistry>, engine: Arc<EngineContext>, name: ServiceName) -> Self {
        Self {
            registry,
            engine,
            primary_slot: ValueSlot::new(Some(name.clone())),
            name,
            aliases: Vec::new(),
            dependencies: Vec::new(),
            conflict: None,
            primary_required: false,
            provided: Vec::new(),
            outbound: Vec::new(),
            mode: None,
            listeners: Vec::new(),
            monitors: Vec::new(),
            service: None,
            parent: None,
        }
    }

    pub(crate) fn set_parent(&mut self, parent: Arc<ServiceControllerImpl>) {
        self.parent = Some(parent);
    }

    /// Primary name of the service being built.
    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    /// Installs the service under an additional name.
    pub fn add_alias(&mut self, alias: ServiceName) -> &mut Self {
        if alias != self.name && !self.aliases.contains(&alias) {
            self.aliases.push(alias);
        }
        self
    }

    fn declare(&mut self, name: ServiceName, kind: DependencyKind) -> &mut DeclaredDependency {
        match self.dependencies.iter().position(|d| d.name == name) {
            Some(i) => {
                let existing = &mut self.dependencies[i];
                if existing.kind != kind {
                    self.conflict.get_or_insert_with(|| name.clone());
                }
                &mut self.dependencies[i]
            }
            None => {
                self.dependencies.push(DeclaredDependency {
                    name,
                    kind,
                    injections: Vec::new(),
                });
                let last = self.dependencies.len() - 1;
                &mut self.dependencies[last]
            }
        }
    }

    fn inject_from(&mut self, name: ServiceName, kind: DependencyKind) -> Arc<ValueSlot> {
        let slot = ValueSlot::new(Some(name.clone()));
        self.declare(name, kind).injections.push(Arc::clone(&slot));
        slot
    }

    /// Declares a required dependency and returns a handle to its value.
    pub fn requires<T: Send + Sync + 'static>(&mut self, name: ServiceName) -> Required<T> {
        Required::new(name.clone(), self.inject_from(name, DependencyKind::Required))
    }

    /// Declares a required dependency without reading its value.
    pub fn add_dependency(&mut self, name: ServiceName) -> &mut Self {
        self.declare(name, DependencyKind::Required);
        self
    }

    /// Declares an optional dependency and returns a handle to its value,
    /// which stays empty while the dependency is absent.
    pub fn requires_optional<T: Send + Sync + 'static>(&mut self, name: ServiceName) -> Required<T> {
        Required::new(name.clone(), self.inject_from(name, DependencyKind::Optional))
    }

    pub fn add_optional_dependency(&mut self, name: ServiceName) -> &mut Self {
        self.declare(name, DependencyKind::Optional);
        self
    }

    /// Declares that this service may only run while `name` is not up.
    pub fn add_anti_dependency(&mut self, name: ServiceName) -> &mut Self {
        self.declare(name, DependencyKind::Anti);
        self
    }

    /// Handle for the primary value. The service must set it during start.
    pub fn provides<T: Send + Sync + 'static>(&mut self) -> Provided<T> {
        self.primary_required = true;
        Provided::new(self.name.clone(), Arc::clone(&self.primary_slot))
    }

    /// Publishes an additional value under its own name. The service must
    /// set it during start.
    pub fn provides_as<T: Send + Sync + 'static>(&mut self, name: ServiceName) -> Provided<T> {
        if name == self.name || self.aliases.contains(&name) {
            return self.provides();
        }
        if let Some((_, slot)) = self.provided.iter().find(|(n, _)| *n == name) {
            return Provided::new(name, Arc::clone(slot));
        }
        let slot = ValueSlot::new(Some(name.clone()));
        self.provided.push((name.clone(), Arc::clone(&slot)));
        Provided::new(name, slot)
    }

    /// Copies the primary value into `target` while the service is up.
    pub fn add_injection<T: Send + Sync + 'static>(&mut self, target: &Injector<T>) -> &mut Self {
        self.outbound.push(target.slot());
        self
    }

    /// Mode on commit. Defaults to the container's configured default.
    pub fn set_initial_mode(&mut self, mode: Mode) -> &mut Self {
        self.mode = Some(mode);
        self
    }

    pub fn add_listener(&mut self, listener: Arc<dyn ServiceListener>) -> &mut Self {
        self.listeners.push(listener);
        self
    }

    /// Reports this service's stability to `monitor` as well as to the
    /// container's own monitor.
    pub fn add_monitor(&mut self, monitor: Arc<StabilityMonitor>) -> &mut Self {
        if !self.monitors.iter().any(|m| Arc::ptr_eq(m, &monitor)) {
            self.monitors.push(monitor);
        }
        self
    }

    pub fn set_service<S: Service>(&mut self, service: S) -> &mut Self {
        self.service = Some(Arc::new(service));
        self
    }

    /// Uses a pair of closures as the service behavior.
    pub fn set_start_stop<F, G>(&mut self, start: F, stop: G) -> &mut Self
    where
        F: Fn(&StartContext) -> Result<(), StartError> + Send + Sync + 'static,
        G: Fn(&StopContext) + Send + Sync + 'static,
    {
        self.set_service(FnService::new(start).on_stop(stop))
    }

    /// Installs the service.
    ///
    /// Fails without touching the graph if a provided name is taken, or if
    /// the declared dependencies would close a cycle through services
    /// already installed.
    pub fn install(self) -> LifecycleResult<ServiceController> {
        if self.conflict.is_some() {
            return Err(LifecycleError::IllegalState(
                "a dependency was declared with conflicting kinds",
            ));
        }

        let mut provided_names = vec![self.name.clone()];
        provided_names.extend(self.aliases.iter().cloned());
        provided_names.extend(self.provided.iter().map(|(n, _)| n.clone()));

        if let Some(taken) = provided_names.iter().find(|n| self.registry.installed(n).is_some()) {
            return Err(LifecycleError::DuplicateService(taken.clone()));
        }

        let mut required: Vec<ServiceName> = self.dependencies.iter().map(|d| d.name.clone()).collect();
        if let Some(parent) = &self.parent {
            required.push(parent.primary_name().clone());
        }
        let registry = &self.registry;
        if let Some(path) = find_cycle(&self.name, &provided_names, &required, |n| {
            registry.installed(n).map(|c| c.dependency_names())
        }) {
            return Err(LifecycleError::CircularDependency(path));
        }

        let mut touched: Vec<Arc<Registration>> = Vec::new();
        let registrations: Vec<Arc<Registration>> =
            provided_names.iter().map(|n| self.registry.reserve(n)).collect();
        touched.extend(registrations.iter().cloned());

        let mut links = Vec::with_capacity(self.dependencies.len() + 1);
        if let Some(parent) = &self.parent {
            let registration = self.registry.reserve(parent.primary_name());
            touched.push(Arc::clone(&registration));
            links.push(DependencyLink {
                kind: DependencyKind::Required,
                dependency: DirectDependency::new(registration),
                injections: Vec::new(),
            });
        }
        for declared in self.dependencies {
            let registration = self.registry.reserve(&declared.name);
            touched.push(Arc::clone(&registration));
            let dependency: Arc<dyn Dependency> = match declared.kind {
                DependencyKind::Required => DirectDependency::new(registration),
                DependencyKind::Optional => {
                    OptionalDependency::new(registration, Arc::clone(&self.engine), self.monitors.clone())
                }
                DependencyKind::Anti => AntiDependency::new(registration),
            };
            links.push(DependencyLink {
                kind: declared.kind,
                dependency,
                injections: declared.injections,
            });
        }

        let mut values = HashMap::new();
        values.insert(self.name.clone(), Arc::clone(&self.primary_slot));
        for alias in &self.aliases {
            values.insert(alias.clone(), Arc::clone(&self.primary_slot));
        }
        let mut required_values = Vec::new();
        if self.primary_required {
            required_values.push(Arc::clone(&self.primary_slot));
        }
        for (name, slot) in &self.provided {
            values.insert(name.clone(), Arc::clone(slot));
            required_values.push(Arc::clone(slot));
        }

        let mode = self.mode.unwrap_or(self.engine.default_mode);
        let controller = ServiceControllerImpl::new(ControllerParts {
            id: self.registry.next_controller_id(),
            primary: self.name.clone(),
            aliases: self.aliases,
            service: self.service.unwrap_or_else(|| Arc::new(NullService)),
            dependencies: links,
            registrations,
            values,
            required_values,
            outbound: self.outbound,
            parent: self.parent,
            engine: Arc::clone(&self.engine),
            monitors: self.monitors,
            listeners: self.listeners,
        });
        self.registry.adopt(&controller);

        let result = controller
            .start_installation()
            .and_then(|()| controller.start_configuration());
        match &result {
            Ok(()) => {
                tracing::debug!(service = %self.name, %mode, "service installed");
                controller.commit_installation(mode);
            }
            Err(err) => {
                tracing::debug!(service = %self.name, error = %err, "install rolled back");
                controller.rollback_installation();
            }
        }
        for registration in &touched {
            self.registry.unreserve(registration);
        }
        result.map(|()| ServiceController::new(controller))
    }
}

impl fmt::Debug for ServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBuilder")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("dependencies", &self.dependencies.len())
            .field("mode", &self.mode)
            .finish()
    }
}
