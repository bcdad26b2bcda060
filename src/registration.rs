//! Name registrations and the container-wide registry.
//!
//! A [`Registration`] is the rendezvous point for one [`ServiceName`]: it
//! exists as soon as anything installs under or depends on the name, holds
//! at most one controller, and fans the controller's status out to every
//! dependent attached to the name. Dependents attach and detach without
//! caring whether a controller is currently installed.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};

use crate::controller::ServiceControllerImpl;
use crate::dependency::{Dependency, Dependent, Notification, Published};
use crate::error::{LifecycleError, LifecycleResult};
use crate::name::ServiceName;
use crate::value::AnyArc;

pub(crate) struct Registration {
    name: ServiceName,
    state: RwLock<RegistrationState>,
}

struct RegistrationState {
    controller: Option<Weak<ServiceControllerImpl>>,
    dependents: Vec<Arc<dyn Dependent>>,
    published: Published,
    up_demand: u32,
    down_demand: u32,
    /// Installs currently holding this registration alive
    pending: u32,
}

impl RegistrationState {
    fn controller(&self) -> Option<Arc<ServiceControllerImpl>> {
        self.controller.as_ref().and_then(Weak::upgrade)
    }
}

impl Registration {
    pub(crate) fn new(name: ServiceName) -> Arc<Self> {
        Arc::new(Self {
            name,
            state: RwLock::new(RegistrationState {
                controller: None,
                dependents: Vec::new(),
                published: Published::ABSENT,
                up_demand: 0,
                down_demand: 0,
                pending: 0,
            }),
        })
    }

    pub(crate) fn controller(&self) -> Option<Arc<ServiceControllerImpl>> {
        self.state.read().controller()
    }

    /// Installs `controller` under this name and hands it any demand that
    /// accumulated while the name was vacant.
    pub(crate) fn set_controller(&self, controller: &Arc<ServiceControllerImpl>) -> LifecycleResult<()> {
        let mut state = self.state.write();
        if state.controller().is_some() {
            return Err(LifecycleError::DuplicateService(self.name.clone()));
        }
        state.controller = Some(Arc::downgrade(controller));
        if state.up_demand > 0 {
            controller.add_demand();
        }
        if state.down_demand > 0 {
            controller.add_down_demand();
        }
        Ok(())
    }

    /// Detaches `controller` if it is the one installed here.
    pub(crate) fn clear_controller(&self, controller: &Arc<ServiceControllerImpl>) {
        let mut state = self.state.write();
        let installed = state
            .controller
            .as_ref()
            .map_or(false, |c| Weak::ptr_eq(c, &Arc::downgrade(controller)));
        if !installed {
            return;
        }
        state.controller = None;
        if state.up_demand > 0 {
            controller.remove_demand();
        }
        if state.down_demand > 0 {
            controller.remove_down_demand();
        }
    }

    /// Records one status flip and delivers it to every dependent.
    ///
    /// The flip happens under the write lock; delivery runs under the
    /// downgraded read lock so a concurrent `add_dependent` sees either the
    /// old status and the flip, or the new status alone.
    pub(crate) fn publish(&self, notification: Notification) {
        let mut state = self.state.write();
        if !state.published.apply(notification) {
            return;
        }
        let state = RwLockWriteGuard::downgrade(state);
        tracing::trace!(
            service = %self.name,
            ?notification,
            dependents = state.dependents.len(),
            "delivering notification"
        );
        for dependent in &state.dependents {
            notification.deliver(dependent.as_ref(), &self.name);
        }
    }

    /// Adjusts up or down demand, forwarding the 0 <-> 1 edges.
    pub(crate) fn add_demand_of(&self, up: bool) {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let counter = if up { &mut state.up_demand } else { &mut state.down_demand };
        *counter += 1;
        if *counter != 1 {
            return;
        }
        if let Some(controller) = state.controller() {
            if up {
                controller.add_demand();
            } else {
                controller.add_down_demand();
            }
        }
    }

    pub(crate) fn remove_demand_of(&self, up: bool) {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let counter = if up { &mut state.up_demand } else { &mut state.down_demand };
        match counter.checked_sub(1) {
            Some(next) => *counter = next,
            None => {
                tracing::error!(service = %self.name, up, "registration demand dropped below zero");
                return;
            }
        }
        if *counter != 0 {
            return;
        }
        if let Some(controller) = state.controller() {
            if up {
                controller.remove_demand();
            } else {
                controller.remove_down_demand();
            }
        }
    }

    pub(crate) fn reserve(&self) {
        self.state.write().pending += 1;
    }

    pub(crate) fn unreserve(&self) {
        let mut state = self.state.write();
        state.pending = state.pending.saturating_sub(1);
    }

    /// True when nothing refers to the name any more.
    pub(crate) fn is_removable(&self) -> bool {
        let state = self.state.read();
        state.controller().is_none() && state.dependents.is_empty() && state.pending == 0
    }

    #[cfg(test)]
    pub(crate) fn dependent_count(&self) -> usize {
        self.state.read().dependents.len()
    }

    /// (up, down) demand counts.
    #[cfg(test)]
    pub(crate) fn demand(&self) -> (u32, u32) {
        let state = self.state.read();
        (state.up_demand, state.down_demand)
    }
}

impl Registration {
    pub(crate) fn name(&self) -> &ServiceName {
        &self.name
    }

    /// Attaches a dependent and replays the difference between what a new
    /// dependent assumes and what has actually been published.
    pub(crate) fn add_dependent(&self, dependent: Arc<dyn Dependent>) {
        let mut state = self.state.write();
        for notification in Published::ASSUMED.diff(&state.published) {
            notification.deliver(dependent.as_ref(), &self.name);
        }
        state.dependents.push(dependent);
    }

    pub(crate) fn remove_dependent(&self, dependent: &Arc<dyn Dependent>) {
        self.state
            .write()
            .dependents
            .retain(|d| !Arc::ptr_eq(d, dependent));
    }

    pub(crate) fn dependent_started(&self) {
        if let Some(controller) = self.state.read().controller() {
            controller.dependent_started();
        }
    }

    pub(crate) fn dependent_stopped(&self) {
        if let Some(controller) = self.state.read().controller() {
            controller.dependent_stopped();
        }
    }

    /// Value the installed controller provides under this name.
    pub(crate) fn value(&self) -> Option<AnyArc> {
        let controller = self.controller()?;
        controller.provided_value(&self.name)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("installed", &state.controller().is_some())
            .field("dependents", &state.dependents.len())
            .field("published", &state.published)
            .field("up_demand", &state.up_demand)
            .field("down_demand", &state.down_demand)
            .finish()
    }
}

/// Plain required edge: the controller depends on the registration itself.
pub(crate) struct DirectDependency {
    registration: Arc<Registration>,
}

impl DirectDependency {
    pub(crate) fn new(registration: Arc<Registration>) -> Arc<Self> {
        Arc::new(Self { registration })
    }
}

impl Dependency for DirectDependency {
    fn name(&self) -> &ServiceName {
        &self.registration.name
    }

    fn registration(&self) -> &Arc<Registration> {
        &self.registration
    }

    fn add_dependent(&self, dependent: Arc<dyn Dependent>) {
        self.registration.add_dependent(dependent);
    }

    fn remove_dependent(&self, dependent: &Arc<dyn Dependent>) {
        self.registration.remove_dependent(dependent);
    }

    fn add_demand(&self) {
        self.registration.add_demand_of(true);
    }

    fn remove_demand(&self) {
        self.registration.remove_demand_of(true);
    }

    fn dependent_started(&self) {
        self.registration.dependent_started();
    }

    fn dependent_stopped(&self) {
        self.registration.dependent_stopped();
    }

    fn value(&self) -> Option<AnyArc> {
        self.registration.value()
    }
}

/// Name-to-registration map plus the arena that owns live controllers.
pub(crate) struct ServiceRegistry {
    registrations: RwLock<HashMap<ServiceName, Arc<Registration>>>,
    controllers: Mutex<HashMap<u64, Arc<ServiceControllerImpl>>>,
    next_id: AtomicU64,
}

impl ServiceRegistry {
    pub(crate) fn new() -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            controllers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_controller_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the registration for `name`, creating it if needed, and pins
    /// it until the matching [`unreserve`](Self::unreserve).
    pub(crate) fn reserve(&self, name: &ServiceName) -> Arc<Registration> {
        let mut map = self.registrations.write();
        let registration = map
            .entry(name.clone())
            .or_insert_with(|| Registration::new(name.clone()));
        registration.reserve();
        Arc::clone(registration)
    }

    pub(crate) fn unreserve(&self, registration: &Arc<Registration>) {
        registration.unreserve();
        self.prune(registration);
    }

    /// Drops the registration from the map once nothing refers to it.
    pub(crate) fn prune(&self, registration: &Arc<Registration>) {
        let mut map = self.registrations.write();
        let current = map
            .get(&registration.name)
            .map_or(false, |r| Arc::ptr_eq(r, registration));
        if current && registration.is_removable() {
            map.remove(&registration.name);
        }
    }

    pub(crate) fn registration(&self, name: &ServiceName) -> Option<Arc<Registration>> {
        self.registrations.read().get(name).cloned()
    }

    /// Controller currently installed under `name`.
    pub(crate) fn installed(&self, name: &ServiceName) -> Option<Arc<ServiceControllerImpl>> {
        self.registration(name).and_then(|r| r.controller())
    }

    pub(crate) fn adopt(&self, controller: &Arc<ServiceControllerImpl>) {
        self.controllers
            .lock()
            .insert(controller.id(), Arc::clone(controller));
    }

    pub(crate) fn release(&self, id: u64) -> Option<Arc<ServiceControllerImpl>> {
        self.controllers.lock().remove(&id)
    }

    pub(crate) fn controllers(&self) -> Vec<Arc<ServiceControllerImpl>> {
        self.controllers.lock().values().cloned().collect()
    }

    /// Sorted names that currently have a controller installed.
    pub(crate) fn installed_names(&self) -> Vec<ServiceName> {
        let mut names: Vec<ServiceName> = self
            .registrations
            .read()
            .values()
            .filter(|r| r.controller().is_some())
            .map(|r| r.name.clone())
            .collect();
        names.sort();
        names
    }

    #[cfg(test)]
    pub(crate) fn registration_count(&self) -> usize {
        self.registrations.read().len()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("registrations", &self.registrations.read().len())
            .field("controllers", &self.controllers.lock().len())
            .finish()
    }
}
