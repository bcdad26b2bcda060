//! Service controllers.
//!
//! One controller drives one service through its lifecycle. It keeps a set
//! of counters fed by its dependencies (how many are unavailable, failed or
//! not up) and by its dependents (how many demand it, how many run on top
//! of it), and re-evaluates its transition table whenever one of those
//! counters crosses zero or the mode changes.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::container::EngineContext;
use crate::dependency::{DependencyLink, Dependent};
use crate::error::{LifecycleError, LifecycleResult, StartError};
use crate::mode::{Mode, State, Substate, Transition};
use crate::name::ServiceName;
use crate::observer::{ListenerCall, ServiceListener};
use crate::registration::Registration;
use crate::service::Service;
use crate::stability::StabilityMonitor;
use crate::value::{AnyArc, ValueSlot};

mod context;
mod state;
mod tasks;

pub use context::{ChildTarget, StartCompletion, StartContext, StopCompletion, StopContext};

use state::ControllerState;
use tasks::Task;

/// Everything a builder assembles for a new controller.
pub(crate) struct ControllerParts {
    pub(crate) id: u64,
    pub(crate) primary: ServiceName,
    pub(crate) aliases: Vec<ServiceName>,
    pub(crate) service: Arc<dyn Service>,
    pub(crate) dependencies: Vec<DependencyLink>,
    /// Primary, alias and extra provided-name registrations
    pub(crate) registrations: Vec<Arc<Registration>>,
    pub(crate) values: HashMap<ServiceName, Arc<ValueSlot>>,
    /// Slots the service promised to fill during start
    pub(crate) required_values: Vec<Arc<ValueSlot>>,
    pub(crate) outbound: Vec<Arc<ValueSlot>>,
    pub(crate) parent: Option<Arc<ServiceControllerImpl>>,
    pub(crate) engine: Arc<EngineContext>,
    pub(crate) monitors: Vec<Arc<StabilityMonitor>>,
    pub(crate) listeners: Vec<Arc<dyn ServiceListener>>,
}

pub(crate) struct ServiceControllerImpl {
    id: u64,
    this: Weak<ServiceControllerImpl>,
    primary: ServiceName,
    aliases: Vec<ServiceName>,
    service: Arc<dyn Service>,
    dependencies: Vec<DependencyLink>,
    registrations: Vec<Arc<Registration>>,
    values: HashMap<ServiceName, Arc<ValueSlot>>,
    required_values: Vec<Arc<ValueSlot>>,
    outbound: Vec<Arc<ValueSlot>>,
    parent: Option<Arc<ServiceControllerImpl>>,
    engine: Arc<EngineContext>,
    monitors: Vec<Arc<StabilityMonitor>>,
    /// What this controller registers with its dependencies
    as_dependent: Arc<dyn Dependent>,
    state: Mutex<ControllerState>,
    changed: Condvar,
}

/// Receives dependency notifications on behalf of a controller.
struct ControllerDependent {
    controller: Weak<ServiceControllerImpl>,
}

impl ControllerDependent {
    fn with<F: FnOnce(&ServiceControllerImpl)>(&self, f: F) {
        if let Some(controller) = self.controller.upgrade() {
            f(&controller);
        }
    }
}

impl Dependent for ControllerDependent {
    fn dependency_available(&self, name: &ServiceName) {
        self.with(|c| c.dependency_available(name));
    }

    fn dependency_unavailable(&self, name: &ServiceName) {
        self.with(|c| c.dependency_unavailable(name));
    }

    fn dependency_up(&self) {
        self.with(|c| c.dependency_up());
    }

    fn dependency_down(&self) {
        self.with(|c| c.dependency_down());
    }

    fn dependency_failed(&self) {
        self.with(|c| c.dependency_failed());
    }

    fn dependency_succeeded(&self) {
        self.with(|c| c.dependency_succeeded());
    }
}

fn decrement(counter: &mut u32, service: &ServiceName, what: &'static str) -> bool {
    match counter.checked_sub(1) {
        Some(next) => {
            *counter = next;
            next == 0
        }
        None => {
            tracing::error!(service = %service, counter = what, "counter dropped below zero");
            false
        }
    }
}

impl ServiceControllerImpl {
    pub(crate) fn new(parts: ControllerParts) -> Arc<Self> {
        let state = ControllerState::new(parts.dependencies.len(), parts.listeners);
        Arc::new_cyclic(|this| Self {
            id: parts.id,
            this: this.clone(),
            primary: parts.primary,
            aliases: parts.aliases,
            service: parts.service,
            dependencies: parts.dependencies,
            registrations: parts.registrations,
            values: parts.values,
            required_values: parts.required_values,
            outbound: parts.outbound,
            parent: parts.parent,
            engine: parts.engine,
            monitors: parts.monitors,
            as_dependent: Arc::new(ControllerDependent {
                controller: this.clone(),
            }),
            state: Mutex::new(state),
            changed: Condvar::new(),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn primary_name(&self) -> &ServiceName {
        &self.primary
    }

    pub(crate) fn engine(&self) -> &Arc<EngineContext> {
        &self.engine
    }

    pub(crate) fn dependency_names(&self) -> Vec<ServiceName> {
        self.dependencies.iter().map(|l| l.name().clone()).collect()
    }

    pub(crate) fn provided_value(&self, name: &ServiceName) -> Option<AnyArc> {
        self.values.get(name).and_then(|slot| slot.get())
    }

    /// Updates counters under the lock and re-evaluates only when `update`
    /// reports a threshold crossing.
    fn on_counter<F>(&self, update: F)
    where
        F: FnOnce(&mut ControllerState) -> bool,
    {
        self.locked(|st, tasks| {
            if update(st) {
                self.transition(st, tasks);
            }
        });
    }

    // ---- downstream notifications -------------------------------------

    fn dependency_available(&self, name: &ServiceName) {
        self.on_counter(|st| {
            if let Some(count) = st.unavailable_names.get_mut(name) {
                *count -= 1;
                if *count == 0 {
                    st.unavailable_names.remove(name);
                }
            }
            decrement(&mut st.unavailable, &self.primary, "unavailable")
        });
    }

    fn dependency_unavailable(&self, name: &ServiceName) {
        self.on_counter(|st| {
            *st.unavailable_names.entry(name.clone()).or_insert(0) += 1;
            st.unavailable += 1;
            st.unavailable == 1
        });
    }

    fn dependency_up(&self) {
        self.on_counter(|st| decrement(&mut st.stopping, &self.primary, "stopping"));
    }

    fn dependency_down(&self) {
        self.on_counter(|st| {
            st.stopping += 1;
            st.stopping == 1
        });
    }

    fn dependency_failed(&self) {
        self.on_counter(|st| {
            st.failed += 1;
            st.failed == 1
        });
    }

    fn dependency_succeeded(&self) {
        self.on_counter(|st| decrement(&mut st.failed, &self.primary, "failed"));
    }

    // ---- upstream notifications ---------------------------------------

    pub(crate) fn add_demand(&self) {
        self.on_counter(|st| {
            st.demanded_by += 1;
            st.demanded_by == 1 && st.demand_sensitive()
        });
    }

    pub(crate) fn remove_demand(&self) {
        self.on_counter(|st| {
            decrement(&mut st.demanded_by, &self.primary, "demanded_by") && st.demand_sensitive()
        });
    }

    pub(crate) fn add_down_demand(&self) {
        self.on_counter(|st| {
            st.down_demanded_by += 1;
            st.down_demanded_by == 1 && matches!(st.mode, Mode::Lazy | Mode::Passive)
        });
    }

    pub(crate) fn remove_down_demand(&self) {
        self.on_counter(|st| {
            decrement(&mut st.down_demanded_by, &self.primary, "down_demanded_by")
                && matches!(st.mode, Mode::Lazy | Mode::Passive)
        });
    }

    pub(crate) fn dependent_started(&self) {
        self.on_counter(|st| {
            st.running_dependents += 1;
            false
        });
    }

    pub(crate) fn dependent_stopped(&self) {
        self.on_counter(|st| decrement(&mut st.running_dependents, &self.primary, "running_dependents"));
    }

    // ---- children ------------------------------------------------------

    pub(crate) fn add_child(&self, child: &Arc<ServiceControllerImpl>) -> LifecycleResult<()> {
        let mut st = self.state.lock();
        if !matches!(st.substate, Substate::Starting | Substate::Up) {
            return Err(LifecycleError::IllegalState(
                "children can only be added while the parent is starting or up",
            ));
        }
        st.children.push(Arc::downgrade(child));
        Ok(())
    }

    pub(crate) fn remove_child(&self, child: &Arc<ServiceControllerImpl>) {
        let child = Arc::downgrade(child);
        self.on_counter(|st| {
            let before = st.children.len();
            st.children.retain(|c| !Weak::ptr_eq(c, &child) && c.strong_count() > 0);
            before > 0 && st.children.is_empty()
        });
    }

    // ---- mode ------------------------------------------------------------

    /// Changes the mode, optionally only if it currently equals `expected`.
    /// Returns whether the expectation held.
    pub(crate) fn change_mode(&self, expected: Option<Mode>, mode: Mode) -> LifecycleResult<bool> {
        let mut outcome = Ok(true);
        self.locked(|st, tasks| {
            if expected.map_or(false, |e| e != st.mode) {
                outcome = Ok(false);
                return;
            }
            if st.mode == mode {
                return;
            }
            if st.mode == Mode::Remove {
                outcome = Err(LifecycleError::IllegalState("service is being removed"));
                return;
            }
            tracing::debug!(service = %self.primary, from = %st.mode, to = %mode, "mode change");
            st.mode = mode;
            self.transition(st, tasks);
        });
        outcome
    }

    fn retry(&self) -> bool {
        let mut retried = false;
        self.locked(|st, tasks| {
            if st.substate == Substate::StartFailed && st.failed == 0 && st.start_error.is_some() {
                tracing::debug!(service = %self.primary, "retrying failed start");
                st.start_error = None;
                retried = true;
                self.transition(st, tasks);
            }
        });
        retried
    }

    // ---- install protocol ----------------------------------------------

    /// Claims every provided name. On a duplicate, names already claimed
    /// are released again and the error is returned.
    pub(crate) fn start_installation(self: &Arc<Self>) -> LifecycleResult<()> {
        for (i, registration) in self.registrations.iter().enumerate() {
            if let Err(err) = registration.set_controller(self) {
                for claimed in &self.registrations[..i] {
                    claimed.clear_controller(self);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Attaches to the parent and to every dependency. Notifications
    /// replayed here only move counters: a new controller does not
    /// transition.
    pub(crate) fn start_configuration(self: &Arc<Self>) -> LifecycleResult<()> {
        if let Some(parent) = &self.parent {
            parent.add_child(self)?;
        }
        for link in &self.dependencies {
            link.dependency.add_dependent(Arc::clone(&self.as_dependent));
        }
        Ok(())
    }

    pub(crate) fn commit_installation(&self, mode: Mode) {
        self.locked(|st, tasks| {
            st.mode = mode;
            for listener in &st.listeners {
                tasks.push(Task::Listener(Arc::clone(listener), ListenerCall::Added));
            }
            self.apply_transition(st, Transition::NewToDown, tasks);
            self.transition(st, tasks);
        });
    }

    pub(crate) fn rollback_installation(&self) {
        self.locked(|st, tasks| {
            st.mode = Mode::Remove;
            st.substate = Substate::Cancelled;
            st.listeners.clear();
            self.transition(st, tasks);
        });
    }

    #[cfg(test)]
    pub(crate) fn counters(&self) -> Counters {
        let st = self.state.lock();
        Counters {
            unavailable: st.unavailable,
            failed: st.failed,
            stopping: st.stopping,
            demanded_by: st.demanded_by,
            down_demanded_by: st.down_demanded_by,
            running_dependents: st.running_dependents,
            async_tasks: st.async_tasks,
        }
    }
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Counters {
    pub(crate) unavailable: u32,
    pub(crate) failed: u32,
    pub(crate) stopping: u32,
    pub(crate) demanded_by: u32,
    pub(crate) down_demanded_by: u32,
    pub(crate) running_dependents: u32,
    pub(crate) async_tasks: u32,
}

/// Handle to an installed service.
///
/// Cloning is cheap; all clones refer to the same controller. The handle
/// stays usable after the service is removed and then reports
/// [`State::Removed`].
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::{Mode, ServiceContainer, ServiceName, State};
///
/// let container = ServiceContainer::new();
/// let controller = container
///     .add_service(ServiceName::parse("app.cache").unwrap())
///     .install()
///     .unwrap();
/// container.await_stability();
/// assert_eq!(controller.state(), State::Up);
///
/// controller.set_mode(Mode::Never).unwrap();
/// container.await_stability();
/// assert_eq!(controller.state(), State::Down);
/// container.shutdown();
/// ```
#[derive(Clone)]
pub struct ServiceController {
    inner: Arc<ServiceControllerImpl>,
}

impl ServiceController {
    pub(crate) fn new(inner: Arc<ServiceControllerImpl>) -> Self {
        Self { inner }
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<ServiceControllerImpl> {
        &self.inner
    }

    /// Primary name.
    pub fn name(&self) -> &ServiceName {
        &self.inner.primary
    }

    pub fn aliases(&self) -> &[ServiceName] {
        &self.inner.aliases
    }

    /// Names this service depends on, in declaration order.
    pub fn dependencies(&self) -> Vec<ServiceName> {
        self.inner.dependency_names()
    }

    /// Parent service, for children installed through a [`ChildTarget`].
    pub fn parent(&self) -> Option<ServiceController> {
        self.inner.parent.as_ref().map(|p| ServiceController::new(Arc::clone(p)))
    }

    pub fn mode(&self) -> Mode {
        self.inner.state.lock().mode
    }

    pub fn state(&self) -> State {
        self.substate().state()
    }

    pub fn substate(&self) -> Substate {
        self.inner.state.lock().substate
    }

    /// Changes the mode. Setting the current mode again does nothing; any
    /// change away from [`Mode::Remove`] is rejected.
    pub fn set_mode(&self, mode: Mode) -> LifecycleResult<()> {
        self.inner.change_mode(None, mode).map(|_| ())
    }

    /// Changes the mode only if it currently equals `expected`.
    pub fn compare_and_set_mode(&self, expected: Mode, mode: Mode) -> LifecycleResult<bool> {
        self.inner.change_mode(Some(expected), mode)
    }

    /// Retries a failed start. Returns false when the service is not in
    /// START_FAILED or one of its dependencies has itself failed.
    pub fn retry(&self) -> bool {
        self.inner.retry()
    }

    /// The error recorded by the last failed start.
    pub fn start_error(&self) -> Option<StartError> {
        self.inner.state.lock().start_error.clone()
    }

    /// Dependencies currently reported unavailable, sorted.
    pub fn unavailable_dependencies(&self) -> Vec<ServiceName> {
        self.inner
            .state
            .lock()
            .unavailable_names
            .keys()
            .cloned()
            .collect()
    }

    pub fn add_listener(&self, listener: Arc<dyn ServiceListener>) {
        self.inner.locked(|st, tasks| {
            if !matches!(st.substate, Substate::New | Substate::Cancelled | Substate::Removed) {
                tasks.push(Task::Listener(Arc::clone(&listener), ListenerCall::Added));
            }
            if st.substate != Substate::Removed {
                st.listeners.push(listener);
            }
        });
    }

    /// Detaches a listener. Returns false when it was not attached.
    pub fn remove_listener(&self, listener: &Arc<dyn ServiceListener>) -> bool {
        let mut st = self.inner.state.lock();
        let before = st.listeners.len();
        st.listeners.retain(|l| !Arc::ptr_eq(l, listener));
        st.listeners.len() != before
    }

    /// The primary value, if the service is up and provided one.
    ///
    /// Fails with [`LifecycleError::ValueNotAvailable`] while the service
    /// is still starting, even if the start already set the value.
    pub fn value<T: Send + Sync + 'static>(&self) -> LifecycleResult<Arc<T>> {
        let substate = self.inner.state.lock().substate;
        self.value_in(substate)
    }

    fn value_in<T: Send + Sync + 'static>(&self, substate: Substate) -> LifecycleResult<Arc<T>> {
        let name = self.name().clone();
        if !matches!(substate, Substate::Up | Substate::StopRequested) {
            return Err(LifecycleError::ValueNotAvailable(name));
        }
        match self.inner.provided_value(&name) {
            Some(value) => value.downcast::<T>().map_err(|_| LifecycleError::TypeMismatch {
                name,
                expected: std::any::type_name::<T>(),
            }),
            None => Err(LifecycleError::ValueNotAvailable(name)),
        }
    }

    /// Blocks until the service is up, failed or removed, then returns its
    /// primary value.
    pub fn await_value<T: Send + Sync + 'static>(&self) -> LifecycleResult<Arc<T>> {
        let substate = self.await_settled(None)?;
        self.value_in(substate)
    }

    /// Like [`await_value`](Self::await_value) but gives up after `timeout`
    /// with [`LifecycleError::ValueNotAvailable`].
    pub fn await_value_timeout<T: Send + Sync + 'static>(&self, timeout: Duration) -> LifecycleResult<Arc<T>> {
        let substate = self.await_settled(Some(Instant::now() + timeout))?;
        self.value_in(substate)
    }

    /// Waits for UP, START_FAILED or REMOVED and returns the substate seen.
    fn await_settled(&self, deadline: Option<Instant>) -> LifecycleResult<Substate> {
        let mut st = self.inner.state.lock();
        loop {
            match st.substate {
                Substate::Up => return Ok(Substate::Up),
                Substate::Removed => return Err(LifecycleError::ServiceRemoved(self.name().clone())),
                Substate::StartFailed => {
                    if let Some(err) = &st.start_error {
                        return Err(LifecycleError::StartFailed(err.clone()));
                    }
                }
                _ => {}
            }
            match deadline {
                None => self.inner.changed.wait(&mut st),
                Some(deadline) => {
                    if self.inner.changed.wait_until(&mut st, deadline).timed_out() {
                        return Err(LifecycleError::ValueNotAvailable(self.name().clone()));
                    }
                }
            }
        }
    }
}

impl PartialEq for ServiceController {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ServiceController {}

impl fmt::Debug for ServiceController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("ServiceController")
            .field("name", &self.inner.primary)
            .field("mode", &st.mode)
            .field("substate", &st.substate)
            .finish()
    }
}
