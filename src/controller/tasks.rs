//! Transition loop and task execution.
//!
//! A controller never calls out while holding its own lock. The transition
//! loop only *records* the work each transition needs as [`Task`]s; the
//! caller releases the lock and hands them to the executor. Each finished
//! task re-enters the loop, so the next transition is only evaluated once
//! every task of the previous batch has run.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use crate::dependency::Notification;
use crate::error::StartError;
use crate::mode::{LifecycleEvent, Mode, Substate, Transition};
use crate::observer::{ListenerCall, ServiceListener};
use crate::ServiceController;

use super::context::{StartContext, StopContext};
use super::state::ControllerState;
use super::ServiceControllerImpl;

pub(crate) enum Task {
    DemandDependencies,
    UndemandDependencies,
    DependentStarted,
    DependentStopped,
    Notify(Notification),
    Start,
    Stop,
    Uninject,
    RemoveChildren,
    Remove,
    Listener(Arc<dyn ServiceListener>, ListenerCall),
}

impl Task {
    fn label(&self) -> &'static str {
        match self {
            Task::DemandDependencies => "demand-dependencies",
            Task::UndemandDependencies => "undemand-dependencies",
            Task::DependentStarted => "dependent-started",
            Task::DependentStopped => "dependent-stopped",
            Task::Notify(_) => "notify",
            Task::Start => "start",
            Task::Stop => "stop",
            Task::Uninject => "uninject",
            Task::RemoveChildren => "remove-children",
            Task::Remove => "remove",
            Task::Listener(..) => "listener",
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Notify(n) => write!(f, "notify({:?})", n),
            Task::Listener(_, call) => write!(f, "listener({:?})", call),
            other => f.write_str(other.label()),
        }
    }
}

enum Outcome {
    Done,
    /// The task finishes through a completion callback
    Deferred,
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl ServiceControllerImpl {
    /// Runs `f` under the controller lock, then dispatches the tasks it
    /// produced and reports any stability flip.
    pub(super) fn locked<F>(&self, f: F)
    where
        F: FnOnce(&mut ControllerState, &mut Vec<Task>),
    {
        let mut tasks = Vec::new();
        {
            let mut st = self.state.lock();
            let was_stable = st.is_stable();
            f(&mut st, &mut tasks);
            st.async_tasks += tasks.len() as u32;
            self.update_stability(was_stable, st.is_stable());
            self.changed.notify_all();
        }
        self.dispatch(tasks);
    }

    /// Moves through as many transitions as possible without outstanding
    /// work.
    pub(super) fn transition(&self, st: &mut ControllerState, tasks: &mut Vec<Task>) {
        if st.async_tasks != 0 || st.substate == Substate::New {
            return;
        }
        loop {
            Self::sync_demand(st, tasks);
            let next = st.next_transition();
            if let Some(t) = next {
                self.apply_transition(st, t, tasks);
            }
            Self::sync_announced(st, tasks);
            if next.is_none() || !tasks.is_empty() {
                break;
            }
        }
    }

    fn sync_demand(st: &mut ControllerState, tasks: &mut Vec<Task>) {
        let wanted = st.wants_dependencies();
        if wanted == st.dependencies_demanded {
            return;
        }
        st.dependencies_demanded = wanted;
        tasks.push(if wanted {
            Task::DemandDependencies
        } else {
            Task::UndemandDependencies
        });
    }

    fn sync_announced(st: &mut ControllerState, tasks: &mut Vec<Task>) {
        let desired = st.desired_published();
        for notification in st.announced.diff(&desired) {
            tasks.push(Task::Notify(notification));
        }
        st.announced = desired;
    }

    pub(super) fn apply_transition(&self, st: &mut ControllerState, t: Transition, tasks: &mut Vec<Task>) {
        use Transition::*;
        tracing::debug!(service = %self.primary, from = %t.before(), to = %t.after(), "transition");
        let mut event = None;
        match t {
            StartRequestedToStartInitiating => tasks.push(Task::DependentStarted),
            StartInitiatingToStarting | StartFailedToStarting => tasks.push(Task::Start),
            StartInitiatingToStartRequested => tasks.push(Task::DependentStopped),
            StartingToUp => event = Some(LifecycleEvent::Up),
            StartingToStartFailed => {
                if let Some(err) = &st.start_error {
                    tracing::warn!(service = %self.primary, error = %err, "service failed to start");
                }
                if !st.children.is_empty() {
                    tasks.push(Task::RemoveChildren);
                }
                event = Some(LifecycleEvent::Failed);
            }
            StartFailedToDown => {
                st.start_error = None;
                tasks.push(Task::Uninject);
                tasks.push(Task::DependentStopped);
                event = Some(LifecycleEvent::Down);
            }
            StopRequestedToStopping => {
                tasks.push(Task::Stop);
                if !st.children.is_empty() {
                    tasks.push(Task::RemoveChildren);
                }
            }
            StoppingToDown => {
                tasks.push(Task::DependentStopped);
                event = Some(LifecycleEvent::Down);
            }
            RemovingToRemoved | CancelledToRemoved => {
                tasks.push(Task::Remove);
                event = Some(LifecycleEvent::Removed);
            }
            StartRequestedToProblem => {
                tracing::info!(
                    service = %self.primary,
                    unavailable = st.unavailable,
                    failed = st.failed,
                    "service is blocked by its dependencies"
                );
            }
            NewToDown | DownToRemoving | DownToWontStart | DownToStartRequested | DownToWaiting
            | WaitingToDown | WontStartToDown | StartRequestedToDown | ProblemToStartRequested
            | UpToStopRequested | StopRequestedToUp => {}
        }
        for listener in &st.listeners {
            tasks.push(Task::Listener(
                Arc::clone(listener),
                ListenerCall::Transition(t.before(), t.after()),
            ));
            if let Some(event) = event {
                tasks.push(Task::Listener(Arc::clone(listener), ListenerCall::Event(event)));
            }
        }
        if matches!(t, RemovingToRemoved | CancelledToRemoved) {
            st.listeners.clear();
        }
        st.substate = t.after();
    }

    pub(super) fn update_stability(&self, was_stable: bool, now_stable: bool) {
        if was_stable == now_stable {
            return;
        }
        let monitors = std::iter::once(&self.engine.monitor).chain(self.monitors.iter());
        for monitor in monitors {
            if now_stable {
                monitor.decrement_unstable();
            } else {
                monitor.increment_unstable();
            }
        }
    }

    pub(super) fn dispatch(&self, tasks: Vec<Task>) {
        if tasks.is_empty() {
            return;
        }
        let Some(this) = self.this.upgrade() else {
            tracing::error!(service = %self.primary, "controller dropped with pending tasks");
            return;
        };
        for task in tasks {
            let this = Arc::clone(&this);
            self.engine
                .executor
                .execute(Box::new(move || this.run_task(task)));
        }
    }

    fn run_task(self: Arc<Self>, task: Task) {
        tracing::trace!(service = %self.primary, task = ?task, "running task");
        match catch_unwind(AssertUnwindSafe(|| self.execute_task(&task))) {
            Ok(Outcome::Done) => self.finish_task(|_| {}),
            Ok(Outcome::Deferred) => {}
            Err(payload) => {
                let message = panic_message(&*payload);
                tracing::error!(service = %self.primary, task = ?task, panic = %message, "lifecycle task panicked");
                let start = matches!(task, Task::Start);
                let name = self.primary.clone();
                self.finish_task(move |st| {
                    if start && st.start_error.is_none() {
                        st.start_error = Some(StartError::new(message).for_service(&name));
                    }
                });
            }
        }
    }

    fn execute_task(self: &Arc<Self>, task: &Task) -> Outcome {
        match task {
            Task::DemandDependencies => {
                for link in &self.dependencies {
                    link.dependency.add_demand();
                }
            }
            Task::UndemandDependencies => {
                for link in &self.dependencies {
                    link.dependency.remove_demand();
                }
            }
            Task::DependentStarted => {
                for link in &self.dependencies {
                    link.dependency.dependent_started();
                }
            }
            Task::DependentStopped => {
                for link in &self.dependencies {
                    link.dependency.dependent_stopped();
                }
            }
            Task::Notify(notification) => {
                for registration in &self.registrations {
                    registration.publish(*notification);
                }
            }
            Task::Start => {
                self.run_start();
                return Outcome::Deferred;
            }
            Task::Stop => {
                self.run_stop();
                return Outcome::Deferred;
            }
            Task::Uninject => self.uninject(),
            Task::RemoveChildren => self.remove_children(),
            Task::Remove => self.remove(),
            Task::Listener(listener, call) => {
                let handle = ServiceController::new(Arc::clone(self));
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| call.invoke(listener, &handle))) {
                    tracing::error!(
                        service = %self.primary,
                        panic = %panic_message(&*payload),
                        "listener panicked"
                    );
                }
            }
        }
        Outcome::Done
    }

    /// Marks one task finished and re-evaluates transitions.
    pub(crate) fn finish_task<F>(&self, update: F)
    where
        F: FnOnce(&mut ControllerState),
    {
        self.locked(|st, tasks| {
            update(st);
            match st.async_tasks.checked_sub(1) {
                Some(n) => st.async_tasks = n,
                None => tracing::error!(service = %self.primary, "task count dropped below zero"),
            }
            self.transition(st, tasks);
        });
    }

    fn run_start(self: &Arc<Self>) {
        for link in &self.dependencies {
            link.inject();
        }
        let context = StartContext::new(Arc::clone(self));
        let result = match catch_unwind(AssertUnwindSafe(|| self.service.start(&context))) {
            Ok(result) => result,
            Err(payload) => Err(StartError::new(format!(
                "start panicked: {}",
                panic_message(&*payload)
            ))),
        };
        if let Some(result) = context.settle(result) {
            self.complete_start(result);
        }
    }

    /// Records the outcome of a start, synchronous or not.
    pub(crate) fn complete_start(&self, result: Result<(), StartError>) {
        let result = result.and_then(|()| self.check_provided());
        match &result {
            Ok(()) => self.inject_outbound(),
            Err(_) => self.uninject(),
        }
        let name = self.primary.clone();
        self.finish_task(move |st| {
            if let Err(err) = result {
                st.start_error = Some(err.for_service(&name));
            }
        });
    }

    fn check_provided(&self) -> Result<(), StartError> {
        match self.required_values.iter().find(|slot| !slot.is_set()) {
            None => Ok(()),
            Some(slot) => Err(StartError::new(format!(
                "value {} was not provided",
                slot.name().unwrap_or(&self.primary)
            ))),
        }
    }

    fn inject_outbound(&self) {
        if self.outbound.is_empty() {
            return;
        }
        let value = self.provided_value(&self.primary);
        for slot in &self.outbound {
            slot.inject(value.clone());
        }
    }

    fn run_stop(self: &Arc<Self>) {
        let context = StopContext::new(Arc::clone(self));
        let panicked = match catch_unwind(AssertUnwindSafe(|| self.service.stop(&context))) {
            Ok(()) => false,
            Err(payload) => {
                tracing::error!(
                    service = %self.primary,
                    panic = %panic_message(&*payload),
                    "stop panicked"
                );
                true
            }
        };
        if context.settle(panicked) {
            self.complete_stop();
        }
    }

    pub(crate) fn complete_stop(&self) {
        self.uninject();
        self.finish_task(|_| {});
    }

    fn uninject(&self) {
        for link in &self.dependencies {
            link.uninject();
        }
        for slot in self.values.values() {
            slot.clear();
        }
        for slot in &self.outbound {
            slot.clear();
        }
    }

    fn remove_children(&self) {
        let children: Vec<Arc<ServiceControllerImpl>> = self
            .state
            .lock()
            .children
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for child in children {
            if let Err(err) = child.change_mode(None, Mode::Remove) {
                tracing::debug!(service = %child.primary, error = %err, "child already removed");
            }
        }
    }

    fn remove(self: &Arc<Self>) {
        for link in &self.dependencies {
            link.dependency.remove_dependent(&self.as_dependent);
        }
        for registration in &self.registrations {
            registration.clear_controller(self);
        }
        if let Some(parent) = &self.parent {
            parent.remove_child(self);
        }
        if let Some(registry) = self.engine.registry.upgrade() {
            registry.release(self.id);
            let touched = self
                .registrations
                .iter()
                .chain(self.dependencies.iter().map(|l| l.dependency.registration()));
            for registration in touched {
                registry.prune(registration);
            }
        }
        tracing::debug!(service = %self.primary, "service removed");
    }
}
