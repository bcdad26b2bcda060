//! Optional dependency adapter.
//!
//! Sits between a dependent and the real registration. While the dependent
//! has not demanded the dependency (or is already running without it), the
//! adapter *absorbs* the real status and reports the dependency as up, so
//! the dependent is not held back. Once the real dependency is available and
//! the dependent is not running on the absorbed view, the adapter starts
//! *forwarding*: the dependent sees the real status and the adapter passes
//! demand and start/stop counts through.
//!
//! Downstream notifications are delivered as diffs between what the
//! dependent was last told and the current view, under the adapter lock.
//! Upstream calls go to the real registration outside that lock, serialized
//! by a second mutex; when a real-side notification changes what should be
//! forwarded, reconciliation runs as an executor task because the real
//! registration is still locked by the delivering thread.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::container::EngineContext;
use crate::dependency::{Dependency, Dependent, Notification, Published};
use crate::name::ServiceName;
use crate::registration::Registration;
use crate::stability::StabilityMonitor;
use crate::value::AnyArc;

struct OptionalState {
    dependent: Option<Arc<dyn Dependent>>,
    /// Status of the real dependency, as replayed and published
    real: Published,
    demanded: bool,
    dependent_started: bool,
    forwarding: bool,
    delivered: Published,
}

impl OptionalState {
    fn view(&self) -> Published {
        if self.forwarding {
            self.real
        } else {
            Published {
                available: self.real.available || !self.demanded,
                up: true,
                failed: false,
            }
        }
    }

    /// Re-evaluates forwarding; true when it flipped.
    fn update_forwarding(&mut self) -> bool {
        let next = if self.forwarding {
            self.real.available || self.demanded
        } else {
            self.real.available && !(self.demanded && self.dependent_started)
        };
        let flipped = next != self.forwarding;
        self.forwarding = next;
        flipped
    }

    fn upstream_target(&self) -> Upstream {
        Upstream {
            demand: self.forwarding && self.demanded,
            started: self.forwarding && self.dependent_started,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Upstream {
    demand: bool,
    started: bool,
}

pub(crate) struct OptionalDependency {
    real: Arc<Registration>,
    engine: Arc<EngineContext>,
    /// Extra monitors of the dependent, kept unstable while a reconcile is
    /// queued
    monitors: Vec<Arc<StabilityMonitor>>,
    this: Weak<OptionalDependency>,
    state: Mutex<OptionalState>,
    upstream: Mutex<Upstream>,
}

impl OptionalDependency {
    pub(crate) fn new(
        real: Arc<Registration>,
        engine: Arc<EngineContext>,
        monitors: Vec<Arc<StabilityMonitor>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            real,
            engine,
            monitors,
            this: this.clone(),
            state: Mutex::new(OptionalState {
                dependent: None,
                // the real registration replays any difference on attach
                real: Published::ASSUMED,
                demanded: false,
                dependent_started: false,
                forwarding: false,
                delivered: Published::ASSUMED,
            }),
            upstream: Mutex::new(Upstream::default()),
        })
    }

    /// Applies a change and delivers the resulting view diff.
    fn update<F>(&self, change: F) -> bool
    where
        F: FnOnce(&mut OptionalState),
    {
        let mut state = self.state.lock();
        change(&mut state);
        let flipped = state.update_forwarding();
        let view = state.view();
        if let Some(dependent) = state.dependent.clone() {
            for notification in state.delivered.diff(&view) {
                notification.deliver(dependent.as_ref(), self.real.name());
            }
            state.delivered = view;
        }
        flipped
    }

    /// Brings the upstream demand and started flags in line with the
    /// current forwarding state.
    fn reconcile(&self) {
        let mut upstream = self.upstream.lock();
        loop {
            let target = self.state.lock().upstream_target();
            if upstream.demand != target.demand {
                upstream.demand = target.demand;
                if target.demand {
                    self.real.add_demand_of(true);
                } else {
                    self.real.remove_demand_of(true);
                }
            } else if upstream.started != target.started {
                upstream.started = target.started;
                if target.started {
                    self.real.dependent_started();
                } else {
                    self.real.dependent_stopped();
                }
            } else {
                break;
            }
        }
    }

    fn on_real_change(&self, notification: Notification) {
        if !self.update(|s| {
            s.real.apply(notification);
        }) {
            return;
        }
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let monitors: Vec<Arc<StabilityMonitor>> = std::iter::once(&self.engine.monitor)
            .chain(self.monitors.iter())
            .cloned()
            .collect();
        for monitor in &monitors {
            monitor.increment_unstable();
        }
        self.engine.executor.execute(Box::new(move || {
            this.reconcile();
            for monitor in &monitors {
                monitor.decrement_unstable();
            }
        }));
    }

    fn on_dependent_change<F>(&self, change: F)
    where
        F: FnOnce(&mut OptionalState),
    {
        self.update(change);
        self.reconcile();
    }

    #[cfg(test)]
    fn is_forwarding(&self) -> bool {
        self.state.lock().forwarding
    }
}

impl Dependent for OptionalDependency {
    fn dependency_available(&self, _: &ServiceName) {
        self.on_real_change(Notification::Available);
    }

    fn dependency_unavailable(&self, _: &ServiceName) {
        self.on_real_change(Notification::Unavailable);
    }

    fn dependency_up(&self) {
        self.on_real_change(Notification::Up);
    }

    fn dependency_down(&self) {
        self.on_real_change(Notification::Down);
    }

    fn dependency_failed(&self) {
        self.on_real_change(Notification::Failed);
    }

    fn dependency_succeeded(&self) {
        self.on_real_change(Notification::Retrying);
    }
}

impl Dependency for OptionalDependency {
    fn name(&self) -> &ServiceName {
        self.real.name()
    }

    fn registration(&self) -> &Arc<Registration> {
        &self.real
    }

    fn add_dependent(&self, dependent: Arc<dyn Dependent>) {
        self.state.lock().dependent = Some(dependent);
        let Some(this) = self.this.upgrade() else {
            return;
        };
        self.real.add_dependent(this);
        // deliver the view even when the replay was empty
        self.update(|_| {});
        self.reconcile();
    }

    fn remove_dependent(&self, _dependent: &Arc<dyn Dependent>) {
        if let Some(this) = self.this.upgrade() {
            let this: Arc<dyn Dependent> = this;
            self.real.remove_dependent(&this);
        }
        self.state.lock().dependent = None;
    }

    fn add_demand(&self) {
        self.on_dependent_change(|s| s.demanded = true);
    }

    fn remove_demand(&self) {
        self.on_dependent_change(|s| s.demanded = false);
    }

    fn dependent_started(&self) {
        self.on_dependent_change(|s| s.dependent_started = true);
    }

    fn dependent_stopped(&self) {
        self.on_dependent_change(|s| s.dependent_started = false);
    }

    fn value(&self) -> Option<AnyArc> {
        let up = self.state.lock().real.up;
        if up {
            self.real.value()
        } else {
            None
        }
    }
}
