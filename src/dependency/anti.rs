//! Anti-dependency adapter: the dependent may only run while the target is
//! not up.
//!
//! The dependent sees the inverse of the target: an up target reads as
//! unavailable and down, anything else reads as available and up. Demand
//! from the dependent becomes *down* demand on the target registration,
//! which keeps a passive or lazy target from starting.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::dependency::{Dependency, Dependent, Published};
use crate::name::ServiceName;
use crate::registration::Registration;
use crate::value::AnyArc;

struct AntiState {
    dependent: Option<Arc<dyn Dependent>>,
    target_up: bool,
    delivered: Published,
}

impl AntiState {
    fn view(&self) -> Published {
        Published {
            available: !self.target_up,
            up: !self.target_up,
            failed: false,
        }
    }
}

pub(crate) struct AntiDependency {
    target: Arc<Registration>,
    this: Weak<AntiDependency>,
    state: Mutex<AntiState>,
}

impl AntiDependency {
    pub(crate) fn new(target: Arc<Registration>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            target,
            this: this.clone(),
            state: Mutex::new(AntiState {
                dependent: None,
                target_up: false,
                delivered: Published::ASSUMED,
            }),
        })
    }

    fn set_target_up(&self, up: Option<bool>) {
        let mut state = self.state.lock();
        if let Some(up) = up {
            state.target_up = up;
        }
        let view = state.view();
        if let Some(dependent) = state.dependent.clone() {
            for notification in state.delivered.diff(&view) {
                notification.deliver(dependent.as_ref(), self.target.name());
            }
            state.delivered = view;
        }
    }
}

impl Dependent for AntiDependency {
    fn dependency_available(&self, _: &ServiceName) {}

    fn dependency_unavailable(&self, _: &ServiceName) {}

    fn dependency_up(&self) {
        self.set_target_up(Some(true));
    }

    fn dependency_down(&self) {
        self.set_target_up(Some(false));
    }

    fn dependency_failed(&self) {}

    fn dependency_succeeded(&self) {}
}

impl Dependency for AntiDependency {
    fn name(&self) -> &ServiceName {
        self.target.name()
    }

    fn registration(&self) -> &Arc<Registration> {
        &self.target
    }

    fn add_dependent(&self, dependent: Arc<dyn Dependent>) {
        self.state.lock().dependent = Some(dependent);
        if let Some(this) = self.this.upgrade() {
            self.target.add_dependent(this);
        }
        self.set_target_up(None);
    }

    fn remove_dependent(&self, _dependent: &Arc<dyn Dependent>) {
        if let Some(this) = self.this.upgrade() {
            let this: Arc<dyn Dependent> = this;
            self.target.remove_dependent(&this);
        }
        self.state.lock().dependent = None;
    }

    fn add_demand(&self) {
        self.target.add_demand_of(false);
    }

    fn remove_demand(&self) {
        self.target.remove_demand_of(false);
    }

    fn dependent_started(&self) {}

    fn dependent_stopped(&self) {}

    fn value(&self) -> Option<AnyArc> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::testing::RecordingDependent;
    use crate::dependency::Notification;

    #[test]
    fn test_view_is_inverted() {
        let target = Registration::new(ServiceName::parse("svc.exclusive").unwrap());
        let anti = AntiDependency::new(Arc::clone(&target));
        let dependent = Arc::new(RecordingDependent::default());
        anti.add_dependent(dependent.clone());
        assert!(dependent.view().up);
        assert!(dependent.view().available);

        target.publish(Notification::Available);
        target.publish(Notification::Up);
        assert!(!dependent.view().up);
        assert!(!dependent.view().available);

        target.publish(Notification::Down);
        assert!(dependent.view().up);
        assert_eq!(dependent.count(Notification::Down), 1);
    }

    #[test]
    fn test_demand_becomes_down_demand() {
        let target = Registration::new(ServiceName::parse("svc.exclusive").unwrap());
        let anti = AntiDependency::new(Arc::clone(&target));
        anti.add_demand();
        anti.dependent_started();
        assert_eq!(target.demand(), (0, 1));
        anti.remove_demand();
        anti.dependent_stopped();
        assert_eq!(target.demand(), (0, 0));
    }
}
