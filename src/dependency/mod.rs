//! Dependency edges between controllers and registrations.
//!
//! Notifications flow in two directions along every edge:
//!
//! - *downstream* ([`Dependent`]): availability, up/down and failure status
//!   of a dependency, delivered to whoever depends on it;
//! - *upstream* ([`Dependency`]): demand and running-dependent counts,
//!   delivered by a dependent to what it depends on.
//!
//! A plain required edge connects a controller directly to a
//! [`Registration`]. Optional and anti edges put an adapter in between that
//! rewrites what each side observes.

use std::fmt;
use std::sync::Arc;

use crate::mode::DependencyKind;
use crate::name::ServiceName;
use crate::registration::Registration;
use crate::value::{AnyArc, ValueSlot};

mod anti;
mod optional;

pub(crate) use anti::AntiDependency;
pub(crate) use optional::OptionalDependency;

/// Receiver of dependency status notifications.
///
/// A dependent initially assumes each dependency is available, not up and
/// not failed; every call moves exactly one of those flags.
pub(crate) trait Dependent: Send + Sync {
    fn dependency_available(&self, name: &ServiceName);
    fn dependency_unavailable(&self, name: &ServiceName);
    fn dependency_up(&self);
    fn dependency_down(&self);
    fn dependency_failed(&self);
    fn dependency_succeeded(&self);
}

/// Upstream side of an edge, as seen by the dependent.
pub(crate) trait Dependency: Send + Sync {
    fn name(&self) -> &ServiceName;
    fn registration(&self) -> &Arc<Registration>;
    /// Attaches the dependent and synchronously replays current status to it.
    fn add_dependent(&self, dependent: Arc<dyn Dependent>);
    fn remove_dependent(&self, dependent: &Arc<dyn Dependent>);
    fn add_demand(&self);
    fn remove_demand(&self);
    fn dependent_started(&self);
    fn dependent_stopped(&self);
    fn value(&self) -> Option<AnyArc>;
}

/// One status flip announced to dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Notification {
    Available,
    Unavailable,
    Up,
    Down,
    Failed,
    Retrying,
}

impl Notification {
    pub(crate) fn deliver(self, dependent: &dyn Dependent, name: &ServiceName) {
        match self {
            Notification::Available => dependent.dependency_available(name),
            Notification::Unavailable => dependent.dependency_unavailable(name),
            Notification::Up => dependent.dependency_up(),
            Notification::Down => dependent.dependency_down(),
            Notification::Failed => dependent.dependency_failed(),
            Notification::Retrying => dependent.dependency_succeeded(),
        }
    }
}

/// Status a dependency has announced to its dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Published {
    pub(crate) available: bool,
    pub(crate) up: bool,
    pub(crate) failed: bool,
}

impl Published {
    /// What a freshly attached dependent assumes.
    pub(crate) const ASSUMED: Published = Published {
        available: true,
        up: false,
        failed: false,
    };

    /// Nothing installed behind the name.
    pub(crate) const ABSENT: Published = Published {
        available: false,
        up: false,
        failed: false,
    };

    /// Applies one notification; false when it would not change anything.
    pub(crate) fn apply(&mut self, notification: Notification) -> bool {
        let (flag, value) = match notification {
            Notification::Available => (&mut self.available, true),
            Notification::Unavailable => (&mut self.available, false),
            Notification::Up => (&mut self.up, true),
            Notification::Down => (&mut self.up, false),
            Notification::Failed => (&mut self.failed, true),
            Notification::Retrying => (&mut self.failed, false),
        };
        if *flag == value {
            return false;
        }
        *flag = value;
        true
    }

    /// Notifications that move `self` to `target`.
    pub(crate) fn diff(&self, target: &Published) -> Vec<Notification> {
        let mut out = Vec::new();
        if self.available != target.available {
            out.push(if target.available {
                Notification::Available
            } else {
                Notification::Unavailable
            });
        }
        if self.failed != target.failed {
            out.push(if target.failed {
                Notification::Failed
            } else {
                Notification::Retrying
            });
        }
        if self.up != target.up {
            out.push(if target.up { Notification::Up } else { Notification::Down });
        }
        out
    }
}

/// A declared dependency of a controller.
pub(crate) struct DependencyLink {
    pub(crate) kind: DependencyKind,
    pub(crate) dependency: Arc<dyn Dependency>,
    /// Slots that receive the dependency's value before each start.
    pub(crate) injections: Vec<Arc<ValueSlot>>,
}

impl DependencyLink {
    pub(crate) fn name(&self) -> &ServiceName {
        self.dependency.name()
    }

    pub(crate) fn inject(&self) {
        if self.injections.is_empty() {
            return;
        }
        let value = self.dependency.value();
        for slot in &self.injections {
            slot.inject(value.clone());
        }
    }

    pub(crate) fn uninject(&self) {
        for slot in &self.injections {
            slot.clear();
        }
    }
}

impl fmt::Debug for DependencyLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyLink")
            .field("name", self.name())
            .field("kind", &self.kind)
            .field("injections", &self.injections.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Dependent that records every notification it receives.
    #[derive(Default)]
    pub(crate) struct RecordingDependent {
        pub(crate) events: Mutex<Vec<Notification>>,
    }

    impl RecordingDependent {
        pub(crate) fn count(&self, n: Notification) -> usize {
            self.events.lock().iter().filter(|e| **e == n).count()
        }

        /// Status as seen through the received notifications.
        pub(crate) fn view(&self) -> Published {
            let mut view = Published::ASSUMED;
            for n in self.events.lock().iter() {
                view.apply(*n);
            }
            view
        }
    }

    impl Dependent for RecordingDependent {
        fn dependency_available(&self, _: &ServiceName) {
            self.events.lock().push(Notification::Available);
        }
        fn dependency_unavailable(&self, _: &ServiceName) {
            self.events.lock().push(Notification::Unavailable);
        }
        fn dependency_up(&self) {
            self.events.lock().push(Notification::Up);
        }
        fn dependency_down(&self) {
            self.events.lock().push(Notification::Down);
        }
        fn dependency_failed(&self) {
            self.events.lock().push(Notification::Failed);
        }
        fn dependency_succeeded(&self) {
            self.events.lock().push(Notification::Retrying);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_reaches_target() {
        let from = Published::ASSUMED;
        let to = Published {
            available: false,
            up: true,
            failed: true,
        };
        let mut cur = from;
        for n in from.diff(&to) {
            assert!(cur.apply(n));
        }
        assert_eq!(cur, to);
        assert!(to.diff(&to).is_empty());
    }

    #[test]
    fn test_apply_ignores_repeats() {
        let mut p = Published::ABSENT;
        assert!(!p.apply(Notification::Unavailable));
        assert!(p.apply(Notification::Available));
        assert!(!p.apply(Notification::Available));
    }
}
