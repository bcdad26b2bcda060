//! Counters and the transition table of a single controller.
//!
//! Everything here is pure: given the counters, mode and substate, the
//! functions decide what the controller wants next. Task emission lives in
//! the `tasks` module.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use crate::dependency::Published;
use crate::error::StartError;
use crate::mode::{Mode, Substate, Transition};
use crate::name::ServiceName;
use crate::observer::ServiceListener;

use super::ServiceControllerImpl;

pub(crate) struct ControllerState {
    pub(crate) mode: Mode,
    pub(crate) substate: Substate,
    /// Dependencies currently reported unavailable
    pub(crate) unavailable: u32,
    pub(crate) unavailable_names: BTreeMap<ServiceName, u32>,
    /// Dependencies currently reported failed
    pub(crate) failed: u32,
    /// Dependencies not currently reported up
    pub(crate) stopping: u32,
    /// Dependents demanding this service
    pub(crate) demanded_by: u32,
    /// Anti-dependents demanding this service stay down
    pub(crate) down_demanded_by: u32,
    /// Dependents that have started on top of this service
    pub(crate) running_dependents: u32,
    /// Tasks dispatched but not yet finished
    pub(crate) async_tasks: u32,
    pub(crate) dependencies_demanded: bool,
    pub(crate) announced: Published,
    pub(crate) start_error: Option<StartError>,
    pub(crate) children: Vec<Weak<ServiceControllerImpl>>,
    pub(crate) listeners: Vec<Arc<dyn ServiceListener>>,
}

impl ControllerState {
    /// Fresh state for a controller with `dependencies` declared edges.
    ///
    /// Every dependency starts out counted as not up; the attach replay
    /// reports the ones that are.
    pub(crate) fn new(dependencies: usize, listeners: Vec<Arc<dyn ServiceListener>>) -> Self {
        Self {
            mode: Mode::Never,
            substate: Substate::New,
            unavailable: 0,
            unavailable_names: BTreeMap::new(),
            failed: 0,
            stopping: dependencies as u32,
            demanded_by: 0,
            down_demanded_by: 0,
            running_dependents: 0,
            async_tasks: 0,
            dependencies_demanded: false,
            announced: Published::ABSENT,
            start_error: None,
            children: Vec::new(),
            listeners,
        }
    }

    pub(crate) fn blocked(&self) -> bool {
        self.unavailable > 0 || self.failed > 0
    }

    pub(crate) fn should_start(&self) -> bool {
        match self.mode {
            Mode::Active => true,
            Mode::Passive => !(self.down_demanded_by > 0 && self.demanded_by == 0),
            Mode::OnDemand | Mode::Lazy => self.demanded_by > 0,
            Mode::Never | Mode::Remove => false,
        }
    }

    pub(crate) fn should_stop(&self) -> bool {
        match self.mode {
            Mode::Remove | Mode::Never => true,
            Mode::OnDemand => self.demanded_by == 0,
            Mode::Lazy | Mode::Passive => self.demanded_by == 0 && self.down_demanded_by > 0,
            Mode::Active => false,
        }
    }

    /// A passive service only starts once every dependency is already up.
    fn start_plausible(&self) -> bool {
        self.should_start() && !(self.mode == Mode::Passive && self.stopping > 0)
    }

    /// Whether this controller should be demanding its dependencies.
    pub(crate) fn wants_dependencies(&self) -> bool {
        match self.mode {
            Mode::Never | Mode::Remove => false,
            Mode::Active => true,
            Mode::Lazy if self.substate == Substate::Up => true,
            Mode::Lazy | Mode::OnDemand | Mode::Passive => self.demanded_by > 0,
        }
    }

    /// Whether a demand edge can change the transition outcome.
    pub(crate) fn demand_sensitive(&self) -> bool {
        matches!(self.mode, Mode::OnDemand | Mode::Lazy | Mode::Passive)
    }

    pub(crate) fn is_stable(&self) -> bool {
        self.async_tasks == 0 && self.substate.is_rest()
    }

    /// The next step, or `None` when the controller is at rest.
    pub(crate) fn next_transition(&self) -> Option<Transition> {
        use Transition::*;
        match self.substate {
            Substate::New | Substate::Removed => None,
            Substate::Cancelled => Some(CancelledToRemoved),
            Substate::Down => Some(match self.mode {
                Mode::Remove => DownToRemoving,
                Mode::Never => DownToWontStart,
                _ if self.start_plausible() => DownToStartRequested,
                _ => DownToWaiting,
            }),
            Substate::Waiting => {
                let leave = matches!(self.mode, Mode::Remove | Mode::Never) || self.start_plausible();
                leave.then_some(WaitingToDown)
            }
            Substate::WontStart => (self.mode != Mode::Never).then_some(WontStartToDown),
            Substate::StartRequested => {
                if !self.start_plausible() {
                    Some(StartRequestedToDown)
                } else if self.blocked() {
                    Some(StartRequestedToProblem)
                } else if self.stopping == 0 && self.running_dependents == 0 {
                    Some(StartRequestedToStartInitiating)
                } else {
                    None
                }
            }
            Substate::Problem => {
                (!self.should_start() || !self.blocked()).then_some(ProblemToStartRequested)
            }
            Substate::StartInitiating => {
                let clear = self.should_start()
                    && self.running_dependents == 0
                    && self.stopping == 0
                    && !self.blocked();
                Some(if clear {
                    StartInitiatingToStarting
                } else {
                    StartInitiatingToStartRequested
                })
            }
            Substate::Starting => Some(if self.start_error.is_none() {
                StartingToUp
            } else {
                StartingToStartFailed
            }),
            Substate::StartFailed => {
                if !self.children.is_empty() {
                    None
                } else if !self.should_start() || self.stopping > 0 {
                    (self.running_dependents == 0).then_some(StartFailedToDown)
                } else if self.start_error.is_none() {
                    Some(StartFailedToStarting)
                } else {
                    None
                }
            }
            Substate::Up => (self.should_stop() || self.stopping > 0).then_some(UpToStopRequested),
            Substate::StopRequested => {
                if self.should_start() && self.stopping == 0 {
                    Some(StopRequestedToUp)
                } else if self.running_dependents == 0 {
                    Some(StopRequestedToStopping)
                } else {
                    None
                }
            }
            Substate::Stopping => self.children.is_empty().then_some(StoppingToDown),
            Substate::Removing => Some(RemovingToRemoved),
        }
    }

    /// Status this controller should be announcing to its dependents.
    pub(crate) fn desired_published(&self) -> Published {
        match self.substate {
            Substate::New
            | Substate::Cancelled
            | Substate::WontStart
            | Substate::Removing
            | Substate::Removed => Published::ABSENT,
            Substate::Down | Substate::Waiting | Substate::StartRequested | Substate::Problem => Published {
                available: !self.blocked(),
                up: false,
                failed: false,
            },
            Substate::Up => Published {
                available: true,
                up: true,
                failed: false,
            },
            Substate::StartFailed => Published {
                available: true,
                up: false,
                failed: true,
            },
            Substate::StartInitiating
            | Substate::Starting
            | Substate::StopRequested
            | Substate::Stopping => Published {
                available: true,
                up: false,
                failed: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn state(mode: Mode, substate: Substate) -> ControllerState {
        let mut st = ControllerState::new(0, Vec::new());
        st.mode = mode;
        st.substate = substate;
        st
    }

    #[test]
    fn test_down_routes_by_mode() {
        assert_eq!(
            state(Mode::Remove, Substate::Down).next_transition(),
            Some(Transition::DownToRemoving)
        );
        assert_eq!(
            state(Mode::Never, Substate::Down).next_transition(),
            Some(Transition::DownToWontStart)
        );
        assert_eq!(
            state(Mode::Active, Substate::Down).next_transition(),
            Some(Transition::DownToStartRequested)
        );
        assert_eq!(
            state(Mode::OnDemand, Substate::Down).next_transition(),
            Some(Transition::DownToWaiting)
        );
        let mut passive = state(Mode::Passive, Substate::Down);
        passive.stopping = 1;
        assert_eq!(passive.next_transition(), Some(Transition::DownToWaiting));
    }

    #[test]
    fn test_blocked_start_request_becomes_problem() {
        let mut st = state(Mode::Active, Substate::StartRequested);
        st.unavailable = 1;
        st.stopping = 1;
        assert_eq!(st.next_transition(), Some(Transition::StartRequestedToProblem));
        st.substate = Substate::Problem;
        assert_eq!(st.next_transition(), None);
        assert!(!st.desired_published().available);
        st.unavailable = 0;
        assert_eq!(st.next_transition(), Some(Transition::ProblemToStartRequested));
    }

    #[test]
    fn test_down_demand_stops_lazy_but_not_active() {
        let mut lazy = state(Mode::Lazy, Substate::Up);
        lazy.down_demanded_by = 1;
        assert!(lazy.should_stop());
        let mut active = state(Mode::Active, Substate::Up);
        active.down_demanded_by = 1;
        assert!(!active.should_stop());
        let mut passive = state(Mode::Passive, Substate::Down);
        passive.down_demanded_by = 1;
        assert!(!passive.should_start());
        passive.demanded_by = 1;
        assert!(passive.should_start());
    }

    #[test]
    fn test_failed_start_waits_for_children() {
        let mut st = state(Mode::Active, Substate::StartFailed);
        st.start_error = Some(StartError::new("boom"));
        assert_eq!(st.next_transition(), None);
        st.start_error = None;
        assert_eq!(st.next_transition(), Some(Transition::StartFailedToStarting));
        st.mode = Mode::Never;
        assert_eq!(st.next_transition(), Some(Transition::StartFailedToDown));
    }

    fn any_mode() -> impl Strategy<Value = Mode> {
        prop_oneof![
            Just(Mode::Remove),
            Just(Mode::Never),
            Just(Mode::OnDemand),
            Just(Mode::Lazy),
            Just(Mode::Passive),
            Just(Mode::Active),
        ]
    }

    fn any_substate() -> impl Strategy<Value = Substate> {
        prop_oneof![
            Just(Substate::Down),
            Just(Substate::Waiting),
            Just(Substate::WontStart),
            Just(Substate::Problem),
            Just(Substate::StartRequested),
            Just(Substate::Up),
            Just(Substate::StopRequested),
        ]
    }

    proptest! {
        // Without tasks in between, transitions that emit nothing must
        // reach a fixed point instead of cycling.
        #[test]
        fn prop_silent_transitions_terminate(
            mode in any_mode(),
            substate in any_substate(),
            unavailable in 0u32..2,
            failed in 0u32..2,
            stopping in 0u32..3,
            demanded in 0u32..2,
            down in 0u32..2,
            running in 0u32..2,
        ) {
            let mut st = state(mode, substate);
            st.unavailable = unavailable;
            st.failed = failed;
            st.stopping = stopping.max(unavailable).max(failed);
            st.demanded_by = demanded;
            st.down_demanded_by = down;
            st.running_dependents = running;

            let silent = |t: Transition| matches!(
                t,
                Transition::DownToWaiting
                    | Transition::WaitingToDown
                    | Transition::DownToWontStart
                    | Transition::WontStartToDown
                    | Transition::DownToStartRequested
                    | Transition::StartRequestedToDown
                    | Transition::StartRequestedToProblem
                    | Transition::ProblemToStartRequested
                    | Transition::UpToStopRequested
                    | Transition::StopRequestedToUp
            );
            let mut steps = 0;
            while let Some(t) = st.next_transition() {
                if !silent(t) {
                    break;
                }
                st.substate = t.after();
                steps += 1;
                prop_assert!(steps < 8, "cycle from {:?} in {:?}", substate, mode);
            }
        }
    }
}
