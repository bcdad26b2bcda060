//! Service modes, public states and the internal substate table.

use std::fmt;

#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};

/// Operating mode of a service controller.
///
/// The mode decides whether a service wants to run and whether it demands
/// its dependencies. It can be changed at any time; the controller observes
/// the change the next time it evaluates its transitions.
///
/// | Mode       | Demands dependencies      | Starts when                                   |
/// |------------|---------------------------|-----------------------------------------------|
/// | `Remove`   | never                     | never; the service is removed                 |
/// | `Never`    | never                     | never                                         |
/// | `OnDemand` | while demanded            | dependencies are up and it is demanded        |
/// | `Lazy`     | while demanded or up      | demanded once, then stays up                  |
/// | `Passive`  | while demanded            | dependencies are up, demanded or not          |
/// | `Active`   | always                    | dependencies are up                           |
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::Mode;
///
/// assert_eq!(Mode::default(), Mode::Active);
/// assert_eq!("on_demand".parse::<Mode>().unwrap(), Mode::OnDemand);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "snake_case"))]
pub enum Mode {
    /// Stop if running and remove the controller
    Remove,
    /// Never start
    Never,
    /// Start only while some dependent demands this service
    OnDemand,
    /// Start when first demanded, then stay up
    Lazy,
    /// Start whenever dependencies allow, without demanding them
    Passive,
    /// Always start and demand dependencies
    #[default]
    Active,
}

impl Mode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Mode::Remove => "remove",
            Mode::Never => "never",
            Mode::OnDemand => "on_demand",
            Mode::Lazy => "lazy",
            Mode::Passive => "passive",
            Mode::Active => "active",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "remove" => Ok(Mode::Remove),
            "never" => Ok(Mode::Never),
            "on_demand" | "ondemand" => Ok(Mode::OnDemand),
            "lazy" => Ok(Mode::Lazy),
            "passive" => Ok(Mode::Passive),
            "active" => Ok(Mode::Active),
            other => Err(format!("unknown service mode: {}", other)),
        }
    }
}

/// Coarse public lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Down,
    Starting,
    StartFailed,
    Up,
    Stopping,
    Removed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Down => "DOWN",
            State::Starting => "STARTING",
            State::StartFailed => "START_FAILED",
            State::Up => "UP",
            State::Stopping => "STOPPING",
            State::Removed => "REMOVED",
        };
        f.write_str(s)
    }
}

/// Fine-grained controller state.
///
/// Every substate maps to exactly one [`State`]. Rest substates are those a
/// controller can sit in indefinitely until some external signal arrives;
/// the others always have work outstanding or are re-evaluated at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Substate {
    New,
    Cancelled,
    Down,
    Waiting,
    WontStart,
    Problem,
    StartRequested,
    StartInitiating,
    Starting,
    StartFailed,
    Up,
    StopRequested,
    Stopping,
    Removing,
    Removed,
}

impl Substate {
    /// The public state this substate belongs to.
    pub fn state(self) -> State {
        match self {
            Substate::New
            | Substate::Cancelled
            | Substate::Down
            | Substate::Waiting
            | Substate::WontStart
            | Substate::Problem
            | Substate::StartRequested => State::Down,
            Substate::StartInitiating | Substate::Starting => State::Starting,
            Substate::StartFailed => State::StartFailed,
            Substate::Up | Substate::StopRequested => State::Up,
            Substate::Stopping => State::Stopping,
            Substate::Removing | Substate::Removed => State::Removed,
        }
    }

    /// True when no movement is possible without an external signal.
    pub fn is_rest(self) -> bool {
        matches!(
            self,
            Substate::New
                | Substate::Cancelled
                | Substate::Down
                | Substate::Waiting
                | Substate::WontStart
                | Substate::Problem
                | Substate::StartFailed
                | Substate::Up
                | Substate::Removed
        )
    }
}

impl fmt::Display for Substate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Classification of a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    /// The dependency must be up before the dependent starts
    Required,
    /// Blocks the dependent only while the dependent demands it
    Optional,
    /// The dependency must be down while the dependent runs
    Anti,
}

/// Coarse lifecycle events delivered to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Up,
    Down,
    Failed,
    Removed,
}

/// One step of the controller state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    NewToDown,
    CancelledToRemoved,
    DownToRemoving,
    DownToWontStart,
    DownToStartRequested,
    DownToWaiting,
    WaitingToDown,
    WontStartToDown,
    StartRequestedToProblem,
    StartRequestedToStartInitiating,
    StartRequestedToDown,
    ProblemToStartRequested,
    StartInitiatingToStarting,
    StartInitiatingToStartRequested,
    StartingToUp,
    StartingToStartFailed,
    StartFailedToStarting,
    StartFailedToDown,
    UpToStopRequested,
    StopRequestedToUp,
    StopRequestedToStopping,
    StoppingToDown,
    RemovingToRemoved,
}

impl Transition {
    pub(crate) fn before(self) -> Substate {
        use Transition::*;
        match self {
            NewToDown => Substate::New,
            CancelledToRemoved => Substate::Cancelled,
            DownToRemoving | DownToWontStart | DownToStartRequested | DownToWaiting => Substate::Down,
            WaitingToDown => Substate::Waiting,
            WontStartToDown => Substate::WontStart,
            StartRequestedToProblem | StartRequestedToStartInitiating | StartRequestedToDown => {
                Substate::StartRequested
            }
            ProblemToStartRequested => Substate::Problem,
            StartInitiatingToStarting | StartInitiatingToStartRequested => Substate::StartInitiating,
            StartingToUp | StartingToStartFailed => Substate::Starting,
            StartFailedToStarting | StartFailedToDown => Substate::StartFailed,
            UpToStopRequested => Substate::Up,
            StopRequestedToUp | StopRequestedToStopping => Substate::StopRequested,
            StoppingToDown => Substate::Stopping,
            RemovingToRemoved => Substate::Removing,
        }
    }

    pub(crate) fn after(self) -> Substate {
        use Transition::*;
        match self {
            NewToDown | WaitingToDown | WontStartToDown | StartRequestedToDown | StartFailedToDown
            | StoppingToDown => Substate::Down,
            CancelledToRemoved | RemovingToRemoved => Substate::Removed,
            DownToRemoving => Substate::Removing,
            DownToWontStart => Substate::WontStart,
            DownToStartRequested | ProblemToStartRequested | StartInitiatingToStartRequested => {
                Substate::StartRequested
            }
            DownToWaiting => Substate::Waiting,
            StartRequestedToProblem => Substate::Problem,
            StartRequestedToStartInitiating => Substate::StartInitiating,
            StartInitiatingToStarting | StartFailedToStarting => Substate::Starting,
            StartingToUp | StopRequestedToUp => Substate::Up,
            StartingToStartFailed => Substate::StartFailed,
            UpToStopRequested => Substate::StopRequested,
            StopRequestedToStopping => Substate::Stopping,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_move_between_distinct_substates() {
        use Transition::*;
        let all = [
            NewToDown, CancelledToRemoved, DownToRemoving, DownToWontStart, DownToStartRequested,
            DownToWaiting, WaitingToDown, WontStartToDown, StartRequestedToProblem,
            StartRequestedToStartInitiating, StartRequestedToDown, ProblemToStartRequested,
            StartInitiatingToStarting, StartInitiatingToStartRequested, StartingToUp,
            StartingToStartFailed, StartFailedToStarting, StartFailedToDown, UpToStopRequested,
            StopRequestedToUp, StopRequestedToStopping, StoppingToDown, RemovingToRemoved,
        ];
        for t in all {
            assert_ne!(t.before(), t.after(), "{:?}", t);
        }
    }

    #[test]
    fn test_transient_substates_are_not_rest() {
        for s in [
            Substate::StartRequested,
            Substate::StartInitiating,
            Substate::Starting,
            Substate::StopRequested,
            Substate::Stopping,
            Substate::Removing,
        ] {
            assert!(!s.is_rest(), "{:?}", s);
        }
        assert_eq!(Substate::StopRequested.state(), State::Up);
        assert_eq!(Substate::Problem.state(), State::Down);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("PASSIVE".parse::<Mode>().unwrap(), Mode::Passive);
        assert_eq!("on-demand".parse::<Mode>().unwrap(), Mode::OnDemand);
        assert!("sometimes".parse::<Mode>().is_err());
    }
}
