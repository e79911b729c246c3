use serde::Serialize;
use std::fmt;

/// Agent lifecycle state.
///
/// Transitions are validated in one place ([`AgentStatus::transition`])
/// rather than scattered across lifecycle methods:
///
/// ```text
/// STARTING -> RUNNING
/// RUNNING <-> PAUSED
/// RUNNING -> ERROR -> STOPPED (or ERROR -> RUNNING via error reset)
/// STARTING | RUNNING | PAUSED -> STOPPED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Starting,
    Running,
    Paused,
    Error,
    Stopped,
}

impl AgentStatus {
    /// Validates and performs a state transition.
    pub fn transition(self, next: AgentStatus) -> Result<AgentStatus, InvalidTransition> {
        use AgentStatus::*;

        let legal = matches!(
            (self, next),
            (Starting, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Error)
                | (Error, Running) // administrative recovery
                | (Starting, Stopped)
                | (Running, Stopped)
                | (Paused, Stopped)
                | (Error, Stopped)
        );

        if legal {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }

    pub fn is_terminal(self) -> bool {
        self == AgentStatus::Stopped
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AgentStatus::Starting => "starting",
            AgentStatus::Running => "running",
            AgentStatus::Paused => "paused",
            AgentStatus::Error => "error",
            AgentStatus::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Rejected lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: AgentStatus,
    pub to: AgentStatus,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal agent transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::AgentStatus::*;
    use super::*;

    #[test]
    fn legal_lifecycle_path() {
        let status = Starting.transition(Running).unwrap();
        let status = status.transition(Paused).unwrap();
        let status = status.transition(Running).unwrap();
        let status = status.transition(Error).unwrap();
        let status = status.transition(Stopped).unwrap();
        assert!(status.is_terminal());
    }

    #[test]
    fn error_recovery_returns_to_running() {
        assert_eq!(Error.transition(Running).unwrap(), Running);
    }

    #[test]
    fn stop_is_reachable_from_every_live_state() {
        for from in [Starting, Running, Paused, Error] {
            assert_eq!(from.transition(Stopped).unwrap(), Stopped);
        }
    }

    #[test]
    fn illegal_transitions_rejected() {
        assert!(Stopped.transition(Running).is_err());
        assert!(Stopped.transition(Starting).is_err());
        assert!(Starting.transition(Paused).is_err());
        assert!(Paused.transition(Error).is_err());
        assert!(Starting.transition(Error).is_err());
        assert!(Running.transition(Starting).is_err());

        let err = Stopped.transition(Running).unwrap_err();
        assert_eq!(err.from, Stopped);
        assert_eq!(err.to, Running);
    }
}
