use std::fmt;

/// Errors at the broker boundary.
///
/// Normal conditions (unknown delivery target, empty mailbox) are not
/// errors; they are reported through return values and counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The name is reserved for addressing and cannot be registered.
    ReservedName(String),
    /// The name is empty or otherwise unusable as an agent identity.
    InvalidName(String),
    /// The named agent is not currently registered.
    UnknownAgent(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::ReservedName(name) => {
                write!(f, "'{}' is a reserved name and cannot be registered", name)
            }
            BrokerError::InvalidName(name) => {
                write!(f, "invalid agent name '{}'", name)
            }
            BrokerError::UnknownAgent(name) => {
                write!(f, "agent '{}' is not registered", name)
            }
        }
    }
}

impl std::error::Error for BrokerError {}
