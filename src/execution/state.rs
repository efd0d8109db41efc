//! Supervisor lifecycle state machine.

use std::fmt;

/// Lifecycle phase of a supervised command, observable through
/// [`Outcome::phase`](super::Outcome::phase).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Configured but no process spawned yet.
    #[default]
    Created,
    /// The process is running and being raced against its signals.
    Running,
    /// A cancel or deadline won and the process is being killed.
    Stopping,
    /// The outcome is ready. No further transitions.
    Finished,
}

impl Phase {
    /// Check if transition to target phase is valid.
    ///
    /// Valid transitions:
    /// - Created -> Running
    /// - Created -> Finished (spawn failed)
    /// - Running -> Stopping
    /// - Running -> Finished
    /// - Stopping -> Finished
    pub fn can_transition_to(&self, target: Phase) -> bool {
        use Phase::*;
        matches!(
            (*self, target),
            (Created, Running)
                | (Created, Finished)
                | (Running, Stopping)
                | (Running, Finished)
                | (Stopping, Finished)
        )
    }

    /// Attempt to transition to a new phase.
    ///
    /// Returns the rejected transition if it is not allowed, leaving the
    /// phase unchanged.
    pub fn transition_to(&mut self, target: Phase) -> Result<(), InvalidTransition> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(InvalidTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// Check if this is a terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Finished)
    }
}

/// A rejected phase transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: Phase,
    pub to: Phase,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid phase transition from {:?} to {:?}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}
