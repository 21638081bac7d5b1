use super::types::{State, Task};
use crate::error::TaskError;

/// Direct successors of each state. Terminal states have none.
pub fn next_states(src: State) -> &'static [State] {
    match src {
        State::Pending => &[State::Scheduled],
        State::Scheduled => &[State::Running, State::Failed],
        State::Running => &[State::Completed, State::Failed],
        State::Completed | State::Failed => &[],
    }
}

pub fn valid_state_transition(src: State, dst: State) -> bool {
    next_states(src).contains(&dst)
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Completed | State::Failed)
    }
}

impl Task {
    /// Moves the task to `to`, refusing anything but a forward edge.
    pub fn transition(&mut self, to: State) -> Result<(), TaskError> {
        if !valid_state_transition(self.state, to) {
            return Err(TaskError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}
