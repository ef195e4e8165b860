use tracing::debug;

/// Lifecycle of one step during statement execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Created,
    /// Pre-tasks done: sub-inputs drained, task contexts built.
    Prepared,
    Running,
    Completed,
    Deactivated,
}

impl StepState {
    pub fn can_advance_to(self, to: StepState) -> bool {
        use StepState::*;
        matches!(
            (self, to),
            (Created, Prepared)
                | (Prepared, Running)
                | (Running, Completed)
                | (Completed, Deactivated)
        )
    }
}

/// Step states of one running statement.
pub struct DagState {
    states: Vec<StepState>,
}

impl DagState {
    pub fn new(step_count: usize) -> Self {
        Self { states: vec![StepState::Created; step_count] }
    }

    pub fn state(&self, step: usize) -> StepState {
        self.states[step]
    }

    /// Advances a step, asserting the transition is legal.
    pub fn advance(&mut self, step: usize, to: StepState) {
        let from = self.states[step];
        assert!(from.can_advance_to(to), "illegal step transition {from:?} -> {to:?}");
        debug!(step, ?from, ?to, "step state transition");
        self.states[step] = to;
    }

    pub fn all_completed(&self) -> bool {
        self.states.iter().all(|s| matches!(s, StepState::Completed | StepState::Deactivated))
    }

    /// Final pass releasing every step.
    pub fn deactivate_all(&mut self) {
        for s in &mut self.states {
            if *s == StepState::Completed {
                *s = StepState::Deactivated;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_order_is_enforced() {
        assert!(StepState::Created.can_advance_to(StepState::Prepared));
        assert!(StepState::Prepared.can_advance_to(StepState::Running));
        assert!(StepState::Running.can_advance_to(StepState::Completed));
        assert!(StepState::Completed.can_advance_to(StepState::Deactivated));
        assert!(!StepState::Created.can_advance_to(StepState::Running));
        assert!(!StepState::Completed.can_advance_to(StepState::Running));
    }

    #[test]
    fn dag_state_tracks_completion() {
        let mut dag = DagState::new(2);
        for step in 0..2 {
            dag.advance(step, StepState::Prepared);
            dag.advance(step, StepState::Running);
            dag.advance(step, StepState::Completed);
        }
        assert!(dag.all_completed());
        dag.deactivate_all();
        assert_eq!(dag.state(0), StepState::Deactivated);
    }
}
