//! Checkpoint policy: when the state machine persists the state.
//!
//! Decisions are taken at turn boundaries only, in this order:
//!   1. the run is finished (last turn done, or nothing alive): Final
//!   2. a suspend was requested: Suspend
//!   3. the per-invocation turn budget is spent: TurnBudget
//!   4. the turn is a multiple of the interval: Interval
//!
//! Only Interval lets the run continue. A finished run on an interval turn
//! gets exactly one checkpoint, written before the run completes.

use crate::{layout::RunInput, types::Turn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointTrigger {
    Interval,
    Final,
    Suspend,
    TurnBudget,
}

impl CheckpointTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interval   => "interval",
            Self::Final      => "final",
            Self::Suspend    => "suspend",
            Self::TurnBudget => "turn_budget",
        }
    }

    /// Whether the invocation stops after this checkpoint.
    pub fn ends_invocation(&self) -> bool {
        !matches!(self, Self::Interval)
    }
}

/// What the state machine knows at a turn boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    pub turn:              Turn,
    pub num_turns:         Turn,
    pub alive:             usize,
    /// Turns executed by this invocation so far.
    pub executed:          Turn,
    pub suspend_requested: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckpointPolicy {
    pub every:                    Option<Turn>,
    pub max_turns_per_invocation: Option<Turn>,
}

impl CheckpointPolicy {
    pub fn from_input(input: &RunInput) -> Self {
        Self { every: input.checkpoint_every(), max_turns_per_invocation: None }
    }

    /// Cap the turns one invocation may execute; `None` or 0 means no cap.
    pub fn with_turn_budget(mut self, max_turns: Option<Turn>) -> Self {
        self.max_turns_per_invocation = max_turns.filter(|&n| n > 0);
        self
    }

    pub fn decide(&self, b: &Boundary) -> Option<CheckpointTrigger> {
        if b.turn >= b.num_turns || b.alive == 0 {
            return Some(CheckpointTrigger::Final);
        }
        if b.suspend_requested {
            return Some(CheckpointTrigger::Suspend);
        }
        if b.executed == 0 {
            // Nothing new to persist at the start of an invocation.
            return None;
        }
        if self.max_turns_per_invocation.is_some_and(|max| b.executed >= max) {
            return Some(CheckpointTrigger::TurnBudget);
        }
        match self.every {
            Some(every) if b.turn.is_multiple_of(every) => Some(CheckpointTrigger::Interval),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boundary(turn: Turn) -> Boundary {
        Boundary { turn, num_turns: 100, alive: 5, executed: turn, suspend_requested: false }
    }

    fn interval(every: Turn) -> CheckpointPolicy {
        CheckpointPolicy { every: Some(every), max_turns_per_invocation: None }
    }

    #[test]
    fn hundred_turns_every_ten() {
        let policy = interval(10);
        let turns: Vec<Turn> = (1..=100)
            .filter(|&t| policy.decide(&boundary(t)).is_some())
            .collect();
        assert_eq!(turns, (1..=10).map(|k| k * 10).collect::<Vec<_>>());
        assert_eq!(policy.decide(&boundary(100)), Some(CheckpointTrigger::Final));
        assert_eq!(policy.decide(&boundary(90)), Some(CheckpointTrigger::Interval));
    }

    #[test]
    fn finished_beats_interval() {
        let b = Boundary { alive: 0, ..boundary(20) };
        assert_eq!(interval(10).decide(&b), Some(CheckpointTrigger::Final));
    }

    #[test]
    fn non_dividing_interval_still_checkpoints_final_turn() {
        let policy = interval(30);
        assert_eq!(policy.decide(&boundary(99)), None);
        assert_eq!(policy.decide(&boundary(100)), Some(CheckpointTrigger::Final));
    }

    #[test]
    fn suspend_then_budget() {
        let policy = interval(10).with_turn_budget(Some(7));
        assert_eq!(policy.decide(&boundary(7)), Some(CheckpointTrigger::TurnBudget));
        let b = Boundary { suspend_requested: true, ..boundary(7) };
        assert_eq!(policy.decide(&b), Some(CheckpointTrigger::Suspend));
        assert_eq!(policy.decide(&boundary(3)), None);
    }

    #[test]
    fn fresh_invocation_does_not_rewrite_its_checkpoint() {
        let b = Boundary { executed: 0, ..boundary(30) };
        assert_eq!(interval(10).decide(&b), None);
        let b = Boundary { suspend_requested: true, ..b };
        assert_eq!(interval(10).decide(&b), Some(CheckpointTrigger::Suspend));
    }

    #[test]
    fn zero_budget_means_unbounded() {
        assert_eq!(CheckpointPolicy::default().with_turn_budget(Some(0)).max_turns_per_invocation, None);
    }
}
