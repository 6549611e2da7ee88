//! Recursive goal progress roll-up.
//!
//! A goal's units are its direct tasks plus its direct subgoals. A completed
//! task contributes a whole unit, a subgoal contributes its own progress as a
//! fraction of a unit. Values are integer percentages so that cached and
//! recomputed progress agree exactly.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Longest parent chain followed before the hierarchy is treated as malformed.
pub const MAX_GOAL_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, Default)]
struct TaskCounts {
    total: u32,
    completed: u32,
}

/// Read-side index of one owner's goal tree: parent links, children lists,
/// and per-goal direct task counts.
#[derive(Debug, Clone, Default)]
pub struct ProgressIndex {
    parents: HashMap<String, Option<String>>,
    subgoals: HashMap<String, Vec<String>>,
    tasks: HashMap<String, TaskCounts>,
}

/// Unit accounting for a single goal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Units {
    pub total: u32,
    /// Completed units in hundredths (a subgoal at 40% adds 40).
    pub completed_hundredths: u64,
}

impl Units {
    pub fn progress(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let total = u64::from(self.total);
        // round-half-up of completed_hundredths / total
        let rounded = (2 * self.completed_hundredths + total) / (2 * total);
        rounded.min(100) as u8
    }

    pub fn remaining(&self) -> f64 {
        (f64::from(self.total) - self.completed_hundredths as f64 / 100.0).max(0.0)
    }
}

/// Result of re-aggregating one goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressChange {
    pub goal_id: String,
    pub previous: u8,
    pub progress: u8,
}

impl ProgressIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_goal(&mut self, goal_id: impl Into<String>, parent_goal_id: Option<String>) {
        let goal_id = goal_id.into();
        if let Some(ref parent) = parent_goal_id {
            self.subgoals
                .entry(parent.clone())
                .or_default()
                .push(goal_id.clone());
        }
        self.parents.insert(goal_id, parent_goal_id);
    }

    pub fn add_task(&mut self, goal_id: impl Into<String>, completed: bool) {
        let counts = self.tasks.entry(goal_id.into()).or_default();
        counts.total += 1;
        if completed {
            counts.completed += 1;
        }
    }

    pub fn contains(&self, goal_id: &str) -> bool {
        self.parents.contains_key(goal_id)
    }

    /// Progress of `goal_id`, evaluating subgoals leaves-first. `memo` may be
    /// shared across calls within one pass so each subtree is computed once.
    pub fn progress(&self, goal_id: &str, memo: &mut HashMap<String, u8>) -> u8 {
        self.units(goal_id, memo).progress()
    }

    pub fn units(&self, goal_id: &str, memo: &mut HashMap<String, u8>) -> Units {
        let counts = self.tasks.get(goal_id).copied().unwrap_or_default();
        let children = self.subgoals.get(goal_id).map(Vec::as_slice).unwrap_or(&[]);

        let mut completed_hundredths = u64::from(counts.completed) * 100;
        for child in children {
            completed_hundredths += u64::from(self.memoized(child, memo));
        }

        Units {
            total: counts.total + children.len() as u32,
            completed_hundredths,
        }
    }

    fn memoized(&self, goal_id: &str, memo: &mut HashMap<String, u8>) -> u8 {
        if let Some(&p) = memo.get(goal_id) {
            return p;
        }
        // Provisional entry terminates any malformed cycle.
        memo.insert(goal_id.to_string(), 0);
        let p = self.progress(goal_id, memo);
        memo.insert(goal_id.to_string(), p);
        p
    }

    /// Outstanding units: incomplete direct tasks plus unfinished subgoal fractions.
    pub fn remaining_units(&self, goal_id: &str) -> f64 {
        self.units(goal_id, &mut HashMap::new()).remaining()
    }

    /// `goal_id` followed by its ancestors up to the root.
    pub fn chain(&self, goal_id: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(goal_id.to_string());

        while let Some(id) = current {
            if !self.contains(&id) || !seen.insert(id.clone()) || chain.len() >= MAX_GOAL_DEPTH {
                break;
            }
            current = self.parents.get(&id).cloned().flatten();
            chain.push(id);
        }

        chain
    }
}
