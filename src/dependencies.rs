//! Task dependency validation and the completion gate.
//!
//! Edges point from a task to the tasks it depends on. Every edit that sets a
//! task's dependencies is checked here before it is written: referenced ids
//! must exist in the owner's task set, and the edited graph must stay acyclic.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{PlanError, PlanResult};
use crate::types::TaskStatus;

/// An owner's task dependency graph plus each task's status.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: HashMap<String, BTreeSet<String>>,
    status: HashMap<String, TaskStatus>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task_id: impl Into<String>, status: TaskStatus, deps: BTreeSet<String>) {
        let task_id = task_id.into();
        self.status.insert(task_id.clone(), status);
        self.edges.insert(task_id, deps);
    }

    /// Record an edge for a task already inserted.
    pub fn add_edge(&mut self, task_id: &str, depends_on: impl Into<String>) {
        self.edges
            .entry(task_id.to_string())
            .or_default()
            .insert(depends_on.into());
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.status.contains_key(task_id)
    }

    pub fn dependencies_of(&self, task_id: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(task_id)
    }

    pub fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        self.status.get(task_id).copied()
    }
}

/// Check a proposed dependency set for `task_id` against the owner's graph.
///
/// `task_id` may be absent from the graph (a task being created). Unknown ids
/// are rejected before any cycle search.
pub fn validate_dependencies(
    task_id: &str,
    proposed: &BTreeSet<String>,
    graph: &DependencyGraph,
) -> PlanResult<()> {
    if proposed.contains(task_id) {
        return Err(PlanError::DependencyCycle {
            task_id: task_id.to_string(),
            cycle: vec![task_id.to_string(), task_id.to_string()],
        });
    }

    let missing: Vec<String> = proposed
        .iter()
        .filter(|id| !graph.contains(id))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(PlanError::DependencyNotFound {
            task_id: task_id.to_string(),
            missing,
        });
    }

    if let Some(cycle) = find_path_back(task_id, proposed, graph) {
        return Err(PlanError::DependencyCycle {
            task_id: task_id.to_string(),
            cycle,
        });
    }

    Ok(())
}

/// Depth-first search from `task_id` over the edited graph for a path back to
/// `task_id`. Returns the cycle as `[task_id, .., task_id]`.
fn find_path_back<'a>(
    task_id: &'a str,
    proposed: &'a BTreeSet<String>,
    graph: &'a DependencyGraph,
) -> Option<Vec<String>> {
    let mut parent: HashMap<&'a str, &'a str> = HashMap::new();
    let mut seen: HashSet<&'a str> = HashSet::new();
    let mut stack: Vec<&'a str> = Vec::new();

    for dep in proposed {
        if seen.insert(dep.as_str()) {
            parent.insert(dep.as_str(), task_id);
            stack.push(dep.as_str());
        }
    }

    while let Some(node) = stack.pop() {
        if node == task_id {
            let mut path = vec![task_id.to_string()];
            let mut cur = parent[task_id];
            while cur != task_id {
                path.push(cur.to_string());
                cur = parent[cur];
            }
            path.push(task_id.to_string());
            path.reverse();
            return Some(path);
        }

        let Some(next) = graph.dependencies_of(node) else {
            continue;
        };
        for dep in next {
            if seen.insert(dep.as_str()) {
                parent.insert(dep.as_str(), node);
                stack.push(dep.as_str());
            }
        }
    }

    None
}

/// Dependencies of `task_id` that are not completed, sorted.
pub fn unsatisfied_dependencies(task_id: &str, graph: &DependencyGraph) -> Vec<String> {
    graph
        .dependencies_of(task_id)
        .map(|deps| {
            deps.iter()
                .filter(|dep| graph.status_of(dep) != Some(TaskStatus::Completed))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// Completion gate: a task may complete only once all its dependencies have.
pub fn can_complete(task_id: &str, graph: &DependencyGraph) -> PlanResult<()> {
    let blockers = unsatisfied_dependencies(task_id, graph);
    if blockers.is_empty() {
        Ok(())
    } else {
        Err(PlanError::DependencyNotSatisfied {
            task_id: task_id.to_string(),
            blockers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn graph(tasks: &[(&str, TaskStatus, &[&str])]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for (id, status, deps) in tasks {
            g.insert(*id, *status, set(deps));
        }
        g
    }

    #[test]
    fn accepts_acyclic_edit() {
        let g = graph(&[
            ("a", TaskStatus::Pending, &["b"]),
            ("b", TaskStatus::Pending, &[]),
            ("c", TaskStatus::Pending, &[]),
        ]);
        assert!(validate_dependencies("c", &set(&["a", "b"]), &g).is_ok());
    }

    #[test]
    fn rejects_two_node_cycle() {
        let g = graph(&[("a", TaskStatus::Pending, &["b"]), ("b", TaskStatus::Pending, &[])]);
        let err = validate_dependencies("b", &set(&["a"]), &g).unwrap_err();
        match err {
            PlanError::DependencyCycle { cycle, .. } => assert_eq!(cycle, vec!["b", "a", "b"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_long_cycle() {
        let g = graph(&[
            ("a", TaskStatus::Pending, &["b"]),
            ("b", TaskStatus::Pending, &["c"]),
            ("c", TaskStatus::Pending, &[]),
        ]);
        let err = validate_dependencies("c", &set(&["a"]), &g).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DependencyCycle);
    }

    #[test]
    fn proposed_edges_replace_existing_ones() {
        // a currently depends on b; rewriting a's deps to [] removes that edge.
        let g = graph(&[("a", TaskStatus::Pending, &["b"]), ("b", TaskStatus::Pending, &["a"])]);
        assert!(validate_dependencies("a", &set(&[]), &g).is_ok());
    }

    #[test]
    fn rejects_self_dependency() {
        let g = graph(&[("a", TaskStatus::Pending, &[])]);
        let err = validate_dependencies("a", &set(&["a"]), &g).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DependencyCycle);
    }

    #[test]
    fn unknown_ids_rejected_before_cycle_search() {
        let g = graph(&[("a", TaskStatus::Pending, &[])]);
        let err = validate_dependencies("new", &set(&["a", "ghost"]), &g).unwrap_err();
        match err {
            PlanError::DependencyNotFound { missing, .. } => assert_eq!(missing, vec!["ghost"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn gate_lists_unfinished_dependencies() {
        let g = graph(&[
            ("a", TaskStatus::Pending, &["b", "c"]),
            ("b", TaskStatus::Completed, &[]),
            ("c", TaskStatus::InProgress, &[]),
        ]);
        match can_complete("a", &g).unwrap_err() {
            PlanError::DependencyNotSatisfied { blockers, .. } => assert_eq!(blockers, vec!["c"]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(can_complete("b", &g).is_ok());
    }
}
