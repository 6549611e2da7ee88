//! Dependency edge storage.

use super::Database;
use crate::dependencies::DependencyGraph;
use crate::types::TaskStatus;
use anyhow::Result;
use rusqlite::{Connection, params};
use std::collections::{BTreeMap, BTreeSet};

/// Load the owner's full task graph (ids, statuses, edges).
pub(crate) fn load_graph(conn: &Connection, owner: &str) -> Result<DependencyGraph> {
    let mut graph = DependencyGraph::new();

    let mut stmt = conn.prepare("SELECT id, status FROM tasks WHERE owner = ?1")?;
    let rows = stmt.query_map(params![owner], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, TaskStatus>(1)?))
    })?;
    for row in rows {
        let (id, status) = row?;
        graph.insert(id, status, BTreeSet::new());
    }

    let mut stmt = conn.prepare(
        "SELECT d.task_id, d.depends_on_id
         FROM task_dependencies d
         JOIN tasks t ON t.id = d.task_id
         WHERE t.owner = ?1",
    )?;
    let rows = stmt.query_map(params![owner], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (task_id, depends_on) = row?;
        graph.add_edge(&task_id, depends_on);
    }

    Ok(graph)
}

/// Ids a single task depends on.
pub(crate) fn dependencies_of(conn: &Connection, task_id: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT depends_on_id FROM task_dependencies WHERE task_id = ?1 ORDER BY depends_on_id",
    )?;
    let deps = stmt
        .query_map(params![task_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<BTreeSet<String>>>()?;
    Ok(deps)
}

/// Dependencies for every task of an owner, keyed by task id.
pub(crate) fn dependency_map(
    conn: &Connection,
    owner: &str,
) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let mut stmt = conn.prepare(
        "SELECT d.task_id, d.depends_on_id
         FROM task_dependencies d
         JOIN tasks t ON t.id = d.task_id
         WHERE t.owner = ?1",
    )?;
    let rows = stmt.query_map(params![owner], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for row in rows {
        let (task_id, depends_on) = row?;
        map.entry(task_id).or_default().insert(depends_on);
    }
    Ok(map)
}

/// Replace a task's dependency set. Callers validate first.
pub(crate) fn replace_dependencies(
    conn: &Connection,
    task_id: &str,
    deps: &BTreeSet<String>,
) -> Result<()> {
    conn.execute(
        "DELETE FROM task_dependencies WHERE task_id = ?1",
        params![task_id],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO task_dependencies (task_id, depends_on_id) VALUES (?1, ?2)",
    )?;
    for dep in deps {
        stmt.execute(params![task_id, dep])?;
    }
    Ok(())
}

impl Database {
    /// Snapshot of an owner's dependency graph.
    pub fn dependency_graph(&self, owner: &str) -> Result<DependencyGraph> {
        self.with_conn(|conn| load_graph(conn, owner))
    }

    /// Tasks that must complete before `task_id` and have not.
    pub fn get_blockers(&self, owner: &str, task_id: &str) -> Result<Vec<String>> {
        let graph = self.dependency_graph(owner)?;
        Ok(crate::dependencies::unsatisfied_dependencies(task_id, &graph))
    }
}
