//! Integration tests for goal progress roll-up and its consistency under
//! concurrent task completion.

use goal_planner::db::Database;
use goal_planner::types::{GoalPatch, Horizon, NewGoal, NewTask, TaskPatch, TaskStatus};
use std::thread;
use std::time::Duration;

const OWNER: &str = "alice";

fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

fn goal(db: &Database, title: &str, parent: Option<&str>) -> String {
    db.create_goal(
        OWNER,
        &NewGoal {
            parent_goal_id: parent.map(str::to_string),
            ..NewGoal::new(title, Horizon::Monthly)
        },
    )
    .unwrap()
    .id
}

/// Create `total` tasks under `goal_id`, completing the first `done`.
fn tasks(db: &Database, goal_id: &str, total: usize, done: usize) -> Vec<String> {
    (0..total)
        .map(|i| {
            let id = db
                .create_task(OWNER, &NewTask::new(format!("Task {}", i)).under_goal(goal_id))
                .unwrap()
                .id;
            if i < done {
                db.complete_task(OWNER, &id, false).unwrap();
            }
            id
        })
        .collect()
}

fn progress(db: &Database, goal_id: &str) -> u8 {
    db.get_goal(OWNER, goal_id).unwrap().progress_percentage
}

#[test]
fn half_of_tasks_done_is_fifty_percent() {
    let db = setup_db();
    let g = goal(&db, "Half", None);
    tasks(&db, &g, 4, 2);
    assert_eq!(progress(&db, &g), 50);
}

#[test]
fn goal_without_children_is_zero() {
    let db = setup_db();
    let g = goal(&db, "Empty", None);
    assert_eq!(progress(&db, &g), 0);
    assert_eq!(db.recompute_goal(OWNER, &g).unwrap(), 0);
}

#[test]
fn subgoals_count_as_fractional_units() {
    let db = setup_db();
    let parent = goal(&db, "Parent", None);
    let forty = goal(&db, "Forty", Some(&parent));
    let sixty = goal(&db, "Sixty", Some(&parent));
    tasks(&db, &forty, 5, 2);
    tasks(&db, &sixty, 5, 3);

    assert_eq!(progress(&db, &forty), 40);
    assert_eq!(progress(&db, &sixty), 60);
    assert_eq!(progress(&db, &parent), 50);
}

#[test]
fn mixed_tasks_and_subgoals() {
    let db = setup_db();
    let parent = goal(&db, "Parent", None);
    let child = goal(&db, "Child", Some(&parent));
    tasks(&db, &child, 2, 1);
    tasks(&db, &parent, 1, 1);

    // one finished task (100) plus a half-done subgoal (50) over two units
    assert_eq!(progress(&db, &parent), 75);
    assert!((db.remaining_units(OWNER, &parent).unwrap() - 0.5).abs() < 1e-9);
}

#[test]
fn changes_propagate_to_every_ancestor() {
    let db = setup_db();
    let root = goal(&db, "Root", None);
    let mid = goal(&db, "Mid", Some(&root));
    let leaf = goal(&db, "Leaf", Some(&mid));
    let ids = tasks(&db, &leaf, 2, 0);

    db.complete_task(OWNER, &ids[0], false).unwrap();
    assert_eq!(progress(&db, &leaf), 50);
    assert_eq!(progress(&db, &mid), 50);
    assert_eq!(progress(&db, &root), 50);

    db.complete_task(OWNER, &ids[1], false).unwrap();
    assert_eq!(progress(&db, &root), 100);

    db.uncomplete_task(OWNER, &ids[1]).unwrap();
    assert_eq!(progress(&db, &root), 50);

    db.delete_task(OWNER, &ids[1]).unwrap();
    assert_eq!(progress(&db, &leaf), 100);
    assert_eq!(progress(&db, &root), 100);
}

#[test]
fn non_completion_status_changes_keep_progress() {
    let db = setup_db();
    let g = goal(&db, "Goal", None);
    let ids = tasks(&db, &g, 2, 1);
    let before = db.get_goal(OWNER, &g).unwrap();

    let patch = TaskPatch {
        status: Some(TaskStatus::InProgress),
        ..Default::default()
    };
    db.update_task(OWNER, &ids[1], &patch).unwrap();

    let after = db.get_goal(OWNER, &g).unwrap();
    assert_eq!(after.progress_percentage, 50);
    assert_eq!(after.version, before.version);
}

#[test]
fn unchanged_ancestors_are_still_touched() {
    let db = setup_db();
    let root = goal(&db, "Root", None);
    let leaf = goal(&db, "Leaf", Some(&root));
    tasks(&db, &leaf, 1, 0);
    let before = db.get_goal(OWNER, &root).unwrap();

    thread::sleep(Duration::from_millis(5));
    db.create_task(OWNER, &NewTask::new("Another").under_goal(&leaf))
        .unwrap();

    let after = db.get_goal(OWNER, &root).unwrap();
    assert_eq!(after.progress_percentage, 0);
    assert!(after.updated_at > before.updated_at);
    assert!(db.get_goal(OWNER, &leaf).unwrap().updated_at > before.updated_at);
}

#[test]
fn moving_a_task_between_goals() {
    let db = setup_db();
    let a = goal(&db, "A", None);
    let b = goal(&db, "B", None);
    let ids = tasks(&db, &a, 2, 1);

    let patch = TaskPatch {
        parent_goal_id: Some(Some(b.clone())),
        ..Default::default()
    };
    db.update_task(OWNER, &ids[0], &patch).unwrap();

    assert_eq!(progress(&db, &a), 0);
    assert_eq!(progress(&db, &b), 100);
}

#[test]
fn recompute_repairs_drifted_cache() {
    let db = setup_db();
    let parent = goal(&db, "Parent", None);
    let child = goal(&db, "Child", Some(&parent));
    tasks(&db, &child, 3, 1);
    assert_eq!(progress(&db, &child), 33);

    db.with_conn(|conn| {
        conn.execute(
            "UPDATE goals SET progress_percentage = 90 WHERE id IN (?1, ?2)",
            [&parent, &child],
        )?;
        Ok(())
    })
    .unwrap();
    assert_eq!(progress(&db, &parent), 90);

    assert_eq!(db.recompute_goal(OWNER, &child).unwrap(), 33);
    assert_eq!(progress(&db, &parent), 33);
}

#[test]
fn goal_status_is_independent_of_progress() {
    let db = setup_db();
    let g = goal(&db, "Goal", None);
    tasks(&db, &g, 2, 0);

    let patch = GoalPatch {
        status: Some(goal_planner::types::GoalStatus::Completed),
        ..Default::default()
    };
    let updated = db.update_goal(OWNER, &g, &patch).unwrap();
    assert_eq!(updated.progress_percentage, 0);
}

mod concurrency_tests {
    use super::*;

    #[test]
    fn concurrent_sibling_completions_on_shared_handle() {
        let db = setup_db();
        let parent = goal(&db, "Parent", None);
        let children: Vec<String> = (0..4)
            .map(|i| goal(&db, &format!("Child {}", i), Some(&parent)))
            .collect();
        let per_child: Vec<Vec<String>> = children.iter().map(|c| tasks(&db, c, 5, 0)).collect();

        thread::scope(|s| {
            for ids in &per_child {
                let db = db.clone();
                s.spawn(move || {
                    for id in ids {
                        db.complete_task(OWNER, id, false).unwrap();
                    }
                });
            }
        });

        for child in &children {
            assert_eq!(progress(&db, child), 100);
        }
        assert_eq!(progress(&db, &parent), 100);
    }

    #[test]
    fn concurrent_completions_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("planner.db");
        let first = Database::open(&path).unwrap();
        let second = Database::open(&path).unwrap();

        let parent = goal(&first, "Parent", None);
        let left = goal(&first, "Left", Some(&parent));
        let right = goal(&first, "Right", Some(&parent));
        let left_tasks = tasks(&first, &left, 10, 0);
        let right_tasks = tasks(&first, &right, 10, 0);

        thread::scope(|s| {
            s.spawn(|| {
                for id in &left_tasks {
                    first.complete_task(OWNER, id, false).unwrap();
                }
            });
            s.spawn(|| {
                for id in &right_tasks {
                    second.complete_task(OWNER, id, false).unwrap();
                }
            });
        });

        assert_eq!(progress(&first, &parent), 100);
        assert_eq!(progress(&second, &left), 100);
        assert_eq!(progress(&second, &right), 100);
        assert_eq!(first.recompute_goal(OWNER, &parent).unwrap(), 100);
    }
}
