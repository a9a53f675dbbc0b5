use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use anyhow::anyhow;
use tracing::debug;

use crate::task::Task;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOption {
    #[default]
    CreatedAt,
    UpdatedAt,
    Priority,
    Status,
}

impl FromStr for SortOption {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" | "createdat" | "created_at" => Ok(SortOption::CreatedAt),
            "updated" | "updatedat" | "updated_at" => Ok(SortOption::UpdatedAt),
            "priority" => Ok(SortOption::Priority),
            "status" => Ok(SortOption::Status),
            other => Err(anyhow!("unknown sort option: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Asc),
            "desc" | "descending" => Ok(SortDirection::Desc),
            other => Err(anyhow!("unknown sort direction: {other}")),
        }
    }
}

fn compare_by(option: SortOption, a: &Task, b: &Task) -> Ordering {
    match option {
        SortOption::CreatedAt => a.created_at.cmp(&b.created_at),
        SortOption::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SortOption::Priority => a.priority.cmp(&b.priority),
        SortOption::Status => a.status.cmp(&b.status),
    }
}

/// Stable in both directions: equal keys keep their input order.
#[tracing::instrument(skip(tasks), fields(count = tasks.len()))]
pub fn sort_tasks(tasks: &[Task], option: SortOption, direction: SortDirection) -> Vec<Task> {
    let mut sorted = tasks.to_vec();
    match direction {
        SortDirection::Asc => sorted.sort_by(|a, b| compare_by(option, a, b)),
        SortDirection::Desc => sorted.sort_by(|a, b| compare_by(option, b, a)),
    }
    sorted
}

/// Collapses entries sharing an id into the most recently updated one.
///
/// A survivor sits where its id was first seen; on equal `updated_at` the
/// earlier entry wins.
#[tracing::instrument(skip(tasks), fields(count = tasks.len()))]
pub fn dedupe_tasks(tasks: &[Task]) -> Vec<Task> {
    let mut out: Vec<Task> = Vec::with_capacity(tasks.len());
    let mut slot_by_id: HashMap<&str, usize> = HashMap::with_capacity(tasks.len());

    for task in tasks {
        match slot_by_id.get(task.id.as_str()) {
            Some(&slot) => {
                if task.updated_at > out[slot].updated_at {
                    out[slot] = task.clone();
                }
            }
            None => {
                slot_by_id.insert(task.id.as_str(), out.len());
                out.push(task.clone());
            }
        }
    }

    if out.len() != tasks.len() {
        debug!(
            before = tasks.len(),
            after = out.len(),
            "collapsed duplicate task ids"
        );
    }
    out
}
