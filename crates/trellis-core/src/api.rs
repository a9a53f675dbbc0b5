//! The document API the board talks to.
//!
//! Two backends implement [`TaskApi`]: [`crate::http::HttpApi`] for the remote
//! service and [`crate::store::DocumentStore`] for a local JSONL directory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::task::{Initiative, Item, Kpi, Priority, Project, Status, Task};

pub type ApiResult<T> = Result<T, ApiError>;

/// Partial update of a task. Only fields that are `Some` are sent and
/// replaced.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starred: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// `Some(None)` clears the completion time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Vec<Item>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Vec<Item>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_steps: Option<Vec<Item>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == TaskPatch::default()
    }

    /// Merges the patch into a stored document, field by field.
    pub fn apply_to(&self, task: &mut Task) -> anyhow::Result<()> {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(project) = &self.project {
            task.project = project.clone();
        }
        if let Some(tags) = &self.tags {
            task.tags = tags.clone();
        }
        if let Some(starred) = self.starred {
            task.starred = starred;
        }
        if let Some(updated_at) = &self.updated_at {
            task.updated_at = crate::datetime::parse_timestamp(updated_at)?;
        }
        if let Some(completed_at) = &self.completed_at {
            task.completed_at = completed_at
                .as_deref()
                .map(crate::datetime::parse_timestamp)
                .transpose()?;
        }
        if let Some(items) = &self.requirements {
            task.requirements = items.clone();
        }
        if let Some(items) = &self.plan {
            task.plan = items.clone();
        }
        if let Some(items) = &self.next_steps {
            task.next_steps = items.clone();
        }
        Ok(())
    }
}

/// Payload for creating an initiative.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InitiativeCreate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub project: String,
}

#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn list_tasks(&self) -> ApiResult<Vec<Task>>;

    async fn get_task(&self, id: &str) -> ApiResult<Task>;

    /// Persists a fully built task and returns the stored copy.
    async fn create_task(&self, task: &Task) -> ApiResult<Task>;

    /// `project` identifies the partition the document lives in.
    async fn update_task(&self, id: &str, project: &str, patch: &TaskPatch) -> ApiResult<Task>;

    async fn delete_task(&self, id: &str, project: &str) -> ApiResult<()>;

    async fn list_initiatives(&self) -> ApiResult<Vec<Initiative>>;

    async fn create_initiative(&self, initiative: &Initiative) -> ApiResult<Initiative>;

    async fn list_projects(&self) -> ApiResult<Vec<Project>>;

    async fn list_kpis(&self) -> ApiResult<Vec<Kpi>>;
}
