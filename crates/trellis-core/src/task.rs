use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datetime::iso_serde;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Inbox,
    Brainstorm,
    Proposed,
    Backlog,
    Maybe,
    Todo,
    InProgress,
    OnHold,
    Done,
    Reviewed,
    Archived,
}

impl Status {
    pub const ALL: [Status; 11] = [
        Status::Inbox,
        Status::Brainstorm,
        Status::Proposed,
        Status::Backlog,
        Status::Maybe,
        Status::Todo,
        Status::InProgress,
        Status::OnHold,
        Status::Done,
        Status::Reviewed,
        Status::Archived,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Inbox => "inbox",
            Status::Brainstorm => "brainstorm",
            Status::Proposed => "proposed",
            Status::Backlog => "backlog",
            Status::Maybe => "maybe",
            Status::Todo => "todo",
            Status::InProgress => "in-progress",
            Status::OnHold => "on-hold",
            Status::Done => "done",
            Status::Reviewed => "reviewed",
            Status::Archived => "archived",
        }
    }

    /// Done and reviewed count as completed work; archived does not.
    pub fn is_completed(self) -> bool {
        matches!(self, Status::Done | Status::Reviewed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| anyhow!("unknown task status: {s}"))
    }
}

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l" | "low" => Ok(Priority::Low),
            "m" | "med" | "medium" => Ok(Priority::Medium),
            "h" | "high" => Ok(Priority::High),
            other => Err(anyhow!("unknown priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Proposed,
    Approved,
    Vetoed,
}

/// Which of the three item lists on a task an item operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Requirement,
    Plan,
    NextStep,
}

impl ItemKind {
    /// Field name of the list in the wire format.
    pub fn field_name(self) -> &'static str {
        match self {
            ItemKind::Requirement => "requirements",
            ItemKind::Plan => "plan",
            ItemKind::NextStep => "nextSteps",
        }
    }
}

impl FromStr for ItemKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "req" | "requirement" | "requirements" => Ok(ItemKind::Requirement),
            "plan" => Ok(ItemKind::Plan),
            "next" | "next-step" | "next-steps" | "nextsteps" => Ok(ItemKind::NextStep),
            other => Err(anyhow!("unknown item list: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(with = "iso_serde")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "iso_serde")]
    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn proposed(content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            status: ItemStatus::Proposed,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,

    pub title: String,

    #[serde(default)]
    pub description: String,

    pub status: Status,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub project: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiative: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub starred: bool,

    #[serde(with = "iso_serde")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "iso_serde")]
    pub updated_at: DateTime<Utc>,

    #[serde(
        default,
        with = "iso_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub requirements: Vec<Item>,

    #[serde(default)]
    pub plan: Vec<Item>,

    #[serde(default)]
    pub next_steps: Vec<Item>,
}

impl Task {
    pub fn new(title: impl Into<String>, status: Status, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: String::new(),
            status,
            priority: Priority::default(),
            project: String::new(),
            initiative: None,
            tags: vec![],
            starred: false,
            created_at: now,
            updated_at: now,
            completed_at: if status.is_completed() { Some(now) } else { None },
            requirements: vec![],
            plan: vec![],
            next_steps: vec![],
        }
    }

    /// Bumps `updated_at`, never letting it fall behind `created_at`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now.max(self.created_at);
    }

    /// Moves the task to `status`, keeping `completed_at` in step with it.
    pub fn set_status(&mut self, status: Status, now: DateTime<Utc>) {
        self.status = status;
        if status.is_completed() {
            if self.completed_at.is_none() {
                self.completed_at = Some(now);
            }
        } else {
            self.completed_at = None;
        }
        self.touch(now);
    }

    pub fn items(&self, kind: ItemKind) -> &[Item] {
        match kind {
            ItemKind::Requirement => &self.requirements,
            ItemKind::Plan => &self.plan,
            ItemKind::NextStep => &self.next_steps,
        }
    }

    pub fn items_mut(&mut self, kind: ItemKind) -> &mut Vec<Item> {
        match kind {
            ItemKind::Requirement => &mut self.requirements,
            ItemKind::Plan => &mut self.plan,
            ItemKind::NextStep => &mut self.next_steps,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Initiative {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub project: String,
    #[serde(with = "iso_serde")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Kpi {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub target: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
}
