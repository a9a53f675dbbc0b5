use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::anyhow;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BusinessCase {
    #[default]
    Tasks,
    Support,
    Recruitment,
    Project,
}

impl FromStr for BusinessCase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tasks" | "task" => Ok(BusinessCase::Tasks),
            "support" => Ok(BusinessCase::Support),
            "recruitment" | "hiring" => Ok(BusinessCase::Recruitment),
            "project" | "projects" => Ok(BusinessCase::Project),
            other => Err(anyhow!("unknown business case: {other}")),
        }
    }
}

/// User-facing nouns for one business case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminology {
    pub item: String,
    pub items: String,
    pub initiative: String,
    pub project: String,
    pub add_action: String,
}

impl Terminology {
    pub fn for_case(case: BusinessCase) -> Self {
        let (item, items, initiative, project, add_action) = match case {
            BusinessCase::Tasks => ("Task", "Tasks", "Initiative", "Project", "Add Task"),
            BusinessCase::Support => ("Ticket", "Tickets", "Escalation", "Customer", "Open Ticket"),
            BusinessCase::Recruitment => {
                ("Candidate", "Candidates", "Role", "Department", "Add Candidate")
            }
            BusinessCase::Project => ("Work Item", "Work Items", "Milestone", "Project", "Add Work Item"),
        };
        Self {
            item: item.to_string(),
            items: items.to_string(),
            initiative: initiative.to_string(),
            project: project.to_string(),
            add_action: add_action.to_string(),
        }
    }

    /// Applies overrides keyed by field name; unknown keys are ignored.
    pub fn merged(mut self, overrides: &BTreeMap<String, String>) -> Self {
        for (key, value) in overrides {
            let slot = match key.as_str() {
                "item" => &mut self.item,
                "items" => &mut self.items,
                "initiative" => &mut self.initiative,
                "project" => &mut self.project,
                "add_action" | "add" => &mut self.add_action,
                other => {
                    debug!(key = other, "ignoring unknown terminology override");
                    continue;
                }
            };
            *slot = value.clone();
        }
        self
    }
}

impl Default for Terminology {
    fn default() -> Self {
        Self::for_case(BusinessCase::default())
    }
}
