//! Task board: the local task collection kept in step with a [`TaskApi`].
//!
//! Every mutation is optimistic. `begin_*` applies the change locally and
//! returns a [`PendingChange`] holding what is needed to undo it; `settle`
//! commits or rolls it back once the remote call finishes.
//!
//! Ownership is tracked per field: a task's status, its star, or one item on
//! it. Each change takes a monotonically increasing ticket for its field and
//! the board keeps every outstanding ticket with the value to restore. When a
//! change settles while a newer one on the same field is still in flight,
//! its outcome (the confirmed value, or its own restore point) is handed to
//! that newer change instead of being written locally. A change older than
//! the last commit on its field never touches local state.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::api::{ApiResult, InitiativeCreate, TaskApi, TaskPatch};
use crate::datetime::format_timestamp;
use crate::error::{ApiError, BoardError, BoardResult};
use crate::filter::{DEFAULT_RECENT_DAYS, DerivedCounts, Predicates, TaskQuery};
use crate::sort::{SortDirection, SortOption, dedupe_tasks, sort_tasks};
use crate::task::{Initiative, Item, ItemKind, ItemStatus, Kpi, Priority, Project, Status, Task};
use crate::workflow::{REOPEN_STATUS, can_archive, can_reopen, next_status, previous_status};

/// Asks the person at the keyboard before destructive actions.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&str) -> bool,
{
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// Input of the add-task form.
#[derive(Debug, Clone, Default)]
pub struct TaskForm {
    pub title: String,
    pub description: String,
    pub status: Option<Status>,
    pub priority: Priority,
    pub project: String,
    pub initiative: Option<String>,
    pub tags: Vec<String>,
    pub starred: bool,
}

pub const DEFAULT_NEW_STATUS: Status = Status::Todo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Pending,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    Deleted,
    Declined,
}

/// The part of a task a single change owns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Field {
    /// `status` together with `completed_at`.
    Status,
    Starred,
    Item { kind: ItemKind, item_id: String },
}

#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Status {
        status: Status,
        completed_at: Option<DateTime<Utc>>,
    },
    Starred(bool),
    /// `None` when the item does not exist.
    Item(Option<Item>),
}

impl Field {
    fn read(&self, task: &Task) -> FieldValue {
        match self {
            Field::Status => FieldValue::Status {
                status: task.status,
                completed_at: task.completed_at,
            },
            Field::Starred => FieldValue::Starred(task.starred),
            Field::Item { kind, item_id } => FieldValue::Item(
                task.items(*kind).iter().find(|item| item.id == *item_id).cloned(),
            ),
        }
    }

    fn write(&self, task: &mut Task, value: FieldValue) {
        match (self, value) {
            (Field::Status, FieldValue::Status { status, completed_at }) => {
                task.status = status;
                task.completed_at = completed_at;
            }
            (Field::Starred, FieldValue::Starred(starred)) => task.starred = starred,
            (Field::Item { kind, item_id }, FieldValue::Item(value)) => {
                let items = task.items_mut(*kind);
                let slot = items.iter().position(|item| item.id == *item_id);
                match (slot, value) {
                    (Some(at), Some(item)) => items[at] = item,
                    (Some(at), None) => {
                        items.remove(at);
                    }
                    (None, Some(item)) => items.push(item),
                    (None, None) => {}
                }
            }
            (field, value) => warn!(?field, ?value, "mismatched field value ignored"),
        }
    }
}

/// What a failed change puts back.
#[derive(Debug, Clone)]
struct RestorePoint {
    value: FieldValue,
    updated_at: DateTime<Utc>,
}

/// Outstanding changes on one field of one task.
#[derive(Debug, Default)]
struct FieldLedger {
    outstanding: BTreeMap<u64, RestorePoint>,
    last_committed: u64,
}

impl FieldLedger {
    fn newer_outstanding(&mut self, ticket: u64) -> Option<&mut RestorePoint> {
        self.outstanding
            .range_mut(ticket + 1..)
            .next()
            .map(|(_, point)| point)
    }
}

/// An optimistic change that has been applied locally and awaits the remote
/// result.
#[derive(Debug, Clone)]
pub struct PendingChange {
    task_id: String,
    project: String,
    field: Field,
    ticket: u64,
    patch: TaskPatch,
    state: Settlement,
}

impl PendingChange {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn patch(&self) -> &TaskPatch {
        &self.patch
    }

    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn state(&self) -> Settlement {
        self.state
    }
}

pub struct TaskBoard<A> {
    api: A,
    tasks: Vec<Task>,
    initiatives: Vec<Initiative>,
    ledgers: HashMap<(String, Field), FieldLedger>,
    next_ticket: u64,
    recent_threshold: Duration,
}

impl<A: TaskApi> TaskBoard<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            tasks: Vec::new(),
            initiatives: Vec::new(),
            ledgers: HashMap::new(),
            next_ticket: 0,
            recent_threshold: Duration::days(DEFAULT_RECENT_DAYS),
        }
    }

    pub fn with_recent_threshold(mut self, threshold: Duration) -> Self {
        self.recent_threshold = threshold;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn initiatives(&self) -> &[Initiative] {
        &self.initiatives
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    /// Resolves a full id or a unique id prefix.
    pub fn resolve_id(&self, id_or_prefix: &str) -> BoardResult<String> {
        if let Some(task) = self.task(id_or_prefix) {
            return Ok(task.id.clone());
        }
        let mut matches = self
            .tasks
            .iter()
            .filter(|task| task.id.starts_with(id_or_prefix));
        match (matches.next(), matches.next()) {
            (Some(task), None) if !id_or_prefix.is_empty() => Ok(task.id.clone()),
            (Some(_), Some(_)) => Err(BoardError::Validation(format!(
                "task id prefix {id_or_prefix} is ambiguous"
            ))),
            _ => Err(ApiError::not_found("task", id_or_prefix).into()),
        }
    }

    pub fn predicates(&self, now: DateTime<Utc>) -> Predicates {
        Predicates::new(self.recent_threshold, now)
    }

    /// Deduped, filtered and sorted view of the collection.
    pub fn visible(
        &self,
        query: &TaskQuery,
        option: SortOption,
        direction: SortDirection,
        now: DateTime<Utc>,
    ) -> Vec<Task> {
        let predicates = self.predicates(now);
        let unique = dedupe_tasks(&self.tasks);
        let matching = query.apply(&predicates, &unique);
        sort_tasks(&matching, option, direction)
    }

    pub fn counts(&self, now: DateTime<Utc>) -> DerivedCounts {
        DerivedCounts::compute(&self.predicates(now), &dedupe_tasks(&self.tasks))
    }

    #[instrument(skip(self))]
    pub async fn refresh(&mut self) -> BoardResult<usize> {
        let fetched = self.api.list_tasks().await.map_err(|err| {
            warn!(error = %err, "task refresh failed; keeping current list");
            err
        })?;
        self.tasks = dedupe_tasks(&fetched);
        debug!(fetched = fetched.len(), kept = self.tasks.len(), "tasks refreshed");
        Ok(self.tasks.len())
    }

    #[instrument(skip(self))]
    pub async fn refresh_initiatives(&mut self) -> BoardResult<usize> {
        self.initiatives = self.api.list_initiatives().await?;
        Ok(self.initiatives.len())
    }

    pub async fn projects(&self) -> BoardResult<Vec<Project>> {
        Ok(self.api.list_projects().await?)
    }

    pub async fn kpis(&self) -> BoardResult<Vec<Kpi>> {
        Ok(self.api.list_kpis().await?)
    }

    #[instrument(skip(self, form), fields(title_len = form.title.len()))]
    pub async fn add_task(&mut self, form: TaskForm, now: DateTime<Utc>) -> BoardResult<Task> {
        let title = form.title.trim();
        if title.is_empty() {
            return Err(BoardError::Validation("title is required".to_string()));
        }

        let mut task = Task::new(title, form.status.unwrap_or(DEFAULT_NEW_STATUS), now);
        task.description = form.description.trim().to_string();
        task.priority = form.priority;
        task.project = form.project.trim().to_string();
        task.initiative = form
            .initiative
            .map(|initiative| initiative.trim().to_string())
            .filter(|initiative| !initiative.is_empty());
        task.tags = form
            .tags
            .into_iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect();
        task.starred = form.starred;

        let stored = self.api.create_task(&task).await.map_err(|err| {
            warn!(id = %task.id, error = %err, "create task failed");
            err
        })?;

        info!(id = %stored.id, status = %stored.status, "task added");
        self.upsert_local(stored.clone());
        Ok(stored)
    }

    /// Applies a status change locally. The caller must pass the result of
    /// the matching remote update to [`TaskBoard::settle`].
    pub fn begin_status_change(
        &mut self,
        id: &str,
        project: &str,
        status: Status,
        now: DateTime<Utc>,
    ) -> BoardResult<PendingChange> {
        self.begin_task_edit(id, project, Field::Status, now, |task| {
            task.set_status(status, now);
            TaskPatch {
                status: Some(status),
                completed_at: Some(task.completed_at.map(format_timestamp)),
                ..TaskPatch::default()
            }
        })
    }

    pub fn begin_star_change(
        &mut self,
        id: &str,
        starred: bool,
        now: DateTime<Utc>,
    ) -> BoardResult<PendingChange> {
        let project = self.local_project(id)?;
        self.begin_task_edit(id, &project, Field::Starred, now, |task| {
            task.starred = starred;
            task.touch(now);
            TaskPatch {
                starred: Some(starred),
                ..TaskPatch::default()
            }
        })
    }

    pub fn begin_item_status_change(
        &mut self,
        id: &str,
        kind: ItemKind,
        item_id: &str,
        status: ItemStatus,
        now: DateTime<Utc>,
    ) -> BoardResult<PendingChange> {
        self.begin_item_edit(id, kind, item_id, now, |items| {
            let item = items
                .iter_mut()
                .find(|item| item.id == item_id)
                .ok_or_else(|| ApiError::not_found("item", item_id))?;
            item.status = status;
            item.updated_at = now.max(item.created_at);
            Ok(())
        })
    }

    pub fn begin_item_proposal(
        &mut self,
        id: &str,
        kind: ItemKind,
        content: &str,
        now: DateTime<Utc>,
    ) -> BoardResult<(PendingChange, Item)> {
        let content = content.trim();
        if content.is_empty() {
            return Err(BoardError::Validation("item content is required".to_string()));
        }
        let item = Item::proposed(content, now);
        let item_id = item.id.clone();
        let created = item.clone();
        let change = self.begin_item_edit(id, kind, &item_id, now, move |items| {
            items.push(item);
            Ok(())
        })?;
        Ok((change, created))
    }

    /// Commits or rolls back a change once its remote call has finished.
    ///
    /// A change superseded by a newer commit on the same field leaves local
    /// state alone either way. Settling the same change twice is a no-op.
    pub fn settle(&mut self, change: &mut PendingChange, result: ApiResult<Task>) -> BoardResult<()> {
        let key = (change.task_id.clone(), change.field.clone());
        let ledger = self.ledgers.entry(key.clone()).or_default();
        let restore = ledger.outstanding.remove(&change.ticket);
        let superseded = restore.is_none() || ledger.last_committed > change.ticket;

        let (outcome, reply) = match result {
            Ok(stored) => {
                change.state = Settlement::Committed;
                if superseded {
                    debug!(id = %change.task_id, ticket = change.ticket, "stale success ignored");
                    (None, Ok(()))
                } else {
                    ledger.last_committed = change.ticket;
                    let confirmed = RestorePoint {
                        value: change.field.read(&stored),
                        updated_at: stored.updated_at,
                    };
                    let outcome = match ledger.newer_outstanding(change.ticket) {
                        Some(next) => {
                            *next = confirmed;
                            None
                        }
                        None => Some((confirmed, true)),
                    };
                    (outcome, Ok(()))
                }
            }
            Err(err) => {
                change.state = Settlement::RolledBack;
                let outcome = match restore {
                    Some(point) if !superseded => match ledger.newer_outstanding(change.ticket) {
                        Some(next) => {
                            warn!(
                                id = %change.task_id,
                                error = %err,
                                "update failed; newer change keeps the field"
                            );
                            *next = point;
                            None
                        }
                        None => {
                            warn!(id = %change.task_id, error = %err, "remote update failed; rolled back");
                            Some((point, false))
                        }
                    },
                    _ => {
                        warn!(
                            id = %change.task_id,
                            ticket = change.ticket,
                            error = %err,
                            "stale update failed; newer local change kept"
                        );
                        None
                    }
                };
                (outcome, Err(err.into()))
            }
        };

        if ledger.outstanding.is_empty() {
            self.ledgers.remove(&key);
        }
        if let Some((point, committed)) = outcome {
            self.apply_settled(&change.task_id, &change.field, point, committed);
        }
        reply
    }

    #[instrument(skip(self, now))]
    pub async fn update_task_status(
        &mut self,
        id: &str,
        project: &str,
        status: Status,
        now: DateTime<Utc>,
    ) -> BoardResult<Task> {
        let change = self.begin_status_change(id, project, status, now)?;
        self.push_change(change).await
    }

    /// Moves a task along the default action. `Ok(None)` when the current
    /// status has no default action.
    pub async fn advance(&mut self, id: &str, now: DateTime<Utc>) -> BoardResult<Option<Task>> {
        let (status, project) = self.local_status(id)?;
        match next_status(status) {
            Some(next) => Ok(Some(self.update_task_status(id, &project, next, now).await?)),
            None => {
                debug!(id, %status, "no default action available");
                Ok(None)
            }
        }
    }

    pub async fn retreat(&mut self, id: &str, now: DateTime<Utc>) -> BoardResult<Option<Task>> {
        let (status, project) = self.local_status(id)?;
        match previous_status(status) {
            Some(previous) => Ok(Some(
                self.update_task_status(id, &project, previous, now).await?,
            )),
            None => Ok(None),
        }
    }

    pub async fn archive(&mut self, id: &str, now: DateTime<Utc>) -> BoardResult<Task> {
        let (status, project) = self.local_status(id)?;
        if !can_archive(status) {
            return Err(BoardError::Validation(format!(
                "only finished tasks can be archived (task is {status})"
            )));
        }
        self.update_task_status(id, &project, Status::Archived, now).await
    }

    pub async fn reopen(&mut self, id: &str, now: DateTime<Utc>) -> BoardResult<Task> {
        let (status, project) = self.local_status(id)?;
        if !can_reopen(status) {
            return Err(BoardError::Validation(format!(
                "task is still open ({status})"
            )));
        }
        self.update_task_status(id, &project, REOPEN_STATUS, now).await
    }

    pub async fn set_starred(&mut self, id: &str, starred: bool, now: DateTime<Utc>) -> BoardResult<Task> {
        let change = self.begin_star_change(id, starred, now)?;
        self.push_change(change).await
    }

    #[instrument(skip(self, now))]
    pub async fn approve_item(
        &mut self,
        id: &str,
        kind: ItemKind,
        item_id: &str,
        now: DateTime<Utc>,
    ) -> BoardResult<Task> {
        let change = self.begin_item_status_change(id, kind, item_id, ItemStatus::Approved, now)?;
        self.push_change(change).await
    }

    #[instrument(skip(self, now))]
    pub async fn veto_item(
        &mut self,
        id: &str,
        kind: ItemKind,
        item_id: &str,
        now: DateTime<Utc>,
    ) -> BoardResult<Task> {
        let change = self.begin_item_status_change(id, kind, item_id, ItemStatus::Vetoed, now)?;
        self.push_change(change).await
    }

    pub async fn propose_item(
        &mut self,
        id: &str,
        kind: ItemKind,
        content: &str,
        now: DateTime<Utc>,
    ) -> BoardResult<Item> {
        let (change, item) = self.begin_item_proposal(id, kind, content, now)?;
        self.push_change(change).await?;
        Ok(item)
    }

    /// Removes a task after confirmation. A failed remote delete puts the
    /// task back where it was.
    #[instrument(skip(self, confirm))]
    pub async fn delete_task(
        &mut self,
        id: &str,
        project: &str,
        confirm: &impl Confirm,
    ) -> BoardResult<Deletion> {
        let index = self
            .tasks
            .iter()
            .position(|task| task.id == id)
            .ok_or_else(|| ApiError::not_found("task", id))?;

        let prompt = format!("Delete task \"{}\"?", self.tasks[index].title);
        if !confirm.confirm(&prompt) {
            debug!(id, "delete declined");
            return Ok(Deletion::Declined);
        }

        let removed = self.tasks.remove(index);
        match self.api.delete_task(id, project).await {
            Ok(()) => {
                info!(id, "task deleted");
                Ok(Deletion::Deleted)
            }
            Err(err) => {
                warn!(id, error = %err, "delete failed; task restored");
                let at = index.min(self.tasks.len());
                self.tasks.insert(at, removed);
                Err(err.into())
            }
        }
    }

    #[instrument(skip(self, form, now), fields(name = %form.name))]
    pub async fn add_initiative(
        &mut self,
        form: InitiativeCreate,
        now: DateTime<Utc>,
    ) -> BoardResult<Initiative> {
        let name = form.name.trim();
        if name.is_empty() {
            return Err(BoardError::Validation("initiative name is required".to_string()));
        }

        let initiative = Initiative {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: form.description.trim().to_string(),
            project: form.project.trim().to_string(),
            created_at: now,
        };
        self.initiatives.push(initiative.clone());

        match self.api.create_initiative(&initiative).await {
            Ok(stored) => {
                if let Some(slot) = self.initiatives.iter_mut().find(|i| i.id == initiative.id) {
                    *slot = stored.clone();
                }
                Ok(stored)
            }
            Err(err) => {
                warn!(error = %err, "create initiative failed; removed local copy");
                self.initiatives.retain(|i| i.id != initiative.id);
                Err(err.into())
            }
        }
    }

    async fn push_change(&mut self, mut change: PendingChange) -> BoardResult<Task> {
        let result = self
            .api
            .update_task(&change.task_id, &change.project, &change.patch)
            .await;
        self.settle(&mut change, result)?;
        self.task(&change.task_id)
            .cloned()
            .ok_or_else(|| ApiError::not_found("task", &change.task_id).into())
    }

    fn issue_ticket(&mut self, id: &str, field: &Field, restore: RestorePoint) -> u64 {
        self.next_ticket += 1;
        self.ledgers
            .entry((id.to_string(), field.clone()))
            .or_default()
            .outstanding
            .insert(self.next_ticket, restore);
        self.next_ticket
    }

    fn local_index(&self, id: &str) -> BoardResult<usize> {
        self.tasks
            .iter()
            .position(|task| task.id == id)
            .ok_or_else(|| ApiError::not_found("task", id).into())
    }

    fn local_project(&self, id: &str) -> BoardResult<String> {
        Ok(self.tasks[self.local_index(id)?].project.clone())
    }

    fn local_status(&self, id: &str) -> BoardResult<(Status, String)> {
        let task = &self.tasks[self.local_index(id)?];
        Ok((task.status, task.project.clone()))
    }

    fn begin_task_edit(
        &mut self,
        id: &str,
        project: &str,
        field: Field,
        now: DateTime<Utc>,
        edit: impl FnOnce(&mut Task) -> TaskPatch,
    ) -> BoardResult<PendingChange> {
        let index = self.local_index(id)?;
        let task = &mut self.tasks[index];
        let restore = RestorePoint {
            value: field.read(task),
            updated_at: task.updated_at,
        };
        let mut patch = edit(task);
        task.touch(now);
        patch.updated_at = Some(format_timestamp(task.updated_at));

        let ticket = self.issue_ticket(id, &field, restore);
        debug!(id, ticket, ?field, "optimistic task change applied");
        Ok(PendingChange {
            task_id: id.to_string(),
            project: project.to_string(),
            field,
            ticket,
            patch,
            state: Settlement::Pending,
        })
    }

    fn begin_item_edit(
        &mut self,
        id: &str,
        kind: ItemKind,
        item_id: &str,
        now: DateTime<Utc>,
        edit: impl FnOnce(&mut Vec<Item>) -> BoardResult<()>,
    ) -> BoardResult<PendingChange> {
        let field = Field::Item {
            kind,
            item_id: item_id.to_string(),
        };
        let index = self.local_index(id)?;
        let task = &mut self.tasks[index];
        let restore = RestorePoint {
            value: field.read(task),
            updated_at: task.updated_at,
        };
        edit(task.items_mut(kind))?;
        task.touch(now);

        let mut patch = TaskPatch {
            updated_at: Some(format_timestamp(task.updated_at)),
            ..TaskPatch::default()
        };
        let items = Some(task.items(kind).to_vec());
        match kind {
            ItemKind::Requirement => patch.requirements = items,
            ItemKind::Plan => patch.plan = items,
            ItemKind::NextStep => patch.next_steps = items,
        }
        let project = task.project.clone();

        let ticket = self.issue_ticket(id, &field, restore);
        debug!(id, item_id, ticket, "optimistic item change applied");
        Ok(PendingChange {
            task_id: id.to_string(),
            project,
            field,
            ticket,
            patch,
            state: Settlement::Pending,
        })
    }

    /// Writes a settled value for a field nobody newer owns. A rollback only
    /// restores `updated_at` once no other change on the task is in flight.
    fn apply_settled(&mut self, id: &str, field: &Field, point: RestorePoint, committed: bool) {
        let others_in_flight = self.ledgers.keys().any(|(task_id, _)| task_id == id);
        let Some(task) = self.tasks.iter_mut().find(|task| task.id == id) else {
            return;
        };
        field.write(task, point.value);
        if committed {
            task.updated_at = task.updated_at.max(point.updated_at);
        } else if !others_in_flight {
            task.updated_at = point.updated_at;
        }
    }

    fn upsert_local(&mut self, task: Task) {
        match self.tasks.iter_mut().find(|existing| existing.id == task.id) {
            Some(existing) => *existing = task,
            None => self.tasks.push(task),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::Field;
    use crate::task::{Item, ItemKind, Status, Task};

    #[test]
    fn field_write_touches_only_its_own_field() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let before = Task::new("t", Status::Todo, now);
        let mut current = before.clone();
        current.set_status(Status::Done, now + Duration::hours(1));
        current.starred = true;

        Field::Status.write(&mut current, Field::Status.read(&before));

        assert_eq!(current.status, Status::Todo);
        assert!(current.completed_at.is_none());
        assert!(current.starred);
    }

    #[test]
    fn item_field_restores_absence_by_removing() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let before = Task::new("t", Status::Todo, now);
        let mut current = before.clone();
        let added = Item::proposed("Export to CSV", now);
        current.plan.push(added.clone());

        let field = Field::Item {
            kind: ItemKind::Plan,
            item_id: added.id.clone(),
        };
        field.write(&mut current, field.read(&before));
        assert!(current.plan.is_empty());

        let confirmed = Task {
            plan: vec![added.clone()],
            ..before
        };
        field.write(&mut current, field.read(&confirmed));
        assert_eq!(current.plan, vec![added]);
    }
}
