use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use tempfile::{TempDir, tempdir};
use trellis_core::api::{ApiResult, InitiativeCreate, TaskApi, TaskPatch};
use trellis_core::board::{Deletion, Settlement, TaskBoard, TaskForm};
use trellis_core::error::{ApiError, BoardError};
use trellis_core::filter::{ProjectFilter, TaskQuery, TaskView};
use trellis_core::sort::{SortDirection, SortOption};
use trellis_core::store::DocumentStore;
use trellis_core::task::{Initiative, Item, ItemKind, ItemStatus, Kpi, Project, Status, Task};

/// Document store with switchable failures.
struct FlakyApi {
    store: DocumentStore,
    fail_creates: AtomicBool,
    fail_updates: AtomicBool,
    fail_deletes: AtomicBool,
}

impl FlakyApi {
    fn open(dir: &TempDir) -> Self {
        Self {
            store: DocumentStore::open(dir.path()).expect("open store"),
            fail_creates: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
        }
    }

    fn outage() -> ApiError {
        ApiError::Network("connection refused".to_string())
    }
}

#[async_trait]
impl TaskApi for FlakyApi {
    async fn list_tasks(&self) -> ApiResult<Vec<Task>> {
        self.store.list_tasks().await
    }

    async fn get_task(&self, id: &str) -> ApiResult<Task> {
        self.store.get_task(id).await
    }

    async fn create_task(&self, task: &Task) -> ApiResult<Task> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        self.store.create_task(task).await
    }

    async fn update_task(&self, id: &str, project: &str, patch: &TaskPatch) -> ApiResult<Task> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        self.store.update_task(id, project, patch).await
    }

    async fn delete_task(&self, id: &str, project: &str) -> ApiResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        self.store.delete_task(id, project).await
    }

    async fn list_initiatives(&self) -> ApiResult<Vec<Initiative>> {
        self.store.list_initiatives().await
    }

    async fn create_initiative(&self, initiative: &Initiative) -> ApiResult<Initiative> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        self.store.create_initiative(initiative).await
    }

    async fn list_projects(&self) -> ApiResult<Vec<Project>> {
        self.store.list_projects().await
    }

    async fn list_kpis(&self) -> ApiResult<Vec<Kpi>> {
        self.store.list_kpis().await
    }
}

fn form(title: &str, project: &str) -> TaskForm {
    TaskForm {
        title: title.to_string(),
        project: project.to_string(),
        ..TaskForm::default()
    }
}

async fn board_with(titles: &[&str]) -> (TempDir, TaskBoard<FlakyApi>, Vec<String>) {
    let temp = tempdir().expect("tempdir");
    let mut board = TaskBoard::new(FlakyApi::open(&temp));
    let now = Utc::now();
    let mut ids = Vec::new();
    for title in titles {
        let task = board.add_task(form(title, "apollo"), now).await.expect("add");
        ids.push(task.id);
    }
    (temp, board, ids)
}

#[tokio::test]
async fn blank_title_is_rejected_before_the_api() {
    let (_temp, mut board, _) = board_with(&[]).await;
    board.api().fail_creates.store(true, Ordering::SeqCst);

    let err = board
        .add_task(form("   ", "apollo"), Utc::now())
        .await
        .expect_err("blank title");
    assert!(err.is_validation());
    assert!(board.tasks().is_empty());
}

#[tokio::test]
async fn failed_create_inserts_nothing() {
    let (_temp, mut board, _) = board_with(&[]).await;
    board.api().fail_creates.store(true, Ordering::SeqCst);

    let err = board
        .add_task(form("Ship it", "apollo"), Utc::now())
        .await
        .expect_err("create should fail");
    assert!(matches!(err, BoardError::Api(ApiError::Network(_))));
    assert!(board.tasks().is_empty());
    assert!(board.api().list_tasks().await.expect("list").is_empty());
}

#[tokio::test]
async fn workflow_steps_persist_and_track_completion() {
    let (_temp, mut board, ids) = board_with(&["Draft plan"]).await;
    let id = &ids[0];
    assert_eq!(board.task(id).expect("task").status, Status::Todo);

    let now = Utc::now() + Duration::minutes(1);
    let started = board.advance(id, now).await.expect("advance").expect("mapped");
    assert_eq!(started.status, Status::InProgress);

    let done = board
        .advance(id, now + Duration::minutes(1))
        .await
        .expect("advance")
        .expect("mapped");
    assert_eq!(done.status, Status::Done);
    assert!(done.completed_at.is_some());

    let stored = board.api().get_task(id).await.expect("stored");
    assert_eq!(stored.status, Status::Done);
    assert!(stored.completed_at.is_some());
    assert!(stored.updated_at >= stored.created_at);

    let back = board
        .retreat(id, now + Duration::minutes(2))
        .await
        .expect("retreat")
        .expect("mapped");
    assert_eq!(back.status, Status::InProgress);
    assert!(back.completed_at.is_none());
}

#[tokio::test]
async fn status_without_default_action_is_not_an_error() {
    let (_temp, mut board, ids) = board_with(&["Wrap up"]).await;
    let id = &ids[0];
    let now = Utc::now();
    board
        .update_task_status(id, "apollo", Status::Reviewed, now)
        .await
        .expect("set reviewed");

    assert!(board.advance(id, now).await.expect("advance").is_none());
    assert_eq!(board.task(id).expect("task").status, Status::Reviewed);

    let archived = board.archive(id, now).await.expect("archive");
    assert_eq!(archived.status, Status::Archived);
    let reopened = board.reopen(id, now).await.expect("reopen");
    assert_eq!(reopened.status, Status::Todo);
    assert!(reopened.completed_at.is_none());
}

#[tokio::test]
async fn archive_requires_finished_work() {
    let (_temp, mut board, ids) = board_with(&["Not yet"]).await;
    let err = board.archive(&ids[0], Utc::now()).await.expect_err("todo");
    assert!(err.is_validation());
}

#[tokio::test]
async fn failed_status_update_rolls_back() {
    let (_temp, mut board, ids) = board_with(&["Fragile"]).await;
    let id = &ids[0];
    let before = board.task(id).expect("task").clone();

    board.api().fail_updates.store(true, Ordering::SeqCst);
    let err = board
        .update_task_status(id, "apollo", Status::Done, Utc::now() + Duration::hours(1))
        .await
        .expect_err("update should fail");
    assert!(matches!(err, BoardError::Api(ApiError::Network(_))));

    let after = board.task(id).expect("task");
    assert_eq!(after.status, before.status);
    assert_eq!(after.updated_at, before.updated_at);
    assert!(after.completed_at.is_none());
}

#[tokio::test]
async fn stale_failure_keeps_newer_optimistic_change() {
    let (_temp, mut board, ids) = board_with(&["Racy"]).await;
    let id = ids[0].clone();
    let now = Utc::now();

    let mut first = board
        .begin_status_change(&id, "apollo", Status::InProgress, now)
        .expect("first");
    let mut second = board
        .begin_status_change(&id, "apollo", Status::Done, now + Duration::seconds(1))
        .expect("second");
    assert!(second.ticket() > first.ticket());
    assert_eq!(board.task(&id).expect("task").status, Status::Done);

    let stored = board
        .api()
        .update_task(&id, "apollo", second.patch())
        .await
        .expect("remote update");
    board.settle(&mut second, Ok(stored)).expect("commit");
    assert_eq!(second.state(), Settlement::Committed);

    let result = board.settle(&mut first, Err(ApiError::Network("timeout".to_string())));
    assert!(result.is_err());
    assert_eq!(first.state(), Settlement::RolledBack);
    assert_eq!(board.task(&id).expect("task").status, Status::Done);
}

#[tokio::test]
async fn commit_merges_only_the_field_it_changed() {
    let (_temp, mut board, ids) = board_with(&["Racy"]).await;
    let id = ids[0].clone();
    let now = Utc::now();

    let mut first = board
        .begin_status_change(&id, "apollo", Status::InProgress, now)
        .expect("first");
    let _second = board
        .begin_star_change(&id, true, now)
        .expect("second");

    let mut echoed = board.task(&id).expect("task").clone();
    echoed.status = Status::InProgress;
    echoed.starred = false;
    board.settle(&mut first, Ok(echoed)).expect("commit");

    assert_eq!(first.state(), Settlement::Committed);
    assert!(board.task(&id).expect("task").starred);
}

#[tokio::test]
async fn overlapping_status_failures_restore_the_original() {
    let (_temp, mut board, ids) = board_with(&["Racy"]).await;
    let id = ids[0].clone();
    let now = Utc::now();

    let mut first = board
        .begin_status_change(&id, "apollo", Status::InProgress, now)
        .expect("first");
    let mut second = board
        .begin_status_change(&id, "apollo", Status::Done, now + Duration::seconds(1))
        .expect("second");

    assert!(board.settle(&mut second, Err(FlakyApi::outage())).is_err());
    assert_eq!(board.task(&id).expect("task").status, Status::InProgress);

    assert!(board.settle(&mut first, Err(FlakyApi::outage())).is_err());
    let remote = board.api().get_task(&id).await.expect("remote");
    let local = board.task(&id).expect("task");
    assert_eq!(local.status, Status::Todo);
    assert_eq!(local.status, remote.status);
    assert!(local.completed_at.is_none());
}

#[tokio::test]
async fn older_failure_hands_its_restore_point_to_the_newer_change() {
    let (_temp, mut board, ids) = board_with(&["Racy"]).await;
    let id = ids[0].clone();
    let now = Utc::now();

    let mut first = board
        .begin_status_change(&id, "apollo", Status::InProgress, now)
        .expect("first");
    let mut second = board
        .begin_status_change(&id, "apollo", Status::Done, now + Duration::seconds(1))
        .expect("second");

    assert!(board.settle(&mut first, Err(FlakyApi::outage())).is_err());
    assert_eq!(board.task(&id).expect("task").status, Status::Done);

    assert!(board.settle(&mut second, Err(FlakyApi::outage())).is_err());
    assert_eq!(board.task(&id).expect("task").status, Status::Todo);
}

#[tokio::test]
async fn star_commit_keeps_in_flight_status_change() {
    let (_temp, mut board, ids) = board_with(&["Racy"]).await;
    let id = ids[0].clone();
    let now = Utc::now();

    let mut status = board
        .begin_status_change(&id, "apollo", Status::InProgress, now)
        .expect("status");
    let mut star = board.begin_star_change(&id, true, now).expect("star");

    let status_reply = board
        .api()
        .update_task(&id, "apollo", status.patch())
        .await
        .expect("remote status");
    let star_reply = board
        .api()
        .update_task(&id, "apollo", star.patch())
        .await
        .expect("remote star");

    board.settle(&mut star, Ok(star_reply)).expect("star commit");
    assert_eq!(board.task(&id).expect("task").status, Status::InProgress);

    board.settle(&mut status, Ok(status_reply)).expect("status commit");
    let remote = board.api().get_task(&id).await.expect("remote");
    let local = board.task(&id).expect("task");
    assert_eq!(local.status, Status::InProgress);
    assert_eq!(local.status, remote.status);
    assert!(local.starred && remote.starred);
}

#[tokio::test]
async fn veto_failure_rolls_back_only_that_item() {
    let temp = tempdir().expect("tempdir");
    let api = FlakyApi::open(&temp);
    let now = Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap();

    let mut task = Task::new("Design review", Status::Todo, now);
    task.project = "apollo".to_string();
    let keep = Item::proposed("Support SSO", now);
    let fragile = Item::proposed("Audit log", now);
    task.requirements = vec![keep.clone(), fragile.clone()];
    api.create_task(&task).await.expect("seed");

    let mut board = TaskBoard::new(api);
    board.refresh().await.expect("refresh");

    let later = now + Duration::minutes(5);
    board
        .approve_item(&task.id, ItemKind::Requirement, &keep.id, later)
        .await
        .expect("approve");

    board.api().fail_updates.store(true, Ordering::SeqCst);
    let err = board
        .veto_item(&task.id, ItemKind::Requirement, &fragile.id, later)
        .await
        .expect_err("veto should fail");
    assert!(!err.is_validation());

    let local = board.task(&task.id).expect("task");
    let statuses: Vec<ItemStatus> = local.requirements.iter().map(|item| item.status).collect();
    assert_eq!(statuses, vec![ItemStatus::Approved, ItemStatus::Proposed]);
}

#[tokio::test]
async fn proposing_an_item_appends_and_persists() {
    let (_temp, mut board, ids) = board_with(&["Roadmap"]).await;
    let id = &ids[0];

    let item = board
        .propose_item(id, ItemKind::NextStep, "Book venue", Utc::now())
        .await
        .expect("propose");
    assert_eq!(item.status, ItemStatus::Proposed);

    let stored = board.api().get_task(id).await.expect("stored");
    assert_eq!(stored.next_steps.len(), 1);
    assert_eq!(stored.next_steps[0].content, "Book venue");

    board.api().fail_updates.store(true, Ordering::SeqCst);
    assert!(
        board
            .propose_item(id, ItemKind::NextStep, "Order food", Utc::now())
            .await
            .is_err()
    );
    assert_eq!(board.task(id).expect("task").next_steps.len(), 1);
}

#[tokio::test]
async fn declined_delete_changes_nothing() {
    let (_temp, mut board, ids) = board_with(&["Keep me"]).await;
    let outcome = board
        .delete_task(&ids[0], "apollo", &|_: &str| false)
        .await
        .expect("declined");
    assert_eq!(outcome, Deletion::Declined);
    assert_eq!(board.tasks().len(), 1);
    assert_eq!(board.api().list_tasks().await.expect("list").len(), 1);
}

#[tokio::test]
async fn failed_delete_restores_original_position() {
    let (_temp, mut board, ids) = board_with(&["one", "two", "three"]).await;
    board.api().fail_deletes.store(true, Ordering::SeqCst);

    let err = board
        .delete_task(&ids[1], "apollo", &|_: &str| true)
        .await
        .expect_err("delete should fail");
    assert!(matches!(err, BoardError::Api(_)));

    let order: Vec<&str> = board.tasks().iter().map(|task| task.id.as_str()).collect();
    assert_eq!(order, vec![ids[0].as_str(), ids[1].as_str(), ids[2].as_str()]);

    board.api().fail_deletes.store(false, Ordering::SeqCst);
    let outcome = board
        .delete_task(&ids[1], "apollo", &|_: &str| true)
        .await
        .expect("delete");
    assert_eq!(outcome, Deletion::Deleted);
    assert_eq!(board.tasks().len(), 2);
}

#[tokio::test]
async fn missing_id_is_not_found() {
    let (_temp, mut board, _) = board_with(&["only"]).await;
    let err = board
        .update_task_status("does-not-exist", "apollo", Status::Done, Utc::now())
        .await
        .expect_err("missing");
    assert!(matches!(err, BoardError::Api(ApiError::NotFound(_))));
}

#[tokio::test]
async fn refresh_collapses_duplicate_records() {
    let temp = tempdir().expect("tempdir");
    let api = FlakyApi::open(&temp);
    let created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

    let older = Task::new("v1", Status::Todo, created);
    let mut newer = older.clone();
    newer.title = "v2".to_string();
    newer.updated_at = created + Duration::days(1);
    api.store
        .save_tasks(&[older.clone(), newer])
        .expect("seed duplicates");

    let mut board = TaskBoard::new(api);
    assert_eq!(board.refresh().await.expect("refresh"), 1);
    assert_eq!(board.task(&older.id).expect("task").title, "v2");
}

#[tokio::test]
async fn initiative_failure_removes_local_copy() {
    let (_temp, mut board, _) = board_with(&[]).await;
    let create = InitiativeCreate {
        name: "Q3 launch".to_string(),
        description: String::new(),
        project: "apollo".to_string(),
    };

    let initiative = board
        .add_initiative(create.clone(), Utc::now())
        .await
        .expect("create");
    assert_eq!(board.initiatives().len(), 1);
    assert_eq!(initiative.name, "Q3 launch");

    board.api().fail_creates.store(true, Ordering::SeqCst);
    assert!(board.add_initiative(create, Utc::now()).await.is_err());
    assert_eq!(board.initiatives().len(), 1);

    assert_eq!(board.refresh_initiatives().await.expect("refresh"), 1);
}

#[tokio::test]
async fn visible_view_filters_sorts_and_counts() {
    let temp = tempdir().expect("tempdir");
    let api = FlakyApi::open(&temp);
    let base = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();

    let mut seeded = Vec::new();
    for (offset, (title, status, project)) in [
        ("alpha notes", Status::Todo, "apollo"),
        ("beta notes", Status::InProgress, "apollo"),
        ("gamma", Status::Backlog, "gemini"),
        ("delta notes", Status::Archived, "apollo"),
    ]
    .into_iter()
    .enumerate()
    {
        let mut task = Task::new(title, status, base + Duration::days(offset as i64));
        task.project = project.to_string();
        api.create_task(&task).await.expect("seed");
        seeded.push(task);
    }

    let mut board = TaskBoard::new(api);
    board.refresh().await.expect("refresh");

    let query = TaskQuery {
        view: TaskView::Pending,
        project: ProjectFilter::One("apollo".to_string()),
        search: "NOTES".to_string(),
    };
    let now = base + Duration::days(10);
    let rows = board.visible(&query, SortOption::CreatedAt, SortDirection::Desc, now);
    let titles: Vec<&str> = rows.iter().map(|task| task.title.as_str()).collect();
    assert_eq!(titles, vec!["delta notes", "beta notes", "alpha notes"]);

    let counts = board.counts(now);
    assert_eq!(counts.all, 4);
    assert_eq!(counts.pending, 4);
    assert_eq!(counts.by_status.get(&Status::Backlog), Some(&1));
}
