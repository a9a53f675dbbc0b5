use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  DateTime,
  Duration,
  Utc
};
use tracing::trace;

use crate::task::{
  Status,
  Task
};

pub const DEFAULT_RECENT_DAYS: i64 = 2;

/// Status-bucket predicates, bound to
/// one clock reading so every task in
/// a pass is judged against the same
/// `now`.
#[derive(Debug, Clone, Copy)]
pub struct Predicates {
  recent_threshold: Duration,
  now:              DateTime<Utc>
}

impl Predicates {
  pub fn new(
    recent_threshold: Duration,
    now: DateTime<Utc>
  ) -> Self {
    Self {
      recent_threshold,
      now
    }
  }

  pub fn with_default_threshold(
    now: DateTime<Utc>
  ) -> Self {
    Self::new(
      Duration::days(
        DEFAULT_RECENT_DAYS
      ),
      now
    )
  }

  pub fn all(
    &self,
    task: &Task
  ) -> bool {
    !task.status.is_completed()
  }

  /// Synonym of [`Predicates::all`].
  pub fn pending(
    &self,
    task: &Task
  ) -> bool {
    self.all(task)
  }

  pub fn source_tasks(
    &self,
    task: &Task
  ) -> bool {
    matches!(
      task.status,
      Status::Backlog
        | Status::Brainstorm
    )
  }

  pub fn recent_completed(
    &self,
    task: &Task
  ) -> bool {
    if !task.status.is_completed() {
      return false;
    }
    task
      .completed_at
      .map(|done| {
        self.now
          .signed_duration_since(done)
          < self.recent_threshold
      })
      .unwrap_or(false)
  }

  pub fn today(
    &self,
    task: &Task
  ) -> bool {
    task.starred
  }

  pub fn by_status(
    &self,
    task: &Task,
    status: Status
  ) -> bool {
    task.status == status
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default,
)]
pub enum TaskView {
  #[default]
  All,
  Pending,
  Source,
  RecentCompleted,
  Today,
  Status(Status)
}

impl TaskView {
  pub fn matches(
    self,
    predicates: &Predicates,
    task: &Task
  ) -> bool {
    match self {
      | TaskView::All => {
        predicates.all(task)
      }
      | TaskView::Pending => {
        predicates.pending(task)
      }
      | TaskView::Source => {
        predicates.source_tasks(task)
      }
      | TaskView::RecentCompleted => {
        predicates
          .recent_completed(task)
      }
      | TaskView::Today => {
        predicates.today(task)
      }
      | TaskView::Status(status) => {
        predicates
          .by_status(task, status)
      }
    }
  }
}

impl FromStr for TaskView {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let text =
      s.trim().to_ascii_lowercase();
    match text.as_str() {
      | "" | "all" => Ok(TaskView::All),
      | "pending" => {
        Ok(TaskView::Pending)
      }
      | "source" | "sources" => {
        Ok(TaskView::Source)
      }
      | "recent" | "completed" => {
        Ok(TaskView::RecentCompleted)
      }
      | "today" | "starred" => {
        Ok(TaskView::Today)
      }
      | other => {
        let status_text = other
          .strip_prefix("status:")
          .unwrap_or(other);
        status_text
          .parse::<Status>()
          .map(TaskView::Status)
          .map_err(|_| {
            anyhow!(
              "unknown view: {s}"
            )
          })
      }
    }
  }
}

#[derive(
  Debug, Clone, PartialEq, Eq, Default,
)]
pub enum ProjectFilter {
  #[default]
  All,
  /// Only tasks with an empty
  /// project.
  Unassigned,
  One(String),
  Any(Vec<String>)
}

impl ProjectFilter {
  pub fn matches(
    &self,
    task: &Task
  ) -> bool {
    match self {
      | ProjectFilter::All => true,
      | ProjectFilter::Unassigned => {
        task.project.is_empty()
      }
      | ProjectFilter::One(project) => {
        task.project == *project
      }
      | ProjectFilter::Any(projects) => {
        projects.iter().any(|project| {
          *project == task.project
        })
      }
    }
  }
}

impl FromStr for ProjectFilter {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let text = s.trim();
    if text.is_empty()
      || text.eq_ignore_ascii_case("all")
    {
      return Ok(ProjectFilter::All);
    }
    if text.eq_ignore_ascii_case("none")
    {
      return Ok(
        ProjectFilter::Unassigned
      );
    }

    let mut projects: Vec<String> =
      text
        .split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    match projects.len() {
      | 0 => Err(anyhow!(
        "empty project filter: {s}"
      )),
      | 1 => {
        Ok(ProjectFilter::One(
          projects.remove(0)
        ))
      }
      | _ => {
        Ok(ProjectFilter::Any(projects))
      }
    }
  }
}

pub fn should_include_task_by_project(
  task: &Task,
  filter: &ProjectFilter
) -> bool {
  filter.matches(task)
}

fn contains_lower(
  field: &str,
  needle: &str
) -> bool {
  field.to_lowercase().contains(needle)
}

/// `needle` must already be lowercase.
fn matches_search(
  task: &Task,
  needle: &str
) -> bool {
  contains_lower(&task.title, needle)
    || contains_lower(
      &task.description,
      needle
    )
    || contains_lower(&task.id, needle)
    || task
      .initiative
      .as_deref()
      .is_some_and(|initiative| {
        contains_lower(
          initiative, needle
        )
      })
    || contains_lower(
      &task.project,
      needle
    )
    || task.tags.iter().any(|tag| {
      contains_lower(tag, needle)
    })
}

/// A blank term returns the input
/// untouched.
pub fn filter_tasks_by_search_term(
  tasks: &[Task],
  term: &str
) -> Vec<Task> {
  let needle =
    term.trim().to_lowercase();
  if needle.is_empty() {
    return tasks.to_vec();
  }

  tasks
    .iter()
    .filter(|task| {
      matches_search(task, &needle)
    })
    .cloned()
    .collect()
}

/// View AND project AND search.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
  pub view:    TaskView,
  pub project: ProjectFilter,
  pub search:  String
}

impl TaskQuery {
  pub fn matches(
    &self,
    predicates: &Predicates,
    task: &Task
  ) -> bool {
    let needle =
      self.search.trim().to_lowercase();
    let ok = self
      .view
      .matches(predicates, task)
      && self.project.matches(task)
      && (needle.is_empty()
        || matches_search(task, &needle));

    trace!(view = ?self.view, id = %task.id, ok, "task query evaluation");
    ok
  }

  #[tracing::instrument(skip(
    self, predicates, tasks
  ))]
  pub fn apply(
    &self,
    predicates: &Predicates,
    tasks: &[Task]
  ) -> Vec<Task> {
    tasks
      .iter()
      .filter(|task| {
        self.matches(predicates, task)
      })
      .cloned()
      .collect()
  }
}

#[derive(
  Debug, Clone, Default, PartialEq, Eq,
)]
pub struct DerivedCounts {
  pub all:              usize,
  pub pending:          usize,
  pub source:           usize,
  pub recent_completed: usize,
  pub today:            usize,
  pub by_status:
    BTreeMap<Status, usize>
}

impl DerivedCounts {
  pub fn compute(
    predicates: &Predicates,
    tasks: &[Task]
  ) -> Self {
    let mut counts = Self::default();
    for task in tasks {
      if predicates.all(task) {
        counts.all += 1;
      }
      if predicates.pending(task) {
        counts.pending += 1;
      }
      if predicates.source_tasks(task) {
        counts.source += 1;
      }
      if predicates
        .recent_completed(task)
      {
        counts.recent_completed += 1;
      }
      if predicates.today(task) {
        counts.today += 1;
      }
      *counts
        .by_status
        .entry(task.status)
        .or_insert(0) += 1;
    }
    counts
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    Duration,
    TimeZone,
    Utc
  };
  use proptest::prelude::*;

  use super::{
    DerivedCounts,
    Predicates,
    ProjectFilter,
    TaskQuery,
    TaskView,
    filter_tasks_by_search_term,
    should_include_task_by_project
  };
  use crate::task::{
    Status,
    Task
  };

  fn task_in(
    title: &str,
    status: Status,
    project: &str
  ) -> Task {
    let now = Utc
      .with_ymd_and_hms(
        2025, 1, 1, 0, 0, 0
      )
      .unwrap();
    let mut task =
      Task::new(title, status, now);
    task.project = project.to_string();
    task
  }

  #[test]
  fn all_and_pending_hide_completed_work()
  {
    let now = Utc::now();
    let preds =
      Predicates::with_default_threshold(
        now
      );
    for status in Status::ALL {
      let task =
        task_in("t", status, "");
      let expected = !matches!(
        status,
        Status::Done | Status::Reviewed
      );
      assert_eq!(
        preds.all(&task),
        expected
      );
      assert_eq!(
        preds.pending(&task),
        expected
      );
    }
  }

  #[test]
  fn source_tasks_are_backlog_and_brainstorm()
   {
    let preds =
      Predicates::with_default_threshold(
        Utc::now()
      );
    let hits: Vec<Status> = Status::ALL
      .into_iter()
      .filter(|status| {
        preds.source_tasks(&task_in(
          "t", *status, ""
        ))
      })
      .collect();
    assert_eq!(hits, vec![
      Status::Brainstorm,
      Status::Backlog
    ]);
  }

  #[test]
  fn recent_completed_uses_threshold() {
    let now = Utc
      .with_ymd_and_hms(
        2025, 1, 10, 12, 0, 0
      )
      .unwrap();
    let preds = Predicates::new(
      Duration::days(2),
      now
    );

    let mut fresh =
      task_in("fresh", Status::Done, "");
    fresh.completed_at =
      Some(now - Duration::hours(47));
    let mut stale = fresh.clone();
    stale.completed_at =
      Some(now - Duration::hours(49));
    let mut boundary = fresh.clone();
    boundary.completed_at =
      Some(now - Duration::hours(48));
    let mut undated = fresh.clone();
    undated.completed_at = None;
    let mut reopened = fresh.clone();
    reopened.status = Status::Todo;

    assert!(
      preds.recent_completed(&fresh)
    );
    assert!(
      !preds.recent_completed(&stale)
    );
    assert!(
      !preds.recent_completed(&boundary)
    );
    assert!(
      !preds.recent_completed(&undated)
    );
    assert!(
      !preds.recent_completed(&reopened)
    );
  }

  #[test]
  fn today_is_starred_regardless_of_status()
   {
    let preds =
      Predicates::with_default_threshold(
        Utc::now()
      );
    let mut done = task_in(
      "done",
      Status::Reviewed,
      ""
    );
    done.starred = true;
    assert!(preds.today(&done));
    assert!(!preds.today(&task_in(
      "plain",
      Status::Todo,
      ""
    )));
  }

  #[test]
  fn project_filter_forms() {
    let task =
      task_in("t", Status::Todo, "project1");
    let listed: ProjectFilter =
      "project1,project3".parse().unwrap();
    assert_eq!(
      listed,
      ProjectFilter::Any(vec![
        "project1".to_string(),
        "project3".to_string()
      ])
    );
    assert!(
      should_include_task_by_project(
        &task, &listed
      )
    );
    assert!(
      !should_include_task_by_project(
        &task,
        &ProjectFilter::Unassigned
      )
    );
    assert!(
      should_include_task_by_project(
        &task_in("t", Status::Todo, ""),
        &ProjectFilter::Unassigned
      )
    );
    assert!(
      should_include_task_by_project(
        &task,
        &"all".parse().unwrap()
      )
    );
    assert!(
      !should_include_task_by_project(
        &task,
        &ProjectFilter::One(
          "project2".to_string()
        )
      )
    );
  }

  #[test]
  fn search_hits_every_indexed_field() {
    let mut task = task_in(
      "Write Report",
      Status::Todo,
      "Apollo"
    );
    task.description =
      "quarterly numbers".to_string();
    task.initiative =
      Some("Growth".to_string());
    task.tags =
      vec!["Finance".to_string()];
    let tasks = vec![task.clone()];

    for term in [
      "report", "QUARTERLY", "apollo",
      "growth", "finance"
    ] {
      assert_eq!(
        filter_tasks_by_search_term(
          &tasks, term
        )
        .len(),
        1,
        "term {term}"
      );
    }
    let id_prefix = task.id[..8]
      .to_uppercase();
    assert_eq!(
      filter_tasks_by_search_term(
        &tasks, &id_prefix
      )
      .len(),
      1
    );
    assert!(
      filter_tasks_by_search_term(
        &tasks, "missing"
      )
      .is_empty()
    );
  }

  #[test]
  fn blank_search_is_identity() {
    let tasks = vec![
      task_in("a", Status::Todo, ""),
      task_in("b", Status::Done, "x"),
    ];
    assert_eq!(
      filter_tasks_by_search_term(
        &tasks, ""
      ),
      tasks
    );
    assert_eq!(
      filter_tasks_by_search_term(
        &tasks, "   "
      ),
      tasks
    );
  }

  #[test]
  fn query_composes_with_and() {
    let preds =
      Predicates::with_default_threshold(
        Utc::now()
      );
    let tasks = vec![
      task_in("alpha", Status::Todo, "p1"),
      task_in("alpha", Status::Done, "p1"),
      task_in("alpha", Status::Todo, "p2"),
      task_in("beta", Status::Todo, "p1"),
    ];
    let query = TaskQuery {
      view:    TaskView::Pending,
      project: ProjectFilter::One(
        "p1".to_string()
      ),
      search:  "alp".to_string()
    };
    let hits = query.apply(&preds, &tasks);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, tasks[0].id);
  }

  #[test]
  fn views_parse_from_text() {
    assert_eq!(
      "today".parse::<TaskView>().unwrap(),
      TaskView::Today
    );
    assert_eq!(
      "status:on-hold"
        .parse::<TaskView>()
        .unwrap(),
      TaskView::Status(Status::OnHold)
    );
    assert_eq!(
      "maybe".parse::<TaskView>().unwrap(),
      TaskView::Status(Status::Maybe)
    );
    assert!(
      "whenever"
        .parse::<TaskView>()
        .is_err()
    );
  }

  #[test]
  fn counts_cover_every_bucket() {
    let now = Utc::now();
    let preds =
      Predicates::with_default_threshold(
        now
      );
    let mut done =
      task_in("d", Status::Done, "");
    done.completed_at = Some(now);
    let mut starred =
      task_in("s", Status::Backlog, "");
    starred.starred = true;
    let tasks = vec![
      done,
      starred,
      task_in("t", Status::Todo, ""),
    ];

    let counts =
      DerivedCounts::compute(&preds, &tasks);
    assert_eq!(counts.all, 2);
    assert_eq!(counts.pending, 2);
    assert_eq!(counts.source, 1);
    assert_eq!(
      counts.recent_completed,
      1
    );
    assert_eq!(counts.today, 1);
    assert_eq!(
      counts.by_status[&Status::Todo],
      1
    );
  }

  fn any_status() -> impl Strategy<Value = Status>
  {
    (0..Status::ALL.len())
      .prop_map(|idx| Status::ALL[idx])
  }

  proptest! {
    #[test]
    fn all_equals_pending(status in any_status(), starred in any::<bool>()) {
      let preds = Predicates::with_default_threshold(Utc::now());
      let mut task = task_in("p", status, "");
      task.starred = starred;
      prop_assert_eq!(preds.all(&task), preds.pending(&task));
    }
  }
}
