use std::collections::BTreeSet;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info, trace};

use crate::api::{ApiResult, TaskApi, TaskPatch};
use crate::error::ApiError;
use crate::task::{Initiative, Kpi, Project, Task};

/// Local document store: one JSONL file per collection.
#[derive(Debug)]
pub struct DocumentStore {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
    pub initiatives_path: PathBuf,
    pub projects_path: PathBuf,
    pub kpis_path: PathBuf,
    write_lock: Mutex<()>,
}

impl DocumentStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let tasks_path = data_dir.join("tasks.data");
        let initiatives_path = data_dir.join("initiatives.data");
        let projects_path = data_dir.join("projects.data");
        let kpis_path = data_dir.join("kpis.data");

        for path in [&tasks_path, &initiatives_path, &projects_path, &kpis_path] {
            if !path.exists() {
                fs::write(path, "")?;
            }
        }

        info!(
            data_dir = %data_dir.display(),
            tasks = %tasks_path.display(),
            initiatives = %initiatives_path.display(),
            "opened document store"
        );

        Ok(Self {
            data_dir,
            tasks_path,
            initiatives_path,
            projects_path,
            kpis_path,
            write_lock: Mutex::new(()),
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn load_tasks(&self) -> anyhow::Result<Vec<Task>> {
        load_jsonl(&self.tasks_path).context("failed to load tasks.data")
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn save_tasks(&self, tasks: &[Task]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.tasks_path, tasks).context("failed to save tasks.data")
    }

    #[tracing::instrument(skip(self))]
    pub fn load_initiatives(&self) -> anyhow::Result<Vec<Initiative>> {
        load_jsonl(&self.initiatives_path).context("failed to load initiatives.data")
    }

    #[tracing::instrument(skip(self, initiatives))]
    pub fn save_initiatives(&self, initiatives: &[Initiative]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.initiatives_path, initiatives)
            .context("failed to save initiatives.data")
    }

    #[tracing::instrument(skip(self, kpis))]
    pub fn save_kpis(&self, kpis: &[Kpi]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.kpis_path, kpis).context("failed to save kpis.data")
    }

    /// Declared projects first, then any project name only seen on tasks.
    #[tracing::instrument(skip(self))]
    pub fn load_projects(&self) -> anyhow::Result<Vec<Project>> {
        let mut projects: Vec<Project> =
            load_jsonl(&self.projects_path).context("failed to load projects.data")?;
        let mut known: BTreeSet<String> = projects.iter().map(|p| p.name.clone()).collect();

        let task_projects: BTreeSet<String> = self
            .load_tasks()?
            .into_iter()
            .map(|task| task.project)
            .filter(|project| !project.is_empty())
            .collect();
        for name in task_projects {
            if known.insert(name.clone()) {
                projects.push(Project {
                    id: name.clone(),
                    name,
                });
            }
        }
        Ok(projects)
    }

    fn mutate_tasks<T>(
        &self,
        op: impl FnOnce(&mut Vec<Task>) -> ApiResult<T>,
    ) -> ApiResult<T> {
        let _guard = self.write_lock.lock();
        let mut tasks = self.load_tasks()?;
        let out = op(&mut tasks)?;
        self.save_tasks(&tasks)?;
        Ok(out)
    }
}

#[async_trait]
impl TaskApi for DocumentStore {
    async fn list_tasks(&self) -> ApiResult<Vec<Task>> {
        Ok(self.load_tasks()?)
    }

    async fn get_task(&self, id: &str) -> ApiResult<Task> {
        self.load_tasks()?
            .into_iter()
            .find(|task| task.id == id)
            .ok_or_else(|| ApiError::not_found("task", id))
    }

    #[tracing::instrument(skip(self, task), fields(id = %task.id))]
    async fn create_task(&self, task: &Task) -> ApiResult<Task> {
        self.mutate_tasks(|tasks| {
            if tasks.iter().any(|existing| existing.id == task.id) {
                return Err(ApiError::Status {
                    status: 409,
                    message: format!("task {} already exists", task.id),
                });
            }
            tasks.push(task.clone());
            debug!(count = tasks.len(), "task stored");
            Ok(task.clone())
        })
    }

    #[tracing::instrument(skip(self, patch))]
    async fn update_task(&self, id: &str, project: &str, patch: &TaskPatch) -> ApiResult<Task> {
        self.mutate_tasks(|tasks| {
            let task = tasks
                .iter_mut()
                .find(|task| task.id == id)
                .ok_or_else(|| ApiError::not_found("task", id))?;
            if task.project != project {
                trace!(stored = %task.project, "update addressed a different project partition");
            }
            patch.apply_to(task)?;
            Ok(task.clone())
        })
    }

    #[tracing::instrument(skip(self))]
    async fn delete_task(&self, id: &str, project: &str) -> ApiResult<()> {
        self.mutate_tasks(|tasks| {
            let before = tasks.len();
            tasks.retain(|task| task.id != id);
            if tasks.len() == before {
                return Err(ApiError::not_found("task", id));
            }
            info!(id, project, "task deleted");
            Ok(())
        })
    }

    async fn list_initiatives(&self) -> ApiResult<Vec<Initiative>> {
        Ok(self.load_initiatives()?)
    }

    #[tracing::instrument(skip(self, initiative), fields(id = %initiative.id))]
    async fn create_initiative(&self, initiative: &Initiative) -> ApiResult<Initiative> {
        let _guard = self.write_lock.lock();
        let mut initiatives = self.load_initiatives()?;
        if initiatives.iter().any(|existing| existing.id == initiative.id) {
            return Err(ApiError::Status {
                status: 409,
                message: format!("initiative {} already exists", initiative.id),
            });
        }
        initiatives.push(initiative.clone());
        self.save_initiatives(&initiatives)?;
        Ok(initiative.clone())
    }

    async fn list_projects(&self) -> ApiResult<Vec<Project>> {
        Ok(self.load_projects()?)
    }

    async fn list_kpis(&self) -> ApiResult<Vec<Kpi>> {
        Ok(load_jsonl(&self.kpis_path).context("failed to load kpis.data")?)
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    debug!(file = %path.display(), "loading jsonl");
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let record: T = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(record);
    }

    debug!(count = out.len(), "loaded records from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, records))]
fn save_jsonl_atomic<T: Serialize>(path: &Path, records: &[T]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = records.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for record in records {
        let serialized = serde_json::to_string(record)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
