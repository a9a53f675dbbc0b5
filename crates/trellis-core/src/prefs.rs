//! Small string preferences the front end remembers between runs.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Last project chosen in the add form.
pub const LAST_PROJECT_KEY: &str = "taskForm_lastProject";
/// Whether the action column is shown.
pub const COMMANDS_VISIBILITY_KEY: &str = "task_commands_visibility";

pub trait PreferenceStore {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;

    fn remove(&mut self, key: &str) -> anyhow::Result<()>;

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).map(|value| value == "true")
    }

    fn set_bool(&mut self, key: &str, value: bool) -> anyhow::Result<()> {
        self.set(key, if value { "true" } else { "false" })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryPreferences {
    values: BTreeMap<String, String>,
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        self.values.remove(key);
        Ok(())
    }
}

/// JSON object on disk, rewritten atomically on every change.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FilePreferences {
    #[tracing::instrument(skip(path))]
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let values = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed reading {}", path.display()))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                match serde_json::from_str(&raw) {
                    Ok(values) => values,
                    Err(err) => {
                        warn!(file = %path.display(), error = %err, "discarding unreadable preferences");
                        BTreeMap::new()
                    }
                }
            }
        } else {
            BTreeMap::new()
        };

        debug!(file = %path.display(), count = values.len(), "loaded preferences");
        Ok(Self {
            path: path.to_path_buf(),
            values,
        })
    }

    fn save(&self) -> anyhow::Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut temp = NamedTempFile::new_in(dir)?;
        let serialized = serde_json::to_string_pretty(&self.values)?;
        temp.write_all(serialized.as_bytes())?;
        temp.flush()?;
        temp.persist(&self.path)
            .map_err(|err| anyhow!("failed to persist {}: {}", self.path.display(), err))?;
        Ok(())
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        self.save()
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        if self.values.remove(key).is_some() {
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::{
        COMMANDS_VISIBILITY_KEY, FilePreferences, LAST_PROJECT_KEY, MemoryPreferences,
        PreferenceStore,
    };

    #[test]
    fn file_preferences_survive_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("prefs.json");

        let mut prefs = FilePreferences::open(&path).unwrap();
        prefs.set(LAST_PROJECT_KEY, "apollo").unwrap();
        prefs.set_bool(COMMANDS_VISIBILITY_KEY, false).unwrap();

        let reopened = FilePreferences::open(&path).unwrap();
        assert_eq!(reopened.get(LAST_PROJECT_KEY).as_deref(), Some("apollo"));
        assert_eq!(reopened.get_bool(COMMANDS_VISIBILITY_KEY), Some(false));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("prefs.json");
        std::fs::write(&path, "{not json").unwrap();

        let prefs = FilePreferences::open(&path).unwrap();
        assert!(prefs.get(LAST_PROJECT_KEY).is_none());
    }

    #[test]
    fn memory_preferences_remove() {
        let mut prefs = MemoryPreferences::default();
        prefs.set(LAST_PROJECT_KEY, "x").unwrap();
        prefs.remove(LAST_PROJECT_KEY).unwrap();
        assert!(prefs.get(LAST_PROJECT_KEY).is_none());
    }
}
