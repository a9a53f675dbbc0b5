use std::collections::{
  BTreeMap,
  HashMap
};
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::str::FromStr;

use anyhow::{
  Context,
  anyhow
};
use chrono::Duration;
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::filter::DEFAULT_RECENT_DAYS;

const DEFAULTS: &[(&str, &str)] = &[
  ("data.location", "~/.trellis"),
  ("recent.days", "2"),
  ("poll.seconds", "30"),
  ("business.case", "tasks"),
  ("sort.option", "created"),
  ("sort.direction", "desc"),
  ("color", "on"),
  ("default.command", "list")
];

#[derive(Debug, Clone)]
pub struct Config {
  map:              HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    Self {
      map:          DEFAULTS
        .iter()
        .map(|(k, v)| {
          (k.to_string(), v.to_string())
        })
        .collect(),
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(
      rc_override
    )?;
    if let Some(path) = rc {
      info!(trellisrc = %path.display(), "loading trellisrc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no trellisrc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  /// Parses a key with `FromStr`; a bad value is an error, not a default.
  pub fn get_parsed<T>(
    &self,
    key: &str
  ) -> anyhow::Result<Option<T>>
  where
    T: FromStr,
    T::Err: std::fmt::Display
  {
    match self.map.get(key) {
      | None => Ok(None),
      | Some(raw) => {
        raw
          .trim()
          .parse::<T>()
          .map(Some)
          .map_err(|err| {
            anyhow!(
              "invalid value for \
               {key}: {raw} ({err})"
            )
          })
      }
    }
  }

  /// All keys under `prefix.`, with the prefix removed.
  pub fn section(
    &self,
    prefix: &str
  ) -> BTreeMap<String, String> {
    let lead = format!("{prefix}.");
    self
      .map
      .iter()
      .filter_map(|(k, v)| {
        k.strip_prefix(&lead).map(
          |rest| {
            (
              rest.to_string(),
              v.clone()
            )
          }
        )
      })
      .collect()
  }

  /// How long finished tasks stay in the
  /// recent view. Negative or overflowing
  /// day counts are rejected.
  pub fn recent_threshold(
    &self
  ) -> anyhow::Result<Duration> {
    let days = self
      .get_parsed::<i64>("recent.days")?
      .unwrap_or(DEFAULT_RECENT_DAYS);
    if days < 0 {
      return Err(anyhow!(
        "invalid value for recent.days: \
         {days} (must not be negative)"
      ));
    }
    Duration::try_days(days).ok_or_else(
      || {
        anyhow!(
          "invalid value for recent.days: \
           {days} (out of range)"
        )
      }
    )
  }

  pub fn api_url(
    &self
  ) -> Option<String> {
    self
      .get("api.url")
      .map(|url| url.trim().to_string())
      .filter(|url| !url.is_empty())
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var("TRELLISRC")
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping trellisrc"
    );
    return Ok(None);
  };
  let candidate =
    home.join(".trellisrc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".trellis"))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::tempdir;

  use super::Config;

  #[test]
  fn rc_file_includes_and_overrides_layer() {
    let temp = tempdir().unwrap();
    let extra = temp.path().join("terms.rc");
    fs::write(
      &extra,
      "terms.items = Tickets\n"
    )
    .unwrap();

    let rc = temp.path().join("trellisrc");
    fs::write(
      &rc,
      "# board\napi.url = http://localhost:8080/api  # remote\nrecent.days=5\ninclude terms.rc\n"
    )
    .unwrap();

    let mut cfg =
      Config::load(Some(&rc)).unwrap();
    cfg.apply_overrides(vec![(
      "rc.recent.days".to_string(),
      "7".to_string()
    )]);

    assert_eq!(
      cfg.api_url().as_deref(),
      Some("http://localhost:8080/api")
    );
    assert_eq!(
      cfg
        .get_parsed::<i64>("recent.days")
        .unwrap(),
      Some(7)
    );
    assert_eq!(
      cfg
        .section("terms")
        .get("items")
        .map(String::as_str),
      Some("Tickets")
    );
    assert_eq!(cfg.loaded_files.len(), 2);
  }

  #[test]
  fn defaults_cover_known_keys() {
    let cfg = Config::default();
    assert_eq!(
      cfg.get("default.command").as_deref(),
      Some("list")
    );
    assert_eq!(
      cfg
        .get_parsed::<u64>("poll.seconds")
        .unwrap(),
      Some(30)
    );
    assert_eq!(cfg.get_bool("color"), Some(true));
    assert!(cfg.api_url().is_none());
  }

  #[test]
  fn bad_number_is_reported() {
    let mut cfg = Config::default();
    cfg.apply_overrides(vec![(
      "poll.seconds".to_string(),
      "soon".to_string()
    )]);
    assert!(
      cfg
        .get_parsed::<u64>("poll.seconds")
        .is_err()
    );
  }

  #[test]
  fn recent_threshold_is_bounded() {
    let mut cfg = Config::default();
    assert_eq!(
      cfg.recent_threshold().unwrap(),
      chrono::Duration::days(2)
    );

    for bad in ["-1", "99999999999999"] {
      cfg.apply_overrides(vec![(
        "rc.recent.days".to_string(),
        bad.to_string()
      )]);
      let err = cfg
        .recent_threshold()
        .unwrap_err();
      assert!(
        err
          .to_string()
          .contains("recent.days")
      );
    }
  }

  #[test]
  fn malformed_line_is_an_error() {
    let temp = tempdir().unwrap();
    let rc = temp.path().join("trellisrc");
    fs::write(&rc, "just words\n")
      .unwrap();
    assert!(Config::load(Some(&rc)).is_err());
  }
}
