use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::format_local;
use crate::filter::DerivedCounts;
use crate::task::{Initiative, Item, ItemKind, ItemStatus, Kpi, Priority, Project, Status, Task};
use crate::terminology::Terminology;
use crate::workflow::action_label;

const SHORT_ID_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    terms: Terminology,
}

impl Renderer {
    pub fn new(cfg: &Config, terms: Terminology) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color, terms })
    }

    pub fn terms(&self) -> &Terminology {
        &self.terms
    }

    /// Task table; the action column mirrors the commands panel preference.
    #[tracing::instrument(skip(self, tasks, now))]
    pub fn print_task_table(
        &mut self,
        tasks: &[Task],
        show_actions: bool,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        if tasks.is_empty() {
            writeln!(out, "No {}.", self.terms.items.to_lowercase())?;
            return Ok(());
        }

        let mut headers = vec![
            "ID".to_string(),
            " ".to_string(),
            "Status".to_string(),
            "Pri".to_string(),
            self.terms.project.clone(),
            self.terms.item.clone(),
            "Tags".to_string(),
            "Updated".to_string(),
        ];
        if show_actions {
            headers.push("Next".to_string());
        }

        let mut rows = Vec::with_capacity(tasks.len());
        for task in tasks {
            let id = self.paint(short_id(&task.id), "33");
            let star = if task.starred {
                self.paint("*", "93")
            } else {
                String::new()
            };
            let status = self.paint(task.status.as_str(), status_color(task.status));
            let priority = match task.priority {
                Priority::High => self.paint("H", "31"),
                Priority::Medium => "M".to_string(),
                Priority::Low => "L".to_string(),
            };
            let tags = task
                .tags
                .iter()
                .map(|tag| format!("+{tag}"))
                .collect::<Vec<_>>()
                .join(" ");
            let updated = relative_age(task.updated_at, now);

            let mut row = vec![
                id,
                star,
                status,
                priority,
                task.project.clone(),
                task.title.clone(),
                tags,
                updated,
            ];
            if show_actions {
                row.push(action_label(task.status).to_string());
            }
            rows.push(row);
        }

        write_table(&mut out, headers, rows)?;
        writeln!(out)?;
        writeln!(out, "{} {}", tasks.len(), self.terms.items.to_lowercase())?;
        Ok(())
    }

    #[tracing::instrument(skip(self, task))]
    pub fn print_task_info(&mut self, task: &Task) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "title       {}", task.title)?;
        if !task.description.is_empty() {
            writeln!(out, "description {}", task.description)?;
        }
        writeln!(
            out,
            "status      {} (next: {})",
            task.status,
            action_label(task.status)
        )?;
        writeln!(out, "priority    {}", task.priority)?;
        writeln!(out, "{:<11} {}", self.terms.project.to_lowercase(), task.project)?;
        if let Some(initiative) = &task.initiative {
            writeln!(
                out,
                "{:<11} {}",
                self.terms.initiative.to_lowercase(),
                initiative
            )?;
        }
        writeln!(out, "tags        {}", task.tags.join(", "))?;
        writeln!(out, "starred     {}", if task.starred { "yes" } else { "no" })?;
        writeln!(out, "created     {}", format_local(task.created_at))?;
        writeln!(out, "updated     {}", format_local(task.updated_at))?;
        if let Some(completed) = task.completed_at {
            writeln!(out, "completed   {}", format_local(completed))?;
        }

        for kind in [ItemKind::Requirement, ItemKind::Plan, ItemKind::NextStep] {
            let items = task.items(kind);
            if items.is_empty() {
                continue;
            }
            writeln!(out)?;
            writeln!(out, "{}:", kind.field_name())?;
            for item in items {
                writeln!(out, "  {}", self.item_line(item))?;
            }
        }

        Ok(())
    }

    pub fn print_counts(&mut self, counts: &DerivedCounts) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = vec!["View".to_string(), "Count".to_string()];
        let mut rows = vec![
            vec!["all".to_string(), counts.all.to_string()],
            vec!["pending".to_string(), counts.pending.to_string()],
            vec!["source".to_string(), counts.source.to_string()],
            vec![
                "recent completed".to_string(),
                counts.recent_completed.to_string(),
            ],
            vec!["today".to_string(), counts.today.to_string()],
        ];
        for status in Status::ALL {
            let count = counts.by_status.get(&status).copied().unwrap_or(0);
            rows.push(vec![format!("  {status}"), count.to_string()]);
        }
        write_table(&mut out, headers, rows)
    }

    pub fn print_projects(&mut self, projects: &[Project]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        for project in projects {
            writeln!(out, "{}", project.name)?;
        }
        Ok(())
    }

    pub fn print_initiatives(&mut self, initiatives: &[Initiative]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if initiatives.is_empty() {
            writeln!(out, "No {}s.", self.terms.initiative.to_lowercase())?;
            return Ok(());
        }
        let headers = vec![
            "ID".to_string(),
            self.terms.initiative.clone(),
            self.terms.project.clone(),
            "Created".to_string(),
        ];
        let rows = initiatives
            .iter()
            .map(|initiative| {
                vec![
                    self.paint(short_id(&initiative.id), "33"),
                    initiative.name.clone(),
                    initiative.project.clone(),
                    format_local(initiative.created_at),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    pub fn print_kpis(&mut self, kpis: &[Kpi]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = vec!["KPI".to_string(), "Value".to_string(), "Target".to_string()];
        let rows = kpis
            .iter()
            .map(|kpi| {
                let unit = kpi.unit.as_deref().unwrap_or("");
                let value = format!("{}{unit}", kpi.value);
                let target = kpi
                    .target
                    .map(|target| format!("{target}{unit}"))
                    .unwrap_or_default();
                let value = match kpi.target {
                    Some(target) if kpi.value < target => self.paint(&value, "31"),
                    Some(_) => self.paint(&value, "32"),
                    None => value,
                };
                vec![kpi.name.clone(), value, target]
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    fn item_line(&self, item: &Item) -> String {
        let marker = match item.status {
            ItemStatus::Proposed => self.paint("?", "33"),
            ItemStatus::Approved => self.paint("+", "32"),
            ItemStatus::Vetoed => self.paint("x", "31"),
        };
        format!("[{marker}] {} {}", short_id(&item.id), item.content)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_LEN) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

fn status_color(status: Status) -> &'static str {
    match status {
        Status::InProgress => "36",
        Status::Done | Status::Reviewed => "32",
        Status::OnHold => "35",
        Status::Archived => "90",
        _ => "0",
    }
}

fn relative_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now.signed_duration_since(at);
    if age.num_minutes() < 1 {
        "now".to_string()
    } else if age.num_hours() < 1 {
        format!("{}m", age.num_minutes())
    } else if age.num_days() < 1 {
        format!("{}h", age.num_hours())
    } else if age.num_days() < 60 {
        format!("{}d", age.num_days())
    } else {
        format_local(at)
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
