use std::io::{self, BufRead, IsTerminal, Write};
use std::time::Duration as StdDuration;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::api::{InitiativeCreate, TaskApi};
use crate::board::{Confirm, Deletion, TaskBoard, TaskForm};
use crate::cli::Invocation;
use crate::config::Config;
use crate::datetime::format_local;
use crate::filter::{Predicates, TaskQuery, TaskView};
use crate::poll::{DEFAULT_POLL_SECONDS, Poller};
use crate::prefs::{COMMANDS_VISIBILITY_KEY, LAST_PROJECT_KEY, PreferenceStore};
use crate::render::{Renderer, short_id};
use crate::sort::{SortDirection, SortOption, dedupe_tasks, sort_tasks};
use crate::task::{ItemKind, Priority, Status, Task};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "list",
        "add",
        "show",
        "advance",
        "retreat",
        "status",
        "archive",
        "reopen",
        "star",
        "unstar",
        "propose",
        "approve",
        "veto",
        "delete",
        "counts",
        "projects",
        "initiatives",
        "initiative-add",
        "kpis",
        "watch",
        "commands",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(board, prefs, cfg, renderer, inv))]
pub async fn dispatch<A: TaskApi>(
    board: &mut TaskBoard<A>,
    prefs: &mut dyn PreferenceStore,
    cfg: &Config,
    renderer: &mut Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let command = inv.command.as_str();
    let args = inv.all_args();

    debug!(
        command,
        targets = ?inv.targets,
        args = ?inv.command_args,
        "dispatching command"
    );

    match command {
        "list" => cmd_list(board, &*prefs, cfg, renderer, &args, now).await,
        "add" => cmd_add(board, prefs, renderer, &args, now).await,
        "show" => cmd_show(board, renderer, &args).await,
        "advance" => cmd_step(board, &args, Step::Advance, now).await,
        "retreat" => cmd_step(board, &args, Step::Retreat, now).await,
        "status" => cmd_status(board, &args, now).await,
        "archive" => cmd_step(board, &args, Step::Archive, now).await,
        "reopen" => cmd_step(board, &args, Step::Reopen, now).await,
        "star" => cmd_step(board, &args, Step::Star(true), now).await,
        "unstar" => cmd_step(board, &args, Step::Star(false), now).await,
        "propose" => cmd_propose(board, &args, now).await,
        "approve" => cmd_review_item(board, &args, true, now).await,
        "veto" => cmd_review_item(board, &args, false, now).await,
        "delete" => cmd_delete(board, &args).await,
        "counts" => cmd_counts(board, renderer, now).await,
        "projects" => {
            let projects = board.projects().await?;
            renderer.print_projects(&projects)
        }
        "initiatives" => {
            board.refresh_initiatives().await?;
            renderer.print_initiatives(board.initiatives())
        }
        "initiative-add" => cmd_initiative_add(board, &*prefs, renderer, &args, now).await,
        "kpis" => {
            let kpis = board.kpis().await?;
            renderer.print_kpis(&kpis)
        }
        "watch" => cmd_watch(board, &*prefs, cfg, renderer, &args).await,
        "commands" => cmd_commands(prefs, &args),
        "help" => cmd_help(renderer),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

/// View, sort and search terms shared by `list` and `watch tasks`.
#[derive(Debug, Clone, Default)]
struct ListArgs {
    query: TaskQuery,
    sort: SortOption,
    direction: SortDirection,
}

fn parse_list_args(cfg: &Config, args: &[String]) -> anyhow::Result<ListArgs> {
    let mut list = ListArgs {
        sort: cfg.get_parsed("sort.option")?.unwrap_or_default(),
        direction: cfg.get_parsed("sort.direction")?.unwrap_or_default(),
        ..ListArgs::default()
    };
    let mut words = Vec::new();

    for arg in args {
        let Some((key, value)) = arg.split_once(':') else {
            words.push(arg.clone());
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "view" | "v" => list.query.view = value.parse()?,
            "status" => list.query.view = TaskView::Status(value.parse()?),
            "project" | "pro" => list.query.project = value.parse()?,
            "sort" => list.sort = value.parse()?,
            "dir" | "direction" => list.direction = value.parse()?,
            _ => words.push(arg.clone()),
        }
    }

    list.query.search = words.join(" ");
    Ok(list)
}

fn render_list(
    renderer: &mut Renderer,
    predicates: &Predicates,
    list: &ListArgs,
    tasks: &[Task],
    show_actions: bool,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let unique = dedupe_tasks(tasks);
    let matching = list.query.apply(predicates, &unique);
    let rows = sort_tasks(&matching, list.sort, list.direction);
    renderer.print_task_table(&rows, show_actions, now)
}

fn commands_visible(prefs: &dyn PreferenceStore) -> bool {
    prefs.get_bool(COMMANDS_VISIBILITY_KEY).unwrap_or(true)
}

#[instrument(skip(board, prefs, cfg, renderer, args, now))]
async fn cmd_list<A: TaskApi>(
    board: &mut TaskBoard<A>,
    prefs: &dyn PreferenceStore,
    cfg: &Config,
    renderer: &mut Renderer,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command list");

    let list = parse_list_args(cfg, args)?;
    board.refresh().await.context("failed to fetch tasks")?;
    let rows = board.visible(&list.query, list.sort, list.direction, now);
    renderer.print_task_table(&rows, commands_visible(prefs), now)
}

fn parse_task_form(args: &[String]) -> anyhow::Result<TaskForm> {
    let mut form = TaskForm::default();
    let mut title = Vec::new();
    let mut literal = false;

    for arg in args {
        if arg == "--" {
            literal = true;
            continue;
        }
        if !literal {
            if let Some(tag) = arg.strip_prefix('+')
                && !tag.is_empty()
            {
                form.tags.push(tag.to_string());
                continue;
            }
            if let Some((key, value)) = arg.split_once(':') {
                match key.to_ascii_lowercase().as_str() {
                    "project" | "pro" => {
                        form.project = value.to_string();
                        continue;
                    }
                    "pri" | "priority" => {
                        form.priority = value.parse::<Priority>()?;
                        continue;
                    }
                    "status" => {
                        form.status = Some(value.parse::<Status>()?);
                        continue;
                    }
                    "initiative" => {
                        form.initiative = Some(value.to_string());
                        continue;
                    }
                    "desc" | "description" => {
                        form.description = value.to_string();
                        continue;
                    }
                    "starred" => {
                        form.starred = matches!(value, "yes" | "true" | "on" | "1");
                        continue;
                    }
                    _ => {}
                }
            }
        }
        title.push(arg.clone());
    }

    form.title = title.join(" ");
    Ok(form)
}

#[instrument(skip(board, prefs, renderer, args, now))]
async fn cmd_add<A: TaskApi>(
    board: &mut TaskBoard<A>,
    prefs: &mut dyn PreferenceStore,
    renderer: &Renderer,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command add");

    let mut form = parse_task_form(args)?;
    if form.project.trim().is_empty()
        && let Some(last) = prefs.get(LAST_PROJECT_KEY)
    {
        debug!(project = %last, "using last selected project");
        form.project = last;
    }

    let task = board.add_task(form, now).await?;
    if !task.project.is_empty() {
        prefs.set(LAST_PROJECT_KEY, &task.project)?;
    }

    println!(
        "Created {} {} ({}).",
        renderer.terms().item.to_lowercase(),
        short_id(&task.id),
        task.status
    );
    Ok(())
}

/// Refreshes, then resolves every id argument against the local list.
async fn resolve_targets<A: TaskApi>(
    board: &mut TaskBoard<A>,
    ids: &[String],
) -> anyhow::Result<Vec<String>> {
    if ids.is_empty() {
        return Err(anyhow!("a task id is required"));
    }
    board.refresh().await.context("failed to fetch tasks")?;
    ids.iter()
        .map(|id| board.resolve_id(id).map_err(anyhow::Error::from))
        .collect()
}

#[instrument(skip(board, renderer, args))]
async fn cmd_show<A: TaskApi>(
    board: &mut TaskBoard<A>,
    renderer: &mut Renderer,
    args: &[String],
) -> anyhow::Result<()> {
    for id in resolve_targets(board, args).await? {
        if let Some(task) = board.task(&id) {
            renderer.print_task_info(task)?;
            println!();
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Advance,
    Retreat,
    Archive,
    Reopen,
    Star(bool),
}

#[instrument(skip(board, args, now))]
async fn cmd_step<A: TaskApi>(
    board: &mut TaskBoard<A>,
    args: &[String],
    step: Step,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!(?step, "command step");

    let mut changed = 0_usize;
    for id in resolve_targets(board, args).await? {
        let before = board.task(&id).map(|task| task.status);
        let outcome = match step {
            Step::Advance => board.advance(&id, now).await?,
            Step::Retreat => board.retreat(&id, now).await?,
            Step::Archive => Some(board.archive(&id, now).await?),
            Step::Reopen => Some(board.reopen(&id, now).await?),
            Step::Star(starred) => Some(board.set_starred(&id, starred, now).await?),
        };

        match (outcome, before) {
            (Some(task), Some(before)) if before != task.status => {
                println!("{} {} -> {}", short_id(&id), before, task.status);
                changed += 1;
            }
            (Some(task), _) => {
                println!(
                    "{} {}",
                    short_id(&id),
                    if task.starred { "starred" } else { "unstarred" }
                );
                changed += 1;
            }
            (None, before) => {
                let status = before.map(|s| s.to_string()).unwrap_or_default();
                println!("{} no action available ({status})", short_id(&id));
            }
        }
    }

    debug!(changed, "step finished");
    Ok(())
}

#[instrument(skip(board, args, now))]
async fn cmd_status<A: TaskApi>(
    board: &mut TaskBoard<A>,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let [id, status] = args else {
        return Err(anyhow!("usage: trellis status <id> <status>"));
    };
    let status: Status = status.parse()?;
    let id = resolve_targets(board, std::slice::from_ref(id))
        .await?
        .remove(0);
    let project = board
        .task(&id)
        .map(|task| task.project.clone())
        .unwrap_or_default();

    let task = board.update_task_status(&id, &project, status, now).await?;
    println!("{} -> {}", short_id(&task.id), task.status);
    Ok(())
}

#[instrument(skip(board, args, now))]
async fn cmd_propose<A: TaskApi>(
    board: &mut TaskBoard<A>,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let [id, kind, content @ ..] = args else {
        return Err(anyhow!("usage: trellis propose <id> <requirement|plan|next-step> <text>"));
    };
    let kind: ItemKind = kind.parse()?;
    let id = resolve_targets(board, std::slice::from_ref(id))
        .await?
        .remove(0);

    let item = board.propose_item(&id, kind, &content.join(" "), now).await?;
    println!("Proposed {} {} on {}.", kind.field_name(), short_id(&item.id), short_id(&id));
    Ok(())
}

#[instrument(skip(board, args, now))]
async fn cmd_review_item<A: TaskApi>(
    board: &mut TaskBoard<A>,
    args: &[String],
    approve: bool,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let [id, kind, item] = args else {
        return Err(anyhow!("usage: trellis approve|veto <id> <requirement|plan|next-step> <item-id>"));
    };
    let kind: ItemKind = kind.parse()?;
    let id = resolve_targets(board, std::slice::from_ref(id))
        .await?
        .remove(0);

    let item_id = {
        let task = board
            .task(&id)
            .ok_or_else(|| anyhow!("task {id} disappeared during refresh"))?;
        let mut matches = task
            .items(kind)
            .iter()
            .filter(|candidate| candidate.id.starts_with(item.as_str()));
        match (matches.next(), matches.next()) {
            (Some(found), None) => found.id.clone(),
            (Some(_), Some(_)) => return Err(anyhow!("item id prefix {item} is ambiguous")),
            _ => return Err(anyhow!("no {} item {item} on task {}", kind.field_name(), short_id(&id))),
        }
    };

    let task = if approve {
        board.approve_item(&id, kind, &item_id, now).await?
    } else {
        board.veto_item(&id, kind, &item_id, now).await?
    };
    if let Some(updated) = task.items(kind).iter().find(|i| i.id == item_id) {
        println!("{} {:?}", short_id(&updated.id), updated.status);
    }
    Ok(())
}

/// Prompts on stdin unless `--yes` was given; never deletes when stdin is
/// not a terminal.
struct PromptConfirm {
    assume_yes: bool,
}

impl Confirm for PromptConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            warn!("stdin is not a terminal; pass --yes to delete non-interactively");
            return false;
        }

        print!("{prompt} (y/N) ");
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        if stdin.lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

#[instrument(skip(board, args))]
async fn cmd_delete<A: TaskApi>(board: &mut TaskBoard<A>, args: &[String]) -> anyhow::Result<()> {
    info!("command delete");

    let assume_yes = args.iter().any(|arg| arg == "--yes" || arg == "-y");
    let ids: Vec<String> = args
        .iter()
        .filter(|arg| *arg != "--yes" && *arg != "-y")
        .cloned()
        .collect();
    let confirm = PromptConfirm { assume_yes };

    let mut deleted = 0_u64;
    for id in resolve_targets(board, &ids).await? {
        let project = board
            .task(&id)
            .map(|task| task.project.clone())
            .unwrap_or_default();
        match board.delete_task(&id, &project, &confirm).await? {
            Deletion::Deleted => deleted += 1,
            Deletion::Declined => println!("Kept {}.", short_id(&id)),
        }
    }

    println!("Deleted {deleted} task(s).");
    Ok(())
}

async fn cmd_counts<A: TaskApi>(
    board: &mut TaskBoard<A>,
    renderer: &mut Renderer,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    board.refresh().await.context("failed to fetch tasks")?;
    renderer.print_counts(&board.counts(now))
}

#[instrument(skip(board, prefs, renderer, args, now))]
async fn cmd_initiative_add<A: TaskApi>(
    board: &mut TaskBoard<A>,
    prefs: &dyn PreferenceStore,
    renderer: &Renderer,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let mut form = InitiativeCreate::default();
    let mut name = Vec::new();
    for arg in args {
        match arg.split_once(':') {
            Some(("project" | "pro", value)) => form.project = value.to_string(),
            Some(("desc" | "description", value)) => form.description = value.to_string(),
            _ => name.push(arg.clone()),
        }
    }
    form.name = name.join(" ");
    if form.project.is_empty()
        && let Some(last) = prefs.get(LAST_PROJECT_KEY)
    {
        form.project = last;
    }

    let initiative = board.add_initiative(form, now).await?;
    println!(
        "Created {} {} ({}).",
        renderer.terms().initiative.to_lowercase(),
        short_id(&initiative.id),
        initiative.name
    );
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchTarget {
    Kpis,
    Initiatives,
    Tasks,
}

#[instrument(skip(board, prefs, cfg, renderer, args))]
async fn cmd_watch<A: TaskApi>(
    board: &TaskBoard<A>,
    prefs: &dyn PreferenceStore,
    cfg: &Config,
    renderer: &mut Renderer,
    args: &[String],
) -> anyhow::Result<()> {
    let mut rest = Vec::new();
    let mut target = WatchTarget::Kpis;
    let mut max_ticks = None;
    for arg in args {
        match arg.as_str() {
            "kpis" => target = WatchTarget::Kpis,
            "initiatives" => target = WatchTarget::Initiatives,
            "tasks" => target = WatchTarget::Tasks,
            other => match other.strip_prefix("count:") {
                Some(count) => {
                    max_ticks = Some(
                        count
                            .parse::<u64>()
                            .with_context(|| format!("invalid count: {count}"))?,
                    );
                }
                None => rest.push(arg.clone()),
            },
        }
    }

    let seconds = cfg
        .get_parsed::<u64>("poll.seconds")?
        .unwrap_or(DEFAULT_POLL_SECONDS)
        .max(1);
    let period = StdDuration::from_secs(seconds);
    info!(?target, seconds, "watching");

    let api = board.api();
    match target {
        WatchTarget::Kpis => {
            let mut poller = Poller::new(period);
            poller
                .run(
                    move || api.list_kpis(),
                    |kpis| {
                        print_stamp();
                        if let Err(err) = renderer.print_kpis(kpis) {
                            warn!(error = %err, "failed to render kpis");
                        }
                    },
                    max_ticks,
                )
                .await;
        }
        WatchTarget::Initiatives => {
            let mut poller = Poller::new(period);
            poller
                .run(
                    move || api.list_initiatives(),
                    |initiatives| {
                        print_stamp();
                        if let Err(err) = renderer.print_initiatives(initiatives) {
                            warn!(error = %err, "failed to render initiatives");
                        }
                    },
                    max_ticks,
                )
                .await;
        }
        WatchTarget::Tasks => {
            let list = parse_list_args(cfg, &rest)?;
            let show_actions = commands_visible(prefs);
            let mut poller = Poller::new(period);
            poller
                .run(
                    move || api.list_tasks(),
                    |tasks| {
                        let now = Utc::now();
                        print_stamp();
                        let predicates = board.predicates(now);
                        if let Err(err) =
                            render_list(renderer, &predicates, &list, tasks, show_actions, now)
                        {
                            warn!(error = %err, "failed to render tasks");
                        }
                    },
                    max_ticks,
                )
                .await;
        }
    }

    Ok(())
}

fn print_stamp() {
    println!("-- {} --", format_local(Utc::now()));
}

fn cmd_commands(prefs: &mut dyn PreferenceStore, args: &[String]) -> anyhow::Result<()> {
    let current = commands_visible(prefs);
    let next = match args.first().map(|arg| arg.to_ascii_lowercase()) {
        None => {
            println!("commands {}", if current { "shown" } else { "hidden" });
            return Ok(());
        }
        Some(arg) => match arg.as_str() {
            "on" | "show" => true,
            "off" | "hide" => false,
            "toggle" => !current,
            other => return Err(anyhow!("expected on, off or toggle, got: {other}")),
        },
    };

    prefs.set_bool(COMMANDS_VISIBILITY_KEY, next)?;
    println!("commands {}", if next { "shown" } else { "hidden" });
    Ok(())
}

fn cmd_help(renderer: &Renderer) -> anyhow::Result<()> {
    let terms = renderer.terms();
    let item = terms.item.to_lowercase();
    let lines = [
        ("list [view:V] [project:P] [sort:S] [dir:D] [words]", format!("show {}", terms.items.to_lowercase())),
        ("add <title> [project:P] [pri:H] [status:S] [+tag]", terms.add_action.clone()),
        ("show <id>", format!("{item} details")),
        ("advance|retreat <id>", "move along the workflow".to_string()),
        ("status <id> <status>", "set a status directly".to_string()),
        ("archive|reopen <id>", "archive finished work or reopen it".to_string()),
        ("star|unstar <id>", format!("mark a {item}")),
        ("propose <id> <kind> <text>", "propose a requirement, plan or next step".to_string()),
        ("approve|veto <id> <kind> <item>", "review a proposed item".to_string()),
        ("delete <id> [--yes]", format!("remove a {item}")),
        ("counts", "view counts".to_string()),
        ("projects", format!("list {}s", terms.project.to_lowercase())),
        ("initiatives", format!("list {}s", terms.initiative.to_lowercase())),
        ("initiative-add <name> [project:P]", format!("add an {}", terms.initiative.to_lowercase())),
        ("kpis", "show KPIs".to_string()),
        ("watch [kpis|initiatives|tasks] [count:N]", "poll and re-render".to_string()),
        ("commands [on|off|toggle]", "action column visibility".to_string()),
        ("version", "print version".to_string()),
    ];
    for (usage, about) in lines {
        println!("  {usage:<48} {about}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{expand_command_abbrev, known_command_names, parse_list_args, parse_task_form};
    use crate::config::Config;
    use crate::filter::{ProjectFilter, TaskView};
    use crate::sort::{SortDirection, SortOption};
    use crate::task::{Priority, Status};

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn unique_prefixes_expand() {
        let known = known_command_names();
        assert_eq!(expand_command_abbrev("adv", &known), Some("advance"));
        assert_eq!(expand_command_abbrev("initiative-a", &known), Some("initiative-add"));
        assert_eq!(expand_command_abbrev("initiatives", &known), Some("initiatives"));
        assert_eq!(expand_command_abbrev("a", &known), None);
    }

    #[test]
    fn add_args_split_title_from_modifiers() {
        let form = parse_task_form(&strings(&[
            "Write",
            "launch",
            "notes",
            "project:apollo",
            "pri:h",
            "+docs",
            "status:backlog",
            "--",
            "+literal",
        ]))
        .unwrap();

        assert_eq!(form.title, "Write launch notes +literal");
        assert_eq!(form.project, "apollo");
        assert_eq!(form.priority, Priority::High);
        assert_eq!(form.tags, vec!["docs".to_string()]);
        assert_eq!(form.status, Some(Status::Backlog));
    }

    #[test]
    fn list_args_use_config_defaults() {
        let mut cfg = Config::default();
        cfg.apply_overrides(vec![("sort.option".to_string(), "priority".to_string())]);

        let list = parse_list_args(
            &cfg,
            &strings(&["view:pending", "project:a,b", "dir:asc", "release", "notes"]),
        )
        .unwrap();

        assert_eq!(list.query.view, TaskView::Pending);
        assert_eq!(
            list.query.project,
            ProjectFilter::Any(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(list.query.search, "release notes");
        assert_eq!(list.sort, SortOption::Priority);
        assert_eq!(list.direction, SortDirection::Asc);
    }
}
