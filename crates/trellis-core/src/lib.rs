pub mod api;
pub mod board;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod error;
pub mod filter;
pub mod http;
pub mod poll;
pub mod prefs;
pub mod render;
pub mod sort;
pub mod store;
pub mod task;
pub mod terminology;
pub mod workflow;

use std::ffi::OsString;
use std::path::Path;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::api::TaskApi;
use crate::board::TaskBoard;
use crate::config::Config;
use crate::prefs::FilePreferences;
use crate::terminology::{
  BusinessCase,
  Terminology
};

const PREFERENCES_FILE: &str =
  "preferences.json";

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting trellis CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = Config::load(
    cli.trellisrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );
  if let Some(url) = cli.api {
    cfg.apply_overrides([(
      "api.url".to_string(),
      url
    )]);
  }

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let case = cfg
    .get_parsed::<BusinessCase>(
      "business.case"
    )?
    .unwrap_or_default();
  let terms = Terminology::for_case(case)
    .merged(&cfg.section("terms"));
  let mut renderer =
    render::Renderer::new(&cfg, terms)?;
  let inv = cli::Invocation::parse(
    &cfg, cli.rest
  )?;

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async runtime"
      )?;

  runtime.block_on(async {
    match cfg.api_url() {
      | Some(url) => {
        info!(url = %url, "using remote api");
        let api =
          http::HttpApi::new(&url)?;
        execute(
          api,
          &cfg,
          &data_dir,
          &mut renderer,
          inv
        )
        .await
      }
      | None => {
        let store =
          store::DocumentStore::open(
            &data_dir
          )
          .with_context(|| {
            format!(
              "failed to open document \
               store at {}",
              data_dir.display()
            )
          })?;
        execute(
          store,
          &cfg,
          &data_dir,
          &mut renderer,
          inv
        )
        .await
      }
    }
  })?;

  info!("done");
  Ok(())
}

async fn execute<A: TaskApi>(
  api: A,
  cfg: &Config,
  data_dir: &Path,
  renderer: &mut render::Renderer,
  inv: cli::Invocation
) -> anyhow::Result<()> {
  let mut board = TaskBoard::new(api)
    .with_recent_threshold(
      cfg.recent_threshold()?
    );

  let mut prefs = FilePreferences::open(
    &data_dir.join(PREFERENCES_FILE)
  )?;

  commands::dispatch(
    &mut board,
    &mut prefs,
    cfg,
    renderer,
    inv
  )
  .await
}
