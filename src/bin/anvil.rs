// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use anvil::{
    config::Settings,
    path::{default_review_dir, default_settings_path},
    prompt::TerminalInteraction,
    sync::{
        model::{SyncTarget, SETTINGS_TARGET},
        PushOutcome, Synchronizer,
    },
};

use anyhow::{anyhow, ensure, Context, Result};
use clap::{Parser, Subcommand};
use std::{
    fs,
    path::{Path, PathBuf},
    process::exit,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "anvil [options] <anvil-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to settings file instead of the default location.
    #[arg(short, long, global = true, value_name = "path")]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let settings_path = match self.settings {
            Some(path) => path,
            None => default_settings_path()?,
        };

        match self.command {
            Command::Push(opts) => run_push(settings_path, opts).await,
            Command::Pull(opts) => run_pull(settings_path, opts).await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Push configuration to a fresh branch of the private repository.
    #[command(override_usage = "anvil push [options] [app]")]
    Push(PushOptions),

    /// Copy configuration directory from the repository into review area.
    #[command(override_usage = "anvil pull [options] [dir]")]
    Pull(PullOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PushOptions {
    /// Application from the configs section to push, anvil's own settings
    /// file if omitted.
    #[arg(value_name = "app")]
    pub app: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PullOptions {
    /// Top-level directory of the repository to pull.
    #[arg(value_name = "dir", default_value = SETTINGS_TARGET)]
    pub dir: String,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

fn load_settings(path: &Path) -> Result<Settings> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file {:?}", path.display()))?;
    let settings = data
        .parse::<Settings>()
        .with_context(|| format!("invalid settings file {:?}", path.display()))?;

    Ok(settings)
}

async fn run_push(settings_path: PathBuf, opts: PushOptions) -> Result<()> {
    let settings = load_settings(&settings_path)?;
    let target = match opts.app {
        Some(app) => {
            let local_source = settings.config_path(&app).ok_or_else(|| {
                anyhow!(
                    "no local path configured for {app:?}, add it to the configs section of {:?}",
                    settings_path.display()
                )
            })?;
            SyncTarget::app(app.as_str(), local_source)
        }
        None => SyncTarget::settings(&settings_path),
    };

    let synchronizer =
        Synchronizer::new(settings.repository_handle()?, settings.command_timeout())?;
    let mut ui = TerminalInteraction::new()?;
    let outcome = synchronizer.push_target(&target, &mut ui).await;
    ui.finish();

    match outcome? {
        PushOutcome::Pushed(record) => {
            info!(
                "pushed {} to branch {} of {}",
                target.name, record.branch_name, record.repository_url
            );
            for file in record.files_committed {
                info!("  {file}");
            }
        }
        PushOutcome::NoChanges => info!("{} is already up to date", target.name),
        PushOutcome::Cancelled => info!("push of {} cancelled", target.name),
    }

    Ok(())
}

/// Name refers to exactly one directory entry below the repository root.
fn is_top_level_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && name != "." && name != ".."
}

async fn run_pull(settings_path: PathBuf, opts: PullOptions) -> Result<()> {
    ensure!(
        is_top_level_name(&opts.dir),
        "{:?} is not a top-level directory name",
        opts.dir
    );

    let settings = load_settings(&settings_path)?;
    let synchronizer =
        Synchronizer::new(settings.repository_handle()?, settings.command_timeout())?;
    let mut ui = TerminalInteraction::new()?;
    let record = synchronizer
        .pull_target(&opts.dir, &default_review_dir()?, &mut ui)
        .await;
    ui.finish();

    let record = record?;
    info!(
        "copied {} to {:?} for review",
        record.target_name,
        record.destination.display()
    );
    for file in record.files {
        info!("  {file}");
    }

    Ok(())
}
