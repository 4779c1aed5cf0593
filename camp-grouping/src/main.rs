//! camp-grouping - Admin command line for the camp grouping engine
//!
//! Every command prints its result as JSON on stdout; logs go to stderr.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use camp_common::config::{resolve_settings, CONFIG_ENV_VAR, DB_ENV_VAR};
use camp_common::db::init_database;
use camp_common::{ResolutionType, RunType};
use camp_grouping::{GroupingEngine, MoveOptions, RunRequest};

/// Command-line arguments for camp-grouping
#[derive(Parser, Debug)]
#[command(name = "camp-grouping")]
#[command(about = "Partition camp rosters into activity groups")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(long, global = true, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true, env = DB_ENV_VAR)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the grouping pipeline for a camp
    Run {
        #[arg(long)]
        camp: Uuid,
        /// initial, rerun or incremental
        #[arg(long = "type", default_value = "initial")]
        run_type: RunType,
        #[arg(long, default_value = "cli")]
        by: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Move a camper to another group
    Move {
        #[arg(long)]
        camper: Uuid,
        #[arg(long)]
        group: Uuid,
        #[arg(long, default_value = "cli")]
        by: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Keep a camper's current group across re-runs
    Pin {
        #[arg(long)]
        camper: Uuid,
        #[arg(long, default_value = "cli")]
        by: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// List a camp's active groups
    Groups {
        #[arg(long)]
        camp: Uuid,
    },
    /// List a camp's active campers
    Campers {
        #[arg(long)]
        camp: Uuid,
    },
    /// List a camp's violations (unresolved only unless --all)
    Violations {
        #[arg(long)]
        camp: Uuid,
        #[arg(long)]
        all: bool,
    },
    /// Resolve a violation
    Resolve {
        #[arg(long)]
        violation: Uuid,
        /// manual_override, accepted or dismissed
        #[arg(long, default_value = "accepted")]
        resolution: ResolutionType,
        #[arg(long, default_value = "cli")]
        by: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// List a camp's grouping runs, most recent first
    Runs {
        #[arg(long)]
        camp: Uuid,
    },
    /// Show one grouping run
    ShowRun {
        #[arg(long)]
        run: Uuid,
    },
    /// Show the assignment log of one run
    Assignments {
        #[arg(long)]
        run: Uuid,
    },
    /// Show the violations one run raised, left open or auto-fixed
    RunViolations {
        #[arg(long)]
        run: Uuid,
    },
    /// Show the friend clusters one run found
    Clusters {
        #[arg(long)]
        run: Uuid,
    },
    /// Show one camper's move history
    History {
        #[arg(long)]
        camper: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = resolve_settings(args.config.as_deref(), args.database.as_deref())
        .context("Failed to resolve settings")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        "Starting camp-grouping v{} (database: {})",
        env!("CARGO_PKG_VERSION"),
        settings.database_path.display()
    );

    let pool = init_database(&settings.database_path)
        .await
        .context("Failed to open database")?;
    let engine = GroupingEngine::new(pool, settings);

    match args.command {
        Command::Run { camp, run_type, by, reason } => {
            let request = RunRequest {
                run_type,
                triggered_by: by,
                trigger_reason: reason,
            };
            print_json(&engine.run_grouping(camp, request).await?)
        }
        Command::Move { camper, group, by, reason } => {
            let options = MoveOptions { reason, moved_by: by };
            print_json(&engine.move_camper(camper, group, options).await?)
        }
        Command::Pin { camper, by, reason } => {
            print_json(&engine.pin_camper(camper, reason.as_deref(), &by).await?)
        }
        Command::Groups { camp } => print_json(&engine.list_groups(camp).await?),
        Command::Campers { camp } => print_json(&engine.list_campers(camp).await?),
        Command::Violations { camp, all } => print_json(&engine.list_violations(camp, !all).await?),
        Command::Resolve { violation, resolution, by, notes } => print_json(
            &engine
                .resolve_violation(violation, resolution, &by, notes.as_deref())
                .await?,
        ),
        Command::Runs { camp } => print_json(&engine.list_runs(camp).await?),
        Command::ShowRun { run } => {
            let record = engine
                .get_run(run)
                .await?
                .ok_or_else(|| anyhow!("Grouping run not found: {}", run))?;
            print_json(&record)
        }
        Command::Assignments { run } => print_json(&engine.run_assignments(run).await?),
        Command::RunViolations { run } => print_json(&engine.run_violations(run).await?),
        Command::Clusters { run } => print_json(&engine.run_clusters(run).await?),
        Command::History { camper } => print_json(&engine.camper_history(camper).await?),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
