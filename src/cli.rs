use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;

use crate::commands::{self, CommandReport};
use crate::error::code_for;
use crate::logging;

#[derive(Parser)]
#[command(
    name = "meyem",
    version,
    about = "Keep motionEye backups mirrored, timelapsed, and pruned"
)]
struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Per-entry progress on stderr.
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile backups, build and upload timelapses, prune, reconcile timelapses
    Run,
    /// Delete remote entries that no longer exist locally
    Reconcile {
        /// Reconcile the timelapses directory instead of the day directories.
        #[arg(long, default_value_t = false)]
        timelapses: bool,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Build timelapses for completed days only
    Build,
    /// Delete local timelapses older than the retention window
    Prune {
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Show paths, effective config, lock state, and ffmpeg availability
    Status,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Reconcile { .. } => "reconcile",
            Self::Build => "build",
            Self::Prune { .. } => "prune",
            Self::Status => "status",
        }
    }
}

fn dispatch(command: &Command) -> Result<CommandReport> {
    match command {
        Command::Run => commands::run::run(),
        Command::Reconcile {
            timelapses,
            dry_run,
        } => commands::reconcile::run(&commands::reconcile::ReconcileOptions {
            timelapses: *timelapses,
            dry_run: *dry_run,
        }),
        Command::Build => commands::build::run(),
        Command::Prune { dry_run } => {
            commands::prune::run(&commands::prune::PruneOptions { dry_run: *dry_run })
        }
        Command::Status => commands::status::run(),
    }
}

fn render_text(report: &CommandReport) {
    let state = if report.ok { "ok" } else { "issues" };
    println!("{}: {state}", report.command);
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  issue: {issue}");
    }
}

fn render_failure(command: &str, err: &anyhow::Error, as_json: bool) -> Result<()> {
    let code = code_for(err).map(|code| code.as_str());
    if as_json {
        let payload = json!({
            "command": command,
            "ok": false,
            "code": code,
            "error": format!("{err:#}"),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    }
    match code {
        Some(code) => eprintln!("error[{code}]: {err:#}"),
        None => eprintln!("error: {err:#}"),
    }
    Ok(())
}

/// Exit code: `0` clean, `2` finished with issues, `1` failed outright.
pub fn run() -> Result<i32> {
    let cli = Cli::parse();
    logging::set_debug(cli.debug);

    let report = match dispatch(&cli.command) {
        Ok(report) => report,
        Err(err) => {
            render_failure(cli.command.name(), &err, cli.json)?;
            return Ok(1);
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        render_text(&report);
    }
    Ok(report.exit_code())
}
