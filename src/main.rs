//! `sdd` - inspect and drive provenance tracing for a workspace.

use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fs_broker::{EntryKind, PatchRequest};
use provenance_store::{Actor, FileOp};
use serde::Serialize;
use serde_json::json;

use sdd_shell::{logging, CommitDecision, CommitPolicy, Shell, ShellConfig};

#[derive(Debug, Parser)]
#[command(name = "sdd", version, about)]
struct Cli {
    /// Workspace directory. Defaults to the current directory.
    #[arg(long, short = 'w', global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show tracing state, the active run and parity.
    Status,

    /// Rebuild the index by replaying the ledger.
    Rebuild,

    /// List the runs that touched a file, newest first.
    Trace { path: String },

    /// Start a run, stamping the hashes of its input documents.
    StartRun {
        feature: String,
        task: String,
        inputs: Vec<String>,
    },

    /// Stop the active run.
    StopRun,

    /// Abort the active run.
    AbortRun,

    /// Record an observed change to a file.
    Record {
        path: String,
        op: FileOp,
        #[arg(long, value_enum, default_value_t = ActorArg::Human)]
        actor: ActorArg,
    },

    /// Record a commit override for untracked changes.
    Override { reason: String },

    /// Apply a unified diff to the workspace.
    Apply {
        diff: PathBuf,
        #[arg(long, value_enum, default_value_t = ActorArg::Agent)]
        actor: ActorArg,
    },

    /// List a workspace directory.
    Ls {
        #[arg(default_value = ".")]
        path: String,
    },

    /// Print a workspace file.
    Cat { path: String },

    /// Decide whether the workspace may be committed.
    CommitCheck {
        #[arg(long, value_enum, default_value_t = CommitPolicy::BlockOnDrift)]
        policy: CommitPolicy,

        /// Grant a one-shot override before checking.
        #[arg(long)]
        override_reason: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ActorArg {
    Agent,
    Human,
}

impl From<ActorArg> for Actor {
    fn from(value: ActorArg) -> Self {
        match value {
            ActorArg::Agent => Actor::Agent,
            ActorArg::Human => Actor::Human,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ShellConfig::from_env().context("loading configuration")?;
    logging::init(&config.log_filter);
    for warning in &config.warnings {
        tracing::warn!("{warning}");
    }

    let workspace = match cli.workspace {
        Some(path) => path,
        None => env::current_dir().context("reading the current directory")?,
    };
    let mut shell = Shell::new(config);
    shell
        .open_workspace(&workspace)
        .with_context(|| format!("opening workspace {}", workspace.display()))?;

    run(&mut shell, cli.command)
}

fn run(shell: &mut Shell, command: Command) -> Result<()> {
    match command {
        Command::Status => print_json(&shell.provenance_mut()?.get_status()),
        Command::Rebuild => {
            let provenance = shell.provenance_mut()?;
            provenance.rebuild_index_from_ledger()?;
            print_json(&provenance.get_parity())
        }
        Command::Trace { path } => print_json(&shell.provenance_mut()?.get_file_trace(&path)?),
        Command::StartRun {
            feature,
            task,
            inputs,
        } => {
            let inputs: Vec<&str> = inputs.iter().map(String::as_str).collect();
            let run = shell
                .provenance_mut()?
                .start_run(&feature, &task, &inputs)?;
            print_json(&run)
        }
        Command::StopRun => print_json(&shell.provenance_mut()?.stop_run()?),
        Command::AbortRun => print_json(&shell.provenance_mut()?.abort_active_run()?),
        Command::Record { path, op, actor } => {
            if op == FileOp::Renamed {
                bail!("renames are recorded by the shell; use added/modified/deleted");
            }
            let event = shell
                .provenance_mut()?
                .record_file_change(&path, op, actor.into(), None, None)?;
            print_json(&event)
        }
        Command::Override { reason } => {
            print_json(&shell.provenance_mut()?.override_untracked(&reason, Actor::Human)?)
        }
        Command::Apply { diff, actor } => {
            let text = fs::read_to_string(&diff)
                .with_context(|| format!("reading diff {}", diff.display()))?;
            let report = shell.apply_patch(PatchRequest::Diff(text), actor.into())?;
            println!("{}", report.summary());
            if !report.is_success() {
                bail!("{} file(s) failed to apply", report.failed.len());
            }
            Ok(())
        }
        Command::Ls { path } => {
            let entries: Vec<_> = shell
                .broker()
                .read_directory(&path)?
                .into_iter()
                .map(|entry| {
                    json!({
                        "name": entry.name,
                        "path": entry.path,
                        "kind": kind_label(entry.kind),
                        "size": entry.size,
                    })
                })
                .collect();
            print_json(&entries)
        }
        Command::Cat { path } => {
            print!("{}", shell.broker().read_file(&path)?);
            Ok(())
        }
        Command::CommitCheck {
            policy,
            override_reason,
        } => {
            if let Some(reason) = override_reason {
                shell
                    .provenance_mut()?
                    .override_untracked(&reason, Actor::Human)?;
            }
            let decision = shell.check_commit(policy)?;
            print_json(&decision)?;
            if let CommitDecision::Block { drift_files } = decision {
                bail!("commit blocked by {} untracked file(s)", drift_files.len());
            }
            Ok(())
        }
    }
}

fn kind_label(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::File => "file",
        EntryKind::Directory => "directory",
        EntryKind::Symlink => "symlink",
        EntryKind::Other => "other",
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
