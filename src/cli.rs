//! The CLI surface: a thin `clap` binding over `args::RawMigrateArgs`,
//! kept separate from the pure parsing logic the same way a `main.rs`
//! elsewhere keeps its `Commands` enum separate from the options struct its
//! handlers actually consume.

use crate::args::RawMigrateArgs;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "nx-migrate")]
#[command(about = "Plan and run package version migrations across a workspace", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compute (or replay) a migration plan for the workspace.
    Migrate {
        /// A bare version, a bare package name, or `pkg@version`.
        package_and_version: Option<String>,

        #[arg(long)]
        from: Option<String>,

        #[arg(long)]
        to: Option<String>,

        #[arg(short, long)]
        interactive: bool,

        /// Replay a previously generated migration list instead of planning
        /// a new one. Bare `--run-migrations` defaults to `migrations.json`.
        #[arg(long, num_args = 0..=1, default_missing_value = "")]
        run_migrations: Option<String>,

        #[arg(short, long)]
        verbose: bool,

        #[arg(long)]
        create_commits: bool,

        #[arg(long, default_value = "chore(repo): ")]
        commit_prefix: String,
    },
}

pub struct MigrateInvocation {
    pub raw: RawMigrateArgs,
    pub verbose: bool,
    pub create_commits: bool,
    pub commit_prefix: String,
}

impl From<Commands> for MigrateInvocation {
    fn from(command: Commands) -> Self {
        let Commands::Migrate { package_and_version, from, to, interactive, run_migrations, verbose, create_commits, commit_prefix } = command;
        MigrateInvocation {
            raw: RawMigrateArgs { package_and_version, from, to, interactive, run_migrations },
            verbose,
            create_commits,
            commit_prefix,
        }
    }
}
