mod adapter;
mod args;
mod cli;
mod config;
mod error;
mod fetcher;
mod installed_version;
mod manifest;
mod migration_impl;
mod migrations_file;
mod output;
mod planner;
mod prompt;
mod registry;
mod runner;
mod semver_normalize;
mod tree;
mod vcs;
mod workspace;

use adapter::UnimplementedAdapter;
use args::MigrateOptions;
use clap::Parser;
use cli::{Cli, MigrateInvocation};
use error::MigrateError;
use fetcher::MigrationFetcher;
use installed_version::InstalledVersionResolver;
use manifest::MigrationListEntry;
use migration_impl::UnimplementedLoader;
use output::Output;
use prompt::{FixedPrompter, Prompter, StdinPrompter};
use registry::HttpRegistry;
use runner::RunnerOptions;
use std::error::Error;
use workspace::WorkspaceManifest;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let invocation: MigrateInvocation = cli.command.into();
    let output = Output::new(invocation.verbose || config::verbose_logging_enabled(), false);

    if let Err(err) = run(invocation, &output).await {
        output.error(&err.to_string());
        std::process::exit(1);
    }

    Ok(())
}

async fn run(invocation: MigrateInvocation, output: &Output) -> Result<(), Box<dyn Error + Send + Sync>> {
    let root = std::env::current_dir()?;
    let options = args::parse_migrations_options(&invocation.raw)?;

    match options {
        MigrateOptions::RunMigrations { path } => run_migrations(&root, &path, &invocation, output).await,
        MigrateOptions::GenerateMigrations { target_package, target_version, from, to, interactive } => {
            generate_migrations(&root, &target_package, &target_version, from, to, interactive, output).await
        }
    }
}

async fn run_migrations(
    root: &std::path::Path,
    path: &str,
    invocation: &MigrateInvocation,
    output: &Output,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let migrations_path = root.join(path);
    let Some(file) = migrations_file::read(&migrations_path)? else {
        output.info(&format!("{path} does not exist, nothing to run"));
        return Ok(());
    };

    if file.migrations.is_empty() {
        output.info("No changes were made");
        return Ok(());
    }

    let loader = UnimplementedLoader;
    let adapter = UnimplementedAdapter;
    let runner_options = RunnerOptions {
        create_commits: invocation.create_commits,
        commit_prefix: invocation.commit_prefix.clone(),
    };

    let report = runner::run_migrations(root, &file.migrations, &loader, &adapter, &runner_options, output)?;

    if !report.commits.is_empty() {
        output.info(&format!("Created {} commit(s)", report.commits.len()));
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn generate_migrations(
    root: &std::path::Path,
    target_package: &str,
    target_version: &str,
    from: std::collections::HashMap<String, String>,
    to: std::collections::HashMap<String, String>,
    interactive: bool,
    output: &Output,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let registry = HttpRegistry::new();
    let fetcher = MigrationFetcher::new(registry);
    let installed_resolver = InstalledVersionResolver::new(root);

    let prompter: Box<dyn Prompter> = if interactive { Box::new(StdinPrompter) } else { Box::new(FixedPrompter(true)) };

    let mut workspace = WorkspaceManifest::load(root).map_err(|_| MigrateError::InputError(format!("{} is not a readable package.json", root.join("package.json").display())))?;
    let dependency_names = workspace.dependency_names();

    output.info(&format!("Fetching meta data about package {target_package}"));

    let plan = planner::plan(
        &fetcher,
        installed_resolver,
        prompter.as_ref(),
        dependency_names,
        target_package,
        target_version,
        from,
        to,
        interactive,
    )
    .await?;

    for (pkg, update) in &plan.package_json_updates {
        workspace.apply_update(pkg, update);
    }
    workspace.write()?;

    let entries: Vec<MigrationListEntry> = plan
        .migrations
        .into_iter()
        .map(|m| MigrationListEntry {
            package: m.package,
            name: m.name,
            version: m.version,
            description: m.description,
            implementation: m.implementation,
            cli: m.cli,
        })
        .collect();

    migrations_file::write(&root.join("migrations.json"), &entries)?;

    output.success(&format!(
        "Updated {} package(s), staged {} migration(s)",
        plan.package_json_updates.len(),
        entries.len()
    ));

    if !entries.is_empty() {
        output.info("Run `nx-migrate --run-migrations` to apply them.");
    }

    Ok(())
}
