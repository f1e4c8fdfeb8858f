//! The Runner: replays an already-generated migration list
//! against the working tree, one migration at a time, in list order.

use crate::adapter::MigrationAdapter;
use crate::config;
use crate::error::MigrateError;
use crate::manifest::MigrationListEntry;
use crate::migration_impl::MigrationImplementationLoader;
use crate::output::Output;
use crate::tree::Tree;
use crate::vcs;
use crate::workspace::WorkspaceManifest;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::error::Error;
use std::path::Path;
use std::process::Command;

pub struct RunnerOptions {
    pub create_commits: bool,
    pub commit_prefix: String,
}

/// What happened across the whole run, for the final summary: nothing to
/// do is reported, not silently swallowed.
#[derive(Debug, Default)]
pub struct RunReport {
    pub applied: Vec<String>,
    pub no_changes: Vec<String>,
    pub commits: Vec<(String, String)>,
}

pub fn run_migrations(
    root: &Path,
    migrations: &[MigrationListEntry],
    loader: &dyn MigrationImplementationLoader,
    adapter: &dyn MigrationAdapter,
    options: &RunnerOptions,
    output: &Output,
) -> Result<RunReport, Box<dyn Error + Send + Sync>> {
    let before_snapshot = WorkspaceManifest::load(root)?.snapshot_dependencies();

    if !config::skip_install() {
        install_dependencies(root, output)?;
    }

    let progress = if output.quiet {
        None
    } else {
        let pb = ProgressBar::new(migrations.len() as u64);
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("##-"),
        );
        pb.set_message("running migrations");
        Some(pb)
    };

    let mut report = RunReport::default();

    for migration in migrations {
        if let Some(pb) = &progress {
            pb.set_message(format!("{}: {}", migration.package, migration.name));
        }

        run_one(root, migration, loader, adapter, options, output, &mut report)?;

        if let Some(pb) = &progress {
            pb.inc(1);
        }
    }

    if let Some(pb) = &progress {
        pb.finish_and_clear();
    }

    let after_snapshot = WorkspaceManifest::load(root)?.snapshot_dependencies();
    if after_snapshot != before_snapshot {
        install_dependencies(root, output)?;
    }

    if report.applied.is_empty() {
        output.info("No changes were made");
    } else {
        output.success(&format!("Applied {} migration(s)", report.applied.len()));
    }

    Ok(report)
}

fn run_one(
    root: &Path,
    migration: &MigrationListEntry,
    loader: &dyn MigrationImplementationLoader,
    adapter: &dyn MigrationAdapter,
    options: &RunnerOptions,
    output: &Output,
    report: &mut RunReport,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    output.debug(&format!("running migration {} for {}", migration.name, migration.package));

    if let Some(cli) = migration.cli.as_deref().filter(|cli| *cli != "nx") {
        let outcome = adapter.run(root, &migration.package, &migration.name, output.verbose).map_err(|source| {
            MigrateError::AdapterError {
                package: migration.package.clone(),
                name: migration.name.clone(),
                source: source.to_string(),
            }
        })?;
        output.debug(&format!("delegated to {cli} adapter"));
        for line in outcome.logging_queue {
            output.debug(&line);
        }

        if outcome.made_changes {
            report.applied.push(migration.name.clone());
            maybe_commit(root, options, migration, report, output);
        } else {
            report.no_changes.push(migration.name.clone());
        }
        return Ok(());
    }

    let Some(implementation_path) = &migration.implementation else {
        output.warn(&format!("migration {} has no implementation path, skipping", migration.name));
        return Ok(());
    };

    let package_root = root.join("node_modules").join(&migration.package);
    let implementation = loader.load(&package_root, implementation_path)?;

    let mut tree = Tree::new(root);
    implementation.run(&mut tree, &json!({}))?;

    let changes = tree.list_changes();
    if changes.is_empty() {
        report.no_changes.push(migration.name.clone());
        return Ok(());
    }

    tree.flush()?;
    for change in &changes {
        output.info(&format!("{:?} {}", change.kind, change.path.display()));
    }
    report.applied.push(migration.name.clone());

    maybe_commit(root, options, migration, report, output);
    Ok(())
}

fn maybe_commit(root: &Path, options: &RunnerOptions, migration: &MigrationListEntry, report: &mut RunReport, output: &Output) {
    if !options.create_commits {
        return;
    }
    let message = format!("{}{}", options.commit_prefix, migration.name);
    match vcs::commit(root, &message) {
        Ok(sha) => report.commits.push((migration.name.clone(), sha)),
        Err(err) => output.error(&format!("commit failed for {}: {err}", migration.name)),
    }
}

fn install_dependencies(root: &Path, output: &Output) -> Result<(), Box<dyn Error + Send + Sync>> {
    output.debug("installing dependencies");
    let status = Command::new("npm").arg("install").current_dir(root).status()?;
    if !status.success() {
        return Err(format!("npm install failed with status {status}").into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterOutcome;
    use crate::migration_impl::MigrationImplementation;
    use serde_json::Value;
    use std::path::PathBuf;

    struct FixedImplementation {
        writes: Vec<(&'static str, &'static str)>,
    }

    impl MigrationImplementation for FixedImplementation {
        fn run(&self, tree: &mut Tree, _options: &Value) -> Result<(), Box<dyn Error + Send + Sync>> {
            for (path, content) in &self.writes {
                tree.write(PathBuf::from(path), content.as_bytes().to_vec());
            }
            Ok(())
        }
    }

    struct FixedLoader {
        writes: Vec<(&'static str, &'static str)>,
    }

    impl MigrationImplementationLoader for FixedLoader {
        fn load(
            &self,
            _package_root: &Path,
            _implementation_path: &str,
        ) -> Result<Box<dyn MigrationImplementation>, Box<dyn Error + Send + Sync>> {
            Ok(Box::new(FixedImplementation { writes: self.writes.clone() }))
        }
    }

    struct NoOpAdapter;

    impl MigrationAdapter for NoOpAdapter {
        fn run(&self, _root: &Path, _pkg: &str, _name: &str, _verbose: bool) -> Result<AdapterOutcome, Box<dyn Error + Send + Sync>> {
            Ok(AdapterOutcome { made_changes: false, logging_queue: Vec::new() })
        }
    }

    fn migration(package: &str, name: &str, implementation: Option<&str>, cli: Option<&str>) -> MigrationListEntry {
        MigrationListEntry {
            package: package.to_string(),
            name: name.to_string(),
            version: "1.0.0".to_string(),
            description: None,
            implementation: implementation.map(str::to_string),
            cli: cli.map(str::to_string),
        }
    }

    fn workspace_root() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("package.json"), "{}\n").unwrap();
        tmp
    }

    #[test]
    fn migration_with_changes_is_applied_and_written_to_disk() {
        let tmp = workspace_root();
        let migrations = vec![migration("pkg-a", "update-1", Some("./update-1"), Some("nx"))];
        let loader = FixedLoader { writes: vec![("touched.txt", "hi")] };
        let output = Output::new(false, true);
        std::env::set_var("NX_MIGRATE_SKIP_INSTALL", "1");

        let report = run_migrations(
            tmp.path(),
            &migrations,
            &loader,
            &NoOpAdapter,
            &RunnerOptions { create_commits: false, commit_prefix: String::new() },
            &output,
        )
        .unwrap();

        assert_eq!(report.applied, vec!["update-1".to_string()]);
        assert!(report.no_changes.is_empty());
        assert_eq!(std::fs::read_to_string(tmp.path().join("touched.txt")).unwrap(), "hi");
    }

    #[test]
    fn migration_with_no_changes_is_recorded_silently() {
        let tmp = workspace_root();
        let migrations = vec![migration("pkg-a", "noop", Some("./noop"), Some("nx"))];
        let loader = FixedLoader { writes: Vec::new() };
        let output = Output::new(false, true);
        std::env::set_var("NX_MIGRATE_SKIP_INSTALL", "1");

        let report = run_migrations(
            tmp.path(),
            &migrations,
            &loader,
            &NoOpAdapter,
            &RunnerOptions { create_commits: false, commit_prefix: String::new() },
            &output,
        )
        .unwrap();

        assert!(report.applied.is_empty());
        assert_eq!(report.no_changes, vec!["noop".to_string()]);
    }

    #[test]
    fn non_nx_migration_is_delegated_to_the_adapter() {
        let tmp = workspace_root();
        let migrations = vec![migration("pkg-a", "ng-update-1", None, Some("angular"))];
        let loader = FixedLoader { writes: Vec::new() };
        let output = Output::new(false, true);
        std::env::set_var("NX_MIGRATE_SKIP_INSTALL", "1");

        struct RecordingAdapter;
        impl MigrationAdapter for RecordingAdapter {
            fn run(&self, _root: &Path, pkg: &str, name: &str, _verbose: bool) -> Result<AdapterOutcome, Box<dyn Error + Send + Sync>> {
                assert_eq!(pkg, "pkg-a");
                assert_eq!(name, "ng-update-1");
                Ok(AdapterOutcome { made_changes: true, logging_queue: vec!["did the thing".to_string()] })
            }
        }

        let report = run_migrations(
            tmp.path(),
            &migrations,
            &loader,
            &RecordingAdapter,
            &RunnerOptions { create_commits: false, commit_prefix: String::new() },
            &output,
        )
        .unwrap();

        assert_eq!(report.applied, vec!["ng-update-1".to_string()]);
    }

    #[test]
    fn migration_without_implementation_path_is_skipped_not_fatal() {
        let tmp = workspace_root();
        let migrations = vec![migration("pkg-a", "weird", None, Some("nx"))];
        let loader = FixedLoader { writes: Vec::new() };
        let output = Output::new(false, true);
        std::env::set_var("NX_MIGRATE_SKIP_INSTALL", "1");

        let report = run_migrations(
            tmp.path(),
            &migrations,
            &loader,
            &NoOpAdapter,
            &RunnerOptions { create_commits: false, commit_prefix: String::new() },
            &output,
        )
        .unwrap();

        assert!(report.applied.is_empty());
        assert!(report.no_changes.is_empty());
    }
}
