//! The Planner: the hard part. Walks the target
//! package and its transitive `packageGroup`/`packageJsonUpdates` entries,
//! producing a deterministic ordered set of dependency bumps plus the
//! generators that should run for them. Every update entry is gated on
//! `requires` and, in interactive mode, `x-prompt` confirmation before its
//! packages are merged and recursed into. Sub-recursions run sequentially,
//! in declared order.

use crate::error::MigrateError;
use crate::fetcher::MigrationFetcher;
use crate::installed_version::InstalledVersionResolver;
use crate::manifest::{
    AddToPackageJson, MigrationManifest, PackageGroup, PackageGroupEntry, PackageJsonUpdateEntry,
    PackageJsonUpdateForPackage, Requirements,
};
use crate::prompt::Prompter;
use crate::registry::Registry;
use crate::semver_normalize::{self, Version};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::future::Future;
use std::pin::Pin;

const NX_MIN_VERSION: &str = "14.0.0-beta.0";

#[derive(Debug, Clone)]
pub struct PlannedMigration {
    pub package: String,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub implementation: Option<String>,
    pub cli: Option<String>,
}

#[derive(Debug)]
pub struct MigrationPlan {
    pub package_json_updates: Vec<(String, PackageJsonUpdateForPackage)>,
    pub migrations: Vec<PlannedMigration>,
}

/// Shared mutable planning state (`packageJsonUpdates`,
/// `collectedVersions`, `installedPkgVersionOverrides`), threaded through the
/// recursive walk by `&mut` rather than held globally.
struct PlannerState {
    package_json_updates: Vec<(String, PackageJsonUpdateForPackage)>,
    collected_versions: HashMap<String, Version>,
    installed_pkg_version_overrides: HashMap<String, String>,
    to: HashMap<String, String>,
}

impl PlannerState {
    /// Upgrade-only: a new version only replaces the stored one if strictly
    /// greater.
    fn add_package_json_update(&mut self, pkg: &str, update: PackageJsonUpdateForPackage) {
        if let Some(pos) = self.package_json_updates.iter().position(|(name, _)| name == pkg) {
            if semver_normalize::version_gt(&update.version, &self.package_json_updates[pos].1.version) {
                self.package_json_updates[pos].1 = update;
            }
        } else {
            self.package_json_updates.push((pkg.to_string(), update));
        }
    }
}

struct PlannerCtx<'a, R: Registry> {
    fetcher: &'a MigrationFetcher<R>,
    installed: RefCell<InstalledVersionResolver>,
    prompter: &'a dyn Prompter,
    interactive: bool,
    workspace_dependency_names: HashSet<String>,
    extra_check: HashMap<String, String>,
}

/// Entry point: `updatePackageJson(rootTarget, rootVersion)`.
#[allow(clippy::too_many_arguments)]
pub async fn plan<R: Registry>(
    fetcher: &MigrationFetcher<R>,
    installed_resolver: InstalledVersionResolver,
    prompter: &dyn Prompter,
    workspace_dependency_names: HashSet<String>,
    root_pkg: &str,
    root_version: &str,
    from: HashMap<String, String>,
    to: HashMap<String, String>,
    interactive: bool,
) -> Result<MigrationPlan, Box<dyn Error + Send + Sync>> {
    let ctx = PlannerCtx {
        fetcher,
        installed: RefCell::new(installed_resolver),
        prompter,
        interactive,
        workspace_dependency_names,
        extra_check: HashMap::new(),
    };
    let mut state = PlannerState {
        package_json_updates: Vec::new(),
        collected_versions: HashMap::new(),
        installed_pkg_version_overrides: from,
        to,
    };

    populate_and_get_packages_to_check(&ctx, &mut state, root_pkg.to_string(), root_version.to_string(), AddToPackageJson::False).await?;

    let migrations = assemble_migrations(&ctx, &state).await?;

    Ok(MigrationPlan { package_json_updates: state.package_json_updates, migrations })
}

/// Boxed for async recursion.
fn populate_and_get_packages_to_check<'a, R: Registry>(
    ctx: &'a PlannerCtx<'a, R>,
    state: &'a mut PlannerState,
    pkg: String,
    mut target_version: String,
    target_add: AddToPackageJson,
) -> Pin<Box<dyn Future<Output = Result<(), Box<dyn Error + Send + Sync>>> + 'a>> {
    Box::pin(async move {
        // 1. `to[pkg]` overrides the target version.
        if let Some(override_version) = state.to.get(&pkg) {
            target_version = override_version.clone();
        }

        // 2. Not installed: record a pure add and stop.
        let Some(installed) = ctx.installed.borrow_mut().installed_version(&pkg, &state.installed_pkg_version_overrides) else {
            state.add_package_json_update(
                &pkg,
                PackageJsonUpdateForPackage {
                    version: semver_normalize::normalize_with_tag_check(&target_version),
                    add_to_package_json: target_add,
                    always_add_to_package_json: false,
                    if_package_installed: None,
                },
            );
            return Ok(());
        };

        // 3. Fetch the manifest, wrapping "no matching version" into a
        // user-actionable error.
        let manifest: std::rc::Rc<MigrationManifest> = match ctx.fetcher.fetch(&pkg, &target_version).await {
            Ok(manifest) => manifest,
            Err(err) => {
                if err.to_string().contains("No matching version") {
                    return Err(MigrateError::NoMatchingVersion { package: pkg.clone(), requested: target_version.clone() }.into());
                }
                return Err(err);
            }
        };

        // 4. The manifest's own resolved version replaces the target.
        let resolved = manifest.version.clone();

        // 5/6. Cycle pruning via `collectedVersions`.
        if let Some(seen) = state.collected_versions.get(&pkg) {
            if semver_normalize::version_gte(seen, &resolved) {
                return Ok(());
            }
        }
        state.collected_versions.insert(pkg.clone(), resolved.clone());

        // 7. packageGroup normalization + pseudo update entry.
        let package_group = normalize_package_group(&pkg, &target_version, &manifest.package_group, state);
        let package_group_order: Vec<String> = package_group.0.iter().map(|entry| entry.package.clone()).collect();

        let mut package_json_updates = manifest.package_json_updates.clone();
        if !package_group.0.is_empty() {
            let packages = package_group
                .0
                .iter()
                .map(|entry| {
                    (
                        entry.package.clone(),
                        PackageJsonUpdateForPackage {
                            version: resolved.clone(),
                            add_to_package_json: AddToPackageJson::False,
                            always_add_to_package_json: false,
                            if_package_installed: None,
                        },
                    )
                })
                .collect();
            package_json_updates.push((
                format!("{resolved}--PackageGroup"),
                PackageJsonUpdateEntry { version: resolved.clone(), packages, requires: Vec::new(), x_prompt: None },
            ));
        }

        // 8. Filter to the entries that apply.
        let filtered = filter_package_json_updates(&package_json_updates, &resolved, &installed, ctx, state);

        // 9. Record the root's own update (upgrade-only).
        state.add_package_json_update(
            &pkg,
            PackageJsonUpdateForPackage {
                version: resolved.clone(),
                add_to_package_json: target_add,
                always_add_to_package_json: false,
                if_package_installed: None,
            },
        );

        // 10/11 unified: gate every entry on `requires` + (interactive
        // x-prompt confirmation), merge what survives, then recurse.
        let mut acc: Vec<(String, PackageJsonUpdateForPackage)> = Vec::new();
        for (_key, entry) in &filtered {
            if !requires_satisfied(&entry.requires, ctx, state) {
                continue;
            }
            let prompt_ok = match (&entry.x_prompt, ctx.interactive) {
                (Some(message), true) => ctx.prompter.confirm(message),
                _ => true,
            };
            if !prompt_ok {
                continue;
            }
            for (name, update) in &entry.packages {
                merge_into_acc(&mut acc, name.clone(), update.clone());
            }
        }

        acc.sort_by_key(|(name, _)| {
            package_group_order.iter().position(|candidate| candidate == name).map(|i| i as i64).unwrap_or(-1)
        });

        for (name, update) in acc {
            let version = update.version.to_string();
            let add = update.add_to_package_json.clone();
            populate_and_get_packages_to_check(ctx, &mut *state, name, version, add).await?;
        }

        Ok(())
    })
}

fn merge_into_acc(acc: &mut Vec<(String, PackageJsonUpdateForPackage)>, name: String, update: PackageJsonUpdateForPackage) {
    if let Some(existing) = acc.iter_mut().find(|(existing_name, _)| *existing_name == name) {
        existing.1 = update;
    } else {
        acc.push((name, update));
    }
}

/// Legacy substitution, then `"*"`/bare-string override propagation.
fn normalize_package_group(pkg: &str, target_version_raw: &str, group: &PackageGroup, state: &mut PlannerState) -> PackageGroup {
    let effective = if pkg == "@nrwl/workspace" && semver_normalize::gt(NX_MIN_VERSION, target_version_raw) {
        crate::manifest::legacy_nrwl_workspace_group()
    } else {
        group.clone()
    };

    for entry in &effective.0 {
        let propagates = entry.version.is_none() || entry.version.as_deref() == Some("*");
        if !propagates {
            continue;
        }
        if let Some(parent_override) = state.installed_pkg_version_overrides.get(pkg).cloned() {
            state.installed_pkg_version_overrides.entry(entry.package.clone()).or_insert(parent_override);
        }
    }

    effective
}

/// Drops empty/out-of-range entries, then per-package filters on
/// `ifPackageInstalled`, being-added-or-already-present, and dominance over
/// already-collected versions, rewriting each survivor to its canonical
/// `addToPackageJson` section.
fn filter_package_json_updates<R: Registry>(
    updates: &[(String, PackageJsonUpdateEntry)],
    target_resolved: &Version,
    root_installed: &Version,
    ctx: &PlannerCtx<R>,
    state: &PlannerState,
) -> Vec<(String, PackageJsonUpdateEntry)> {
    let mut out = Vec::new();

    for (key, entry) in updates {
        if entry.packages.is_empty() {
            continue;
        }
        let in_range = semver_normalize::version_gt(&entry.version, root_installed) && semver_normalize::version_lte(&entry.version, target_resolved);
        if !in_range {
            continue;
        }

        let mut kept_packages = Vec::new();
        for (name, update) in &entry.packages {
            if let Some(required_pkg) = &update.if_package_installed {
                if ctx.installed.borrow_mut().installed_version(required_pkg, &state.installed_pkg_version_overrides).is_none() {
                    continue;
                }
            }

            let being_added = update.always_add_to_package_json || update.add_to_package_json != AddToPackageJson::False;
            let already_present = ctx.workspace_dependency_names.contains(name);
            if !(being_added || already_present) {
                continue;
            }

            if let Some(collected) = state.collected_versions.get(name) {
                if !semver_normalize::version_gt(&update.version, collected) {
                    continue;
                }
            }

            let canonical_add = if update.always_add_to_package_json { AddToPackageJson::Dependencies } else { update.add_to_package_json.clone() };

            kept_packages.push((
                name.clone(),
                PackageJsonUpdateForPackage {
                    version: update.version.clone(),
                    add_to_package_json: canonical_add,
                    always_add_to_package_json: update.always_add_to_package_json,
                    if_package_installed: update.if_package_installed.clone(),
                },
            ));
        }

        if kept_packages.is_empty() {
            continue;
        }

        out.push((
            key.clone(),
            PackageJsonUpdateEntry { version: entry.version.clone(), packages: kept_packages, requires: entry.requires.clone(), x_prompt: entry.x_prompt.clone() },
        ));
    }

    out
}

/// Satisfied when, for every `(pkg, range)` pair, at least one
/// of installed / planned / caller-provided extra-check versions matches.
fn requires_satisfied<R: Registry>(requires: &Requirements, ctx: &PlannerCtx<R>, state: &PlannerState) -> bool {
    requires.iter().all(|(pkg, range)| {
        if let Some(version) = ctx.installed.borrow_mut().installed_version(pkg, &state.installed_pkg_version_overrides) {
            if let Some(semver_version) = version.as_semver() {
                if semver_normalize::satisfies(semver_version, range) {
                    return true;
                }
            }
        }

        if let Some((_, update)) = state.package_json_updates.iter().find(|(name, _)| name == pkg) {
            if let Some(semver_version) = update.version.as_semver() {
                if semver_normalize::satisfies(semver_version, range) {
                    return true;
                }
            }
        }

        if let Some(extra) = ctx.extra_check.get(pkg) {
            if let Ok(version) = semver::Version::parse(&semver_normalize::clean_semver(extra)) {
                if semver_normalize::satisfies(&version, range) {
                    return true;
                }
            }
        }

        false
    })
}

/// For every planned package, keep the generators whose version
/// falls strictly between what's installed and what's planned, with
/// `requires` satisfied against the final plan state.
async fn assemble_migrations<R: Registry>(ctx: &PlannerCtx<'_, R>, state: &PlannerState) -> Result<Vec<PlannedMigration>, Box<dyn Error + Send + Sync>> {
    let mut migrations = Vec::new();

    for (pkg, update) in &state.package_json_updates {
        let installed = ctx.installed.borrow_mut().installed_version(pkg, &state.installed_pkg_version_overrides);
        let manifest = ctx.fetcher.fetch(pkg, &update.version.to_string()).await?;

        for (name, generator) in &manifest.generators {
            let above_installed = match &installed {
                Some(installed_version) => semver_normalize::version_gt(&generator.version, installed_version),
                None => true,
            };
            let within_planned = semver_normalize::version_lte(&generator.version, &update.version);
            if !above_installed || !within_planned {
                continue;
            }
            if !requires_satisfied(&generator.requires, ctx, state) {
                continue;
            }

            let implementation = match &generator.implementation {
                crate::manifest::GeneratorImplementation::Implementation(path) => path.clone(),
                crate::manifest::GeneratorImplementation::Factory(path) => path.clone(),
            };

            migrations.push(PlannedMigration {
                package: pkg.clone(),
                name: name.clone(),
                version: generator.version.to_string(),
                description: generator.description.clone(),
                implementation: Some(implementation),
                cli: generator.cli.map(|cli| match cli {
                    crate::manifest::GeneratorCli::Nx => "nx".to_string(),
                    crate::manifest::GeneratorCli::Angular => "angular".to_string(),
                }),
            });
        }
    }

    Ok(migrations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{PackageVersionMetadata, RegistryResult};
    use std::path::{Path, PathBuf};

    struct MockRegistry;

    impl Registry for MockRegistry {
        async fn resolve_version(&self, pkg: &str, version_or_tag: &str) -> RegistryResult<String> {
            Ok(match pkg {
                "nx" => "17.0.0".to_string(),
                _ => version_or_tag.to_string(),
            })
        }

        async fn view(&self, pkg: &str, resolved_version: &str) -> RegistryResult<Option<PackageVersionMetadata>> {
            let package_group = match pkg {
                "nx" => Some(serde_json::json!(["pkg-a"])),
                // Mutually-referencing group: pkg-a points back at nx, so the
                // recursion must terminate via `collectedVersions`.
                "pkg-a" => Some(serde_json::json!(["nx"])),
                _ => None,
            };
            Ok(Some(PackageVersionMetadata {
                resolved_version: resolved_version.to_string(),
                tarball_url: String::new(),
                migrations_path: None,
                package_group,
            }))
        }

        async fn pack(&self, _pkg: &str, _resolved_version: &str, _dest_dir: &Path) -> RegistryResult<PathBuf> {
            Err("pack not available in this test double".into())
        }

        async fn extract_file_from_tarball(&self, _tarball: &Path, _entry_path: &str, _out_path: &Path) -> RegistryResult<PathBuf> {
            Err("extract not available in this test double".into())
        }
    }

    fn installed_with_nx_at(tmp: &std::path::Path, version: &str) -> InstalledVersionResolver {
        let dir = tmp.join("node_modules").join("nx");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("package.json"), format!(r#"{{"version": "{version}"}}"#)).unwrap();
        InstalledVersionResolver::new(tmp)
    }

    #[tokio::test]
    async fn root_update_and_package_group_member_are_both_planned() {
        let tmp = tempfile::tempdir().unwrap();
        let installed = installed_with_nx_at(tmp.path(), "16.0.0");
        let fetcher = MigrationFetcher::new(MockRegistry);
        let prompter = crate::prompt::FixedPrompter(true);

        let result = plan(&fetcher, installed, &prompter, HashSet::new(), "nx", "17.0.0", HashMap::new(), HashMap::new(), false).await.unwrap();

        let names: Vec<_> = result.package_json_updates.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["nx", "pkg-a"]);
        assert_eq!(result.package_json_updates[0].1.version.to_string(), "17.0.0");
        assert_eq!(result.package_json_updates[1].1.version.to_string(), "17.0.0");
    }

    #[tokio::test]
    async fn mutually_referencing_package_groups_terminate() {
        let tmp = tempfile::tempdir().unwrap();
        let installed = installed_with_nx_at(tmp.path(), "16.0.0");
        let fetcher = MigrationFetcher::new(MockRegistry);
        let prompter = crate::prompt::FixedPrompter(true);

        let result = plan(&fetcher, installed, &prompter, HashSet::new(), "nx", "17.0.0", HashMap::new(), HashMap::new(), false).await.unwrap();

        // `collectedVersions` blocks nx's re-entry once pkg-a recurses back
        // into it, so each package is planned exactly once.
        assert_eq!(result.package_json_updates.iter().filter(|(name, _)| name == "nx").count(), 1);
        assert_eq!(result.package_json_updates.iter().filter(|(name, _)| name == "pkg-a").count(), 1);
    }

    #[test]
    fn requires_predicate_checks_installed_then_planned_then_extra_check() {
        let tmp = tempfile::tempdir().unwrap();
        let mut resolver = InstalledVersionResolver::new(tmp.path());
        let _ = resolver.installed_version("unrelated", &HashMap::new());
        let fetcher = MigrationFetcher::new(MockRegistry);
        let prompter = crate::prompt::FixedPrompter(true);

        let ctx = PlannerCtx {
            fetcher: &fetcher,
            installed: RefCell::new(resolver),
            prompter: &prompter,
            interactive: false,
            workspace_dependency_names: HashSet::new(),
            extra_check: HashMap::from([("external".to_string(), "3.0.0".to_string())]),
        };
        let mut state = PlannerState {
            package_json_updates: vec![(
                "planned-pkg".to_string(),
                PackageJsonUpdateForPackage {
                    version: semver_normalize::normalize_with_tag_check("2.0.0"),
                    add_to_package_json: AddToPackageJson::Dependencies,
                    always_add_to_package_json: false,
                    if_package_installed: None,
                },
            )],
            collected_versions: HashMap::new(),
            installed_pkg_version_overrides: HashMap::new(),
            to: HashMap::new(),
        };

        let requires: Requirements = vec![("planned-pkg".to_string(), "^2.0.0".to_string()), ("external".to_string(), "^3.0.0".to_string())];
        assert!(requires_satisfied(&requires, &ctx, &state));

        let unmet: Requirements = vec![("nonexistent".to_string(), "^1.0.0".to_string())];
        assert!(!requires_satisfied(&unmet, &ctx, &state));
    }

    #[test]
    fn wildcard_package_group_entries_propagate_parent_override() {
        let mut state = PlannerState {
            package_json_updates: Vec::new(),
            collected_versions: HashMap::new(),
            installed_pkg_version_overrides: HashMap::from([("@nrwl/workspace".to_string(), "17.1.0".to_string())]),
            to: HashMap::new(),
        };
        let group = PackageGroup(vec![PackageGroupEntry { package: "@nrwl/devkit".to_string(), version: Some("*".to_string()) }]);

        let normalized = normalize_package_group("@nrwl/workspace", "17.0.0", &group, &mut state);

        assert_eq!(normalized.0.len(), 1);
        assert_eq!(state.installed_pkg_version_overrides.get("@nrwl/devkit").map(String::as_str), Some("17.1.0"));
    }

    #[test]
    fn pre_14_nrwl_workspace_target_substitutes_legacy_group() {
        let mut state = PlannerState {
            package_json_updates: Vec::new(),
            collected_versions: HashMap::new(),
            installed_pkg_version_overrides: HashMap::new(),
            to: HashMap::new(),
        };
        let normalized = normalize_package_group("@nrwl/workspace", "13.0.0", &PackageGroup::default(), &mut state);
        assert!(normalized.0.iter().any(|entry| entry.package == "@nrwl/workspace"));
    }
}
