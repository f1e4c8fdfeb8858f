//! Argument Parser for the plan command. Pure parsing logic,
//! deliberately separated from the `clap`-derived CLI surface in `cli.rs`
//! so it's testable without building a `Cli` value. The same separation is
//! kept elsewhere between a `clap`-derived `Commands` enum and the plain
//! struct its handlers actually consume.

use crate::error::MigrateError;
use std::collections::HashMap;

const NX_MIN_VERSION: &str = "14.0.0-beta.0";

/// The raw, unparsed fields `clap` hands us.
#[derive(Debug, Clone, Default)]
pub struct RawMigrateArgs {
    pub package_and_version: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub interactive: bool,
    /// `Some(path)` when `--run-migrations` was passed; `Some("")` means
    /// the flag was present with no value (defaults to `migrations.json`).
    pub run_migrations: Option<String>,
}

#[derive(Debug, Clone)]
pub enum MigrateOptions {
    RunMigrations { path: String },
    GenerateMigrations {
        target_package: String,
        target_version: String,
        from: HashMap<String, String>,
        to: HashMap<String, String>,
        interactive: bool,
    },
}

pub fn parse_migrations_options(raw: &RawMigrateArgs) -> Result<MigrateOptions, MigrateError> {
    if let Some(path) = &raw.run_migrations {
        let path = if path.is_empty() { "migrations.json".to_string() } else { path.clone() };
        return Ok(MigrateOptions::RunMigrations { path });
    }

    let from = parse_version_overrides(raw.from.as_deref(), "from")?;
    let to = parse_version_overrides(raw.to.as_deref(), "to")?;

    let package_and_version = raw
        .package_and_version
        .as_deref()
        .ok_or_else(|| MigrateError::InputError("a package and/or version must be specified".to_string()))?;

    let (target_package, target_version) = disambiguate_package_and_version(package_and_version);

    Ok(MigrateOptions::GenerateMigrations {
        target_package: normalize_package_name(&target_package),
        target_version,
        from,
        to,
        interactive: raw.interactive,
    })
}

/// Parses `"pkg1@v1,pkg2@v2"` lists. Each entry must contain `@` not at
/// index 0; otherwise fail naming the offending parameter.
fn parse_version_overrides(raw: Option<&str>, param_name: &str) -> Result<HashMap<String, String>, MigrateError> {
    let Some(raw) = raw else {
        return Ok(HashMap::new());
    };
    if raw.is_empty() {
        return Ok(HashMap::new());
    }

    let mut out = HashMap::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        let at_index = entry.find('@');
        match at_index {
            Some(0) | None => {
                return Err(MigrateError::InputError(format!(
                    "Invalid value for --{param_name}: '{entry}' must be of the form pkg@version"
                )));
            }
            Some(idx) => {
                let (pkg, version) = entry.split_at(idx);
                out.insert(normalize_package_name(pkg), version[1..].to_string());
            }
        }
    }
    Ok(out)
}

fn disambiguate_package_and_version(input: &str) -> (String, String) {
    if let Some(idx) = input.rfind('@') {
        if idx > 0 {
            let (pkg, version) = input.split_at(idx);
            return (pkg.to_string(), version[1..].to_string());
        }
    }

    if looks_like_bare_version(input) {
        let is_tag = input == "latest" || input == "next";
        let targets_nx = is_tag || crate::semver_normalize::lte(NX_MIN_VERSION, input);
        let target_package = if targets_nx { "nx".to_string() } else { "@nrwl/workspace".to_string() };
        return (target_package, input.to_string());
    }

    (input.to_string(), "latest".to_string())
}

fn looks_like_bare_version(input: &str) -> bool {
    input == "latest" || input == "next" || semver::Version::parse(input).is_ok() || is_numeric_shorthand(input)
}

fn is_numeric_shorthand(input: &str) -> bool {
    let parts: Vec<&str> = input.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return false;
    }
    parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

fn normalize_package_name(name: &str) -> String {
    name.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(package_and_version: &str) -> RawMigrateArgs {
        RawMigrateArgs { package_and_version: Some(package_and_version.to_string()), ..Default::default() }
    }

    #[test]
    fn legacy_branch_for_bare_pre_14_version() {
        let opts = parse_migrations_options(&raw("13.9.0")).unwrap();
        match opts {
            MigrateOptions::GenerateMigrations { target_package, target_version, .. } => {
                assert_eq!(target_package, "@nrwl/workspace");
                assert_eq!(target_version, "13.9.0");
            }
            _ => panic!("expected GenerateMigrations"),
        }
    }

    #[test]
    fn nx_branch_for_bare_post_14_version() {
        let opts = parse_migrations_options(&raw("16.0.0")).unwrap();
        match opts {
            MigrateOptions::GenerateMigrations { target_package, target_version, .. } => {
                assert_eq!(target_package, "nx");
                assert_eq!(target_version, "16.0.0");
            }
            _ => panic!("expected GenerateMigrations"),
        }
    }

    #[test]
    fn tag_is_treated_as_bare_version_targeting_nx() {
        let opts = parse_migrations_options(&raw("latest")).unwrap();
        match opts {
            MigrateOptions::GenerateMigrations { target_package, target_version, .. } => {
                assert_eq!(target_package, "nx");
                assert_eq!(target_version, "latest");
            }
            _ => panic!("expected GenerateMigrations"),
        }
    }

    #[test]
    fn bare_package_name_defaults_to_latest() {
        let opts = parse_migrations_options(&raw("@myorg/mypkg")).unwrap();
        match opts {
            MigrateOptions::GenerateMigrations { target_package, target_version, .. } => {
                assert_eq!(target_package, "@myorg/mypkg");
                assert_eq!(target_version, "latest");
            }
            _ => panic!("expected GenerateMigrations"),
        }
    }

    #[test]
    fn package_at_version_splits_on_last_at() {
        let opts = parse_migrations_options(&raw("@myorg/mypkg@2.0.0")).unwrap();
        match opts {
            MigrateOptions::GenerateMigrations { target_package, target_version, .. } => {
                assert_eq!(target_package, "@myorg/mypkg");
                assert_eq!(target_version, "2.0.0");
            }
            _ => panic!("expected GenerateMigrations"),
        }
    }

    #[test]
    fn from_list_parses_into_overrides() {
        let mut args = raw("nx@16.0.0");
        args.from = Some("a@1.2.3,b@2.0.0".to_string());
        let opts = parse_migrations_options(&args).unwrap();
        match opts {
            MigrateOptions::GenerateMigrations { from, .. } => {
                assert_eq!(from.get("a").unwrap(), "1.2.3");
                assert_eq!(from.get("b").unwrap(), "2.0.0");
            }
            _ => panic!("expected GenerateMigrations"),
        }
    }

    #[test]
    fn malformed_from_raises_input_error() {
        let mut args = raw("nx@16.0.0");
        args.from = Some("bad".to_string());
        let err = parse_migrations_options(&args).unwrap_err();
        match err {
            MigrateError::InputError(msg) => assert!(msg.contains("from")),
            other => panic!("expected InputError, got {other:?}"),
        }
    }

    #[test]
    fn run_migrations_empty_value_defaults_to_migrations_json() {
        let args = RawMigrateArgs { run_migrations: Some(String::new()), ..Default::default() };
        let opts = parse_migrations_options(&args).unwrap();
        match opts {
            MigrateOptions::RunMigrations { path } => assert_eq!(path, "migrations.json"),
            _ => panic!("expected RunMigrations"),
        }
    }
}
