//! The migration manifest data model: the "as-parsed" shape a
//! registry-hosted `migrations.json` can take, and the normalized shape the
//! rest of the crate works with. `serde_json` is built with the
//! `preserve_order` feature so the `Map` we walk below iterates in the
//! order keys appeared in the source document. Declared order is load-
//! bearing throughout the Planner's traversal.

use crate::semver_normalize::{self, Version};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error;

/// One entry of the persisted `migrations.json` list: the shape
/// both the Planner writes and the Runner reads back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationListEntry {
    pub package: String,
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implementation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cli: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsFile {
    pub migrations: Vec<MigrationListEntry>,
}

/// Whether (and where) an update should be written into the root manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddToPackageJson {
    False,
    Dependencies,
    DevDependencies,
}

impl AddToPackageJson {
    fn from_value(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            Some("dependencies") => AddToPackageJson::Dependencies,
            Some("devDependencies") => AddToPackageJson::DevDependencies,
            _ => AddToPackageJson::False,
        }
    }

    pub fn section_name(&self) -> Option<&'static str> {
        match self {
            AddToPackageJson::False => None,
            AddToPackageJson::Dependencies => Some("dependencies"),
            AddToPackageJson::DevDependencies => Some("devDependencies"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PackageJsonUpdateForPackage {
    pub version: Version,
    pub add_to_package_json: AddToPackageJson,
    pub always_add_to_package_json: bool,
    pub if_package_installed: Option<String>,
}

/// A `requires` precondition map, kept in declared order: `package -> range`.
pub type Requirements = Vec<(String, String)>;

#[derive(Debug, Clone)]
pub struct PackageJsonUpdateEntry {
    pub version: Version,
    pub packages: Vec<(String, PackageJsonUpdateForPackage)>,
    pub requires: Requirements,
    pub x_prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorCli {
    Nx,
    Angular,
}

#[derive(Debug, Clone)]
pub enum GeneratorImplementation {
    Implementation(String),
    Factory(String),
}

#[derive(Debug, Clone)]
pub struct MigrationGenerator {
    pub version: Version,
    pub description: Option<String>,
    pub implementation: GeneratorImplementation,
    pub cli: Option<GeneratorCli>,
    pub requires: Requirements,
}

/// One package-group member: a bare name (version defaults to the parent's
/// target version) or an explicit `{package, version}` pair.
#[derive(Debug, Clone)]
pub struct PackageGroupEntry {
    pub package: String,
    /// `None` means the entry was a bare string; `Some("*")` means
    /// propagate the parent override.
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PackageGroup(pub Vec<PackageGroupEntry>);

#[derive(Debug, Clone, Default)]
pub struct MigrationManifest {
    pub version: Version,
    pub package_json_updates: Vec<(String, PackageJsonUpdateEntry)>,
    pub generators: Vec<(String, MigrationGenerator)>,
    pub package_group: PackageGroup,
}

pub fn parse_manifest(value: &Value, fallback_version: &Version) -> Result<MigrationManifest, Box<dyn Error + Send + Sync>> {
    let obj = value.as_object().ok_or("migration manifest is not a JSON object")?;

    let version = obj
        .get("version")
        .and_then(Value::as_str)
        .map(semver_normalize::normalize_with_tag_check)
        .unwrap_or_else(|| fallback_version.clone());

    let package_json_updates = match obj.get("packageJsonUpdates") {
        Some(Value::Object(map)) => parse_package_json_updates(map)?,
        _ => Vec::new(),
    };

    // An older shape uses `schematics` instead of `generators`; rename it on
    // load so the rest of the crate only ever sees `generators`.
    let generators_key = if obj.contains_key("generators") {
        "generators"
    } else if obj.contains_key("schematics") {
        "schematics"
    } else {
        "generators"
    };

    let generators = match obj.get(generators_key) {
        Some(Value::Object(map)) => parse_generators(map)?,
        _ => Vec::new(),
    };

    let package_group = match obj.get("packageGroup") {
        Some(v) => parse_package_group(v)?,
        None => PackageGroup::default(),
    };

    Ok(MigrationManifest {
        version,
        package_json_updates,
        generators,
        package_group,
    })
}

fn parse_package_json_updates(
    map: &Map<String, Value>,
) -> Result<Vec<(String, PackageJsonUpdateEntry)>, Box<dyn Error + Send + Sync>> {
    let mut entries = Vec::with_capacity(map.len());
    for (key, value) in map {
        let obj = value.as_object().ok_or("packageJsonUpdates entry is not an object")?;

        let version = obj
            .get("version")
            .and_then(Value::as_str)
            .map(semver_normalize::normalize_with_tag_check)
            .unwrap_or_else(Version::zero);

        let packages = match obj.get("packages") {
            Some(Value::Object(pkgs)) => parse_packages_for_update(pkgs)?,
            _ => Vec::new(),
        };

        let requires = parse_requires(obj.get("requires"));
        let x_prompt = obj.get("x-prompt").and_then(Value::as_str).map(str::to_string);

        entries.push((
            key.clone(),
            PackageJsonUpdateEntry { version, packages, requires, x_prompt },
        ));
    }
    Ok(entries)
}

fn parse_packages_for_update(
    map: &Map<String, Value>,
) -> Result<Vec<(String, PackageJsonUpdateForPackage)>, Box<dyn Error + Send + Sync>> {
    let mut out = Vec::with_capacity(map.len());
    for (name, value) in map {
        let obj = value.as_object().ok_or("package update entry is not an object")?;
        let version = obj
            .get("version")
            .and_then(Value::as_str)
            .map(semver_normalize::normalize_with_tag_check)
            .unwrap_or_else(Version::zero);
        let add_to_package_json = AddToPackageJson::from_value(obj.get("addToPackageJson"));
        let always_add_to_package_json = obj
            .get("alwaysAddToPackageJson")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let if_package_installed = obj
            .get("ifPackageInstalled")
            .and_then(Value::as_str)
            .map(str::to_string);

        out.push((
            name.clone(),
            PackageJsonUpdateForPackage {
                version,
                add_to_package_json,
                always_add_to_package_json,
                if_package_installed,
            },
        ));
    }
    Ok(out)
}

fn parse_requires(value: Option<&Value>) -> Requirements {
    let Some(Value::Object(map)) = value else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect()
}

fn parse_generators(
    map: &Map<String, Value>,
) -> Result<Vec<(String, MigrationGenerator)>, Box<dyn Error + Send + Sync>> {
    let mut out = Vec::with_capacity(map.len());
    for (name, value) in map {
        let obj = value.as_object().ok_or("generator entry is not an object")?;
        let version = obj
            .get("version")
            .and_then(Value::as_str)
            .map(semver_normalize::normalize_with_tag_check)
            .unwrap_or_else(Version::zero);
        let description = obj.get("description").and_then(Value::as_str).map(str::to_string);

        let implementation = if let Some(path) = obj.get("implementation").and_then(Value::as_str) {
            GeneratorImplementation::Implementation(path.to_string())
        } else if let Some(path) = obj.get("factory").and_then(Value::as_str) {
            GeneratorImplementation::Factory(path.to_string())
        } else {
            return Err(format!("generator '{name}' has neither implementation nor factory").into());
        };

        let cli = match obj.get("cli").and_then(Value::as_str) {
            Some("nx") => Some(GeneratorCli::Nx),
            Some("angular") => Some(GeneratorCli::Angular),
            _ => None,
        };

        let requires = parse_requires(obj.get("requires"));

        out.push((
            name.clone(),
            MigrationGenerator { version, description, implementation, cli, requires },
        ));
    }
    Ok(out)
}

fn parse_package_group(value: &Value) -> Result<PackageGroup, Box<dyn Error + Send + Sync>> {
    match value {
        Value::Array(items) => {
            let mut entries = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(name) => entries.push(PackageGroupEntry {
                        package: name.clone(),
                        version: None,
                    }),
                    Value::Object(obj) => {
                        let package = obj
                            .get("package")
                            .and_then(Value::as_str)
                            .ok_or("packageGroup entry missing 'package'")?
                            .to_string();
                        let version = obj.get("version").and_then(Value::as_str).map(str::to_string);
                        entries.push(PackageGroupEntry { package, version });
                    }
                    _ => return Err("packageGroup list entry must be a string or object".into()),
                }
            }
            Ok(PackageGroup(entries))
        }
        Value::Object(map) => {
            let entries = map
                .iter()
                .filter_map(|(k, v)| {
                    v.as_str().map(|version| PackageGroupEntry {
                        package: k.clone(),
                        version: Some(version.to_string()),
                    })
                })
                .collect();
            Ok(PackageGroup(entries))
        }
        Value::Null => Ok(PackageGroup::default()),
        _ => Err("packageGroup must be an array or object".into()),
    }
}

/// Hard-coded legacy package group for `@nrwl/workspace` below
/// `14.0.0-beta.0`. Frozen by design; whether newer legacy
/// packages should be appended is an open question left undecided (see
/// DESIGN.md).
pub fn legacy_nrwl_workspace_group() -> PackageGroup {
    const LEGACY_PACKAGES: &[&str] = &[
        "@nrwl/angular",
        "@nrwl/cypress",
        "@nrwl/devkit",
        "@nrwl/eslint-plugin-nx",
        "@nrwl/express",
        "@nrwl/jest",
        "@nrwl/linter",
        "@nrwl/nest",
        "@nrwl/next",
        "@nrwl/node",
        "@nrwl/nx-plugin",
        "@nrwl/react",
        "@nrwl/storybook",
        "@nrwl/web",
        "@nrwl/workspace",
    ];

    let mut entries: Vec<PackageGroupEntry> = LEGACY_PACKAGES
        .iter()
        .map(|name| PackageGroupEntry { package: name.to_string(), version: Some("*".to_string()) })
        .collect();
    entries.push(PackageGroupEntry { package: "@nrwl/nx-cloud".to_string(), version: Some("latest".to_string()) });
    PackageGroup(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schematics_key_renamed_to_generators() {
        let value = json!({
            "version": "1.0.0",
            "schematics": {
                "update-1": { "version": "1.0.0", "implementation": "./update-1" }
            }
        });
        let manifest = parse_manifest(&value, &Version::zero()).unwrap();
        assert_eq!(manifest.generators.len(), 1);
        assert_eq!(manifest.generators[0].0, "update-1");
    }

    #[test]
    fn package_group_map_preserves_insertion_order() {
        let value = json!({ "a": "1.0.0", "b": "*", "c": "2.0.0" });
        let group = parse_package_group(&value).unwrap();
        let names: Vec<_> = group.0.iter().map(|e| e.package.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn package_group_list_bare_strings() {
        let value = json!(["a", { "package": "b", "version": "2.0.0" }]);
        let group = parse_package_group(&value).unwrap();
        assert_eq!(group.0[0].package, "a");
        assert_eq!(group.0[0].version, None);
        assert_eq!(group.0[1].package, "b");
        assert_eq!(group.0[1].version.as_deref(), Some("2.0.0"));
    }
}
