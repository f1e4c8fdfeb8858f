//! Workspace manifest I/O: reads and rewrites
//! `<root>/package.json`, preserving the sections it doesn't touch and the
//! file's trailing newline.

use crate::manifest::{AddToPackageJson, PackageJsonUpdateForPackage};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::error::Error;
use std::path::{Path, PathBuf};

const DEPENDENCY_SECTIONS: [&str; 3] = ["dependencies", "devDependencies", "peerDependencies"];

pub struct WorkspaceManifest {
    path: PathBuf,
    value: Value,
    had_trailing_newline: bool,
}

impl WorkspaceManifest {
    pub fn load(root: &Path) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let path = root.join("package.json");
        let data = std::fs::read_to_string(&path)?;
        let had_trailing_newline = data.ends_with('\n');
        let value: Value = serde_json::from_str(&data)?;
        Ok(Self { path, value, had_trailing_newline })
    }

    /// The union of package names already present in `dependencies` and
    /// `devDependencies`.
    pub fn dependency_names(&self) -> HashSet<String> {
        let mut names = HashSet::new();
        for section in ["dependencies", "devDependencies"] {
            if let Some(obj) = self.value.get(section).and_then(Value::as_object) {
                names.extend(obj.keys().cloned());
            }
        }
        names
    }

    pub fn snapshot_dependencies(&self) -> String {
        let deps = self.value.get("dependencies").cloned().unwrap_or(Value::Null);
        let dev_deps = self.value.get("devDependencies").cloned().unwrap_or(Value::Null);
        format!("{deps}{dev_deps}")
    }

    /// Rewrites the version of `pkg` in the section it already appears in;
    /// if absent and `add_to_package_json` names a section, inserts it
    /// there. `AddToPackageJson::False` with the package absent from the
    /// manifest is a planned-but-not-written no-op.
    pub fn apply_update(&mut self, pkg: &str, update: &PackageJsonUpdateForPackage) {
        let version_str = update.version.to_string();
        let mut found_existing = false;

        for section in DEPENDENCY_SECTIONS {
            if let Some(obj) = self.value.get_mut(section).and_then(Value::as_object_mut) {
                if obj.contains_key(pkg) {
                    obj.insert(pkg.to_string(), Value::String(version_str.clone()));
                    found_existing = true;
                }
            }
        }

        if found_existing {
            return;
        }

        let Some(section_name) = update.add_to_package_json.section_name() else {
            return;
        };

        let Some(root) = self.value.as_object_mut() else {
            return;
        };
        let section = root.entry(section_name).or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = section {
            map.insert(pkg.to_string(), Value::String(version_str));
        }
    }

    pub fn write(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut serialized = serde_json::to_string_pretty(&self.value)?;
        if self.had_trailing_newline && !serialized.ends_with('\n') {
            serialized.push('\n');
        }
        std::fs::write(&self.path, serialized)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_manifest(dir: &Path, content: &str) {
        fs::write(dir.join("package.json"), content).unwrap();
    }

    fn update(version: &str, add: AddToPackageJson) -> PackageJsonUpdateForPackage {
        PackageJsonUpdateForPackage {
            version: crate::semver_normalize::normalize_with_tag_check(version),
            add_to_package_json: add,
            always_add_to_package_json: false,
            if_package_installed: None,
        }
    }

    #[test]
    fn rewrites_existing_dependency_version_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(tmp.path(), "{\n  \"dependencies\": {\n    \"q\": \"0.1.0\"\n  }\n}\n");
        let mut manifest = WorkspaceManifest::load(tmp.path()).unwrap();
        manifest.apply_update("q", &update("0.3.0", AddToPackageJson::Dependencies));
        assert_eq!(manifest.value["dependencies"]["q"], Value::String("0.3.0".to_string()));
    }

    #[test]
    fn false_add_to_package_json_leaves_absent_package_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(tmp.path(), "{}\n");
        let mut manifest = WorkspaceManifest::load(tmp.path()).unwrap();
        manifest.apply_update("q", &update("0.3.0", AddToPackageJson::False));
        assert!(manifest.value.get("dependencies").is_none());
    }

    #[test]
    fn inserts_new_dependency_when_requested() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(tmp.path(), "{}\n");
        let mut manifest = WorkspaceManifest::load(tmp.path()).unwrap();
        manifest.apply_update("q", &update("0.3.0", AddToPackageJson::Dependencies));
        assert_eq!(manifest.value["dependencies"]["q"], Value::String("0.3.0".to_string()));
    }

    #[test]
    fn trailing_newline_preserved() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(tmp.path(), "{}\n");
        let manifest = WorkspaceManifest::load(tmp.path()).unwrap();
        manifest.write().unwrap();
        let data = fs::read_to_string(tmp.path().join("package.json")).unwrap();
        assert!(data.ends_with('\n'));
    }
}
