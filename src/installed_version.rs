//! Installed-Version Resolver: resolves what a package's currently
//! installed version is, if any, relative to the workspace root.

use crate::semver_normalize::{self, Version};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const LEGACY_NX_NAME: &str = "@nrwl/workspace";

pub struct InstalledVersionResolver {
    root: PathBuf,
    cache: HashMap<String, Version>,
}

impl InstalledVersionResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), cache: HashMap::new() }
    }

    /// Returns the version of `pkg` currently present in the workspace, or
    /// `None` if it isn't installed. A returned `None` is meaningful: it
    /// tells the Planner to treat the update as a pure add.
    pub fn installed_version(&mut self, pkg: &str, overrides: &HashMap<String, String>) -> Option<Version> {
        if let Some(raw) = overrides.get(pkg) {
            return Some(semver_normalize::normalize_with_tag_check(raw));
        }

        if let Some(cached) = self.cache.get(pkg) {
            return Some(cached.clone());
        }

        if let Some(version) = self.read_installed_manifest_version(pkg) {
            self.cache.insert(pkg.to_string(), version.clone());
            return Some(version);
        }

        if pkg == "nx" {
            if let Some(cached) = self.cache.get(LEGACY_NX_NAME) {
                return Some(cached.clone());
            }
            if let Some(version) = self.read_installed_manifest_version(LEGACY_NX_NAME) {
                self.cache.insert(LEGACY_NX_NAME.to_string(), version.clone());
                return Some(version);
            }
        }

        None
    }

    fn read_installed_manifest_version(&self, pkg: &str) -> Option<Version> {
        let manifest_path = self.manifest_path_for(pkg);
        let data = std::fs::read_to_string(&manifest_path).ok()?;
        let json: serde_json::Value = serde_json::from_str(&data).ok()?;
        let version_str = json.get("version")?.as_str()?;
        Some(semver_normalize::normalize_with_tag_check(version_str))
    }

    fn manifest_path_for(&self, pkg: &str) -> PathBuf {
        node_modules_manifest(&self.root, pkg)
    }
}

fn node_modules_manifest(root: &Path, pkg: &str) -> PathBuf {
    root.join("node_modules").join(pkg).join("package.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn overrides_win_over_disk_state() {
        let tmp = tempfile::tempdir().unwrap();
        let mut overrides = HashMap::new();
        overrides.insert("nx".to_string(), "17.0.0".to_string());
        let mut resolver = InstalledVersionResolver::new(tmp.path());
        let version = resolver.installed_version("nx", &overrides).unwrap();
        assert_eq!(version.to_string(), "17.0.0");
    }

    #[test]
    fn missing_package_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let mut resolver = InstalledVersionResolver::new(tmp.path());
        assert!(resolver.installed_version("nope", &HashMap::new()).is_none());
    }

    #[test]
    fn legacy_name_fallback_for_nx() {
        let tmp = tempfile::tempdir().unwrap();
        let legacy_dir = tmp.path().join("node_modules").join("@nrwl/workspace");
        fs::create_dir_all(&legacy_dir).unwrap();
        fs::write(legacy_dir.join("package.json"), r#"{"version": "13.0.0"}"#).unwrap();

        let mut resolver = InstalledVersionResolver::new(tmp.path());
        let version = resolver.installed_version("nx", &HashMap::new()).unwrap();
        assert_eq!(version.to_string(), "13.0.0");
    }

    #[test]
    fn cache_is_reused_after_first_success() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("node_modules").join("foo");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("package.json"), r#"{"version": "1.2.3"}"#).unwrap();

        let mut resolver = InstalledVersionResolver::new(tmp.path());
        assert_eq!(resolver.installed_version("foo", &HashMap::new()).unwrap().to_string(), "1.2.3");

        fs::remove_dir_all(&dir).unwrap();
        assert_eq!(resolver.installed_version("foo", &HashMap::new()).unwrap().to_string(), "1.2.3");
    }
}
