//! The package-registry client: `view`, `pack`, `resolveVersion`,
//! `extractFileFromTarball`. Treated as an external collaborator behind a
//! trait, but a concrete implementation is needed to drive the Fetcher,
//! built the same way registry HTTP is handled elsewhere in this codebase:
//! `reqwest` for HTTP, `tar`+`flate2` to unpack tarballs.

use serde_json::Value;
use std::error::Error;
use std::io::Cursor;
use std::path::{Path, PathBuf};

pub type RegistryResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Metadata for one published version of a package, as returned by `view`.
#[derive(Debug, Clone)]
pub struct PackageVersionMetadata {
    pub resolved_version: String,
    pub tarball_url: String,
    /// The `migrations`/`schematics` file path declared under
    /// `nx-migrations`/`ng-update`, if any.
    pub migrations_path: Option<String>,
    /// A `packageGroup` declared directly on the `nx-migrations`/`ng-update`
    /// config object, independent of whatever the migrations file itself
    /// declares.
    pub package_group: Option<Value>,
}

/// The registry contract the Fetcher is built against. A trait (rather than
/// a concrete struct) so tests can supply a scripted double without talking
/// to the network, mirroring the "prompting collaborator" injection design
/// note for the Planner.
pub trait Registry {
    async fn resolve_version(&self, pkg: &str, version_or_tag: &str) -> RegistryResult<String>;
    async fn view(&self, pkg: &str, resolved_version: &str) -> RegistryResult<Option<PackageVersionMetadata>>;
    async fn pack(&self, pkg: &str, resolved_version: &str, dest_dir: &Path) -> RegistryResult<PathBuf>;
    async fn extract_file_from_tarball(
        &self,
        tarball: &Path,
        entry_path: &str,
        out_path: &Path,
    ) -> RegistryResult<PathBuf>;
}

pub struct HttpRegistry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRegistry {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new(), base_url: "https://registry.npmjs.org".to_string() }
    }

    async fn fetch_metadata(&self, pkg: &str) -> RegistryResult<Value> {
        let url = format!("{}/{}", self.base_url, pkg);
        let response = self.client.get(&url).send().await?;
        Ok(response.json().await?)
    }
}

impl Default for HttpRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry for HttpRegistry {
    async fn resolve_version(&self, pkg: &str, version_or_tag: &str) -> RegistryResult<String> {
        let metadata = self.fetch_metadata(pkg).await?;

        if let Some(tag_version) = metadata.get("dist-tags").and_then(|t| t.get(version_or_tag)).and_then(Value::as_str) {
            return Ok(tag_version.to_string());
        }

        let versions = metadata.get("versions").and_then(Value::as_object).ok_or("no versions found")?;

        if versions.contains_key(version_or_tag) {
            return Ok(version_or_tag.to_string());
        }

        let req = crate::semver_normalize::clean_semver(version_or_tag);
        let req = semver::VersionReq::parse(&req).unwrap_or(semver::VersionReq::STAR);

        let mut matching: Vec<semver::Version> = versions
            .keys()
            .filter_map(|v| semver::Version::parse(v).ok())
            .filter(|v| req.matches(v))
            .collect();
        matching.sort();

        matching
            .pop()
            .map(|v| v.to_string())
            .ok_or_else(|| format!("No matching version found for {pkg}@{version_or_tag}").into())
    }

    async fn view(&self, pkg: &str, resolved_version: &str) -> RegistryResult<Option<PackageVersionMetadata>> {
        let metadata = self.fetch_metadata(pkg).await?;
        let Some(version_info) = metadata.get("versions").and_then(|v| v.get(resolved_version)) else {
            return Ok(None);
        };

        let nx_migrations = version_info.get("nx-migrations").or_else(|| version_info.get("ng-update"));
        let Some(nx_migrations) = nx_migrations else {
            return Ok(Some(PackageVersionMetadata {
                resolved_version: resolved_version.to_string(),
                tarball_url: version_info["dist"]["tarball"].as_str().unwrap_or_default().to_string(),
                migrations_path: None,
                package_group: None,
            }));
        };

        let (migrations_path, package_group) = if let Some(path) = nx_migrations.as_str() {
            (Some(path.to_string()), None)
        } else {
            (
                nx_migrations.get("migrations").and_then(Value::as_str).map(str::to_string),
                nx_migrations.get("packageGroup").cloned(),
            )
        };

        Ok(Some(PackageVersionMetadata {
            resolved_version: resolved_version.to_string(),
            tarball_url: version_info["dist"]["tarball"].as_str().unwrap_or_default().to_string(),
            migrations_path,
            package_group,
        }))
    }

    async fn pack(&self, pkg: &str, resolved_version: &str, dest_dir: &Path) -> RegistryResult<PathBuf> {
        let view = self.view(pkg, resolved_version).await?.ok_or("package version not found")?;
        let response = self.client.get(&view.tarball_url).send().await?;
        let bytes = response.bytes().await?;

        std::fs::create_dir_all(dest_dir)?;
        let tarball_path = dest_dir.join(format!("{}-{}.tgz", pkg.replace('/', "-"), resolved_version));
        std::fs::write(&tarball_path, &bytes)?;
        Ok(tarball_path)
    }

    async fn extract_file_from_tarball(
        &self,
        tarball: &Path,
        entry_path: &str,
        out_path: &Path,
    ) -> RegistryResult<PathBuf> {
        let bytes = std::fs::read(tarball)?;
        let tar = flate2::read::GzDecoder::new(Cursor::new(bytes));
        let mut archive = tar::Archive::new(tar);

        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.into_owned();
            let mut components = path.components();
            components.next(); // skip the top-level "package/" directory
            let relative = components.as_path();

            if relative == Path::new(entry_path) {
                if let Some(parent) = out_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                entry.unpack(out_path)?;
                return Ok(out_path.to_path_buf());
            }
        }

        Err(format!("{entry_path} not found in tarball {}", tarball.display()).into())
    }
}
