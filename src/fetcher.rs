//! Migration Fetcher: resolves a `(package, versionOrTag)`
//! request into a `MigrationManifest`, registry-first with a temp-install
//! fallback, memoized per `(name, version)` so concurrent callers coalesce.

use crate::error::MigrateError;
use crate::manifest::{self, MigrationManifest};
use crate::registry::Registry;
use std::cell::RefCell;
use std::collections::HashMap;
use std::error::Error;
use std::rc::Rc;
use tokio::sync::Notify;

type FetchResult<T> = Result<T, String>;

/// A cache that coalesces concurrent requests for the same key: the first
/// caller to miss inserts a pending marker and computes the value; later
/// callers for the same key wait on that marker instead of recomputing it.
struct CoalescingCache<V: Clone> {
    done: RefCell<HashMap<String, FetchResult<V>>>,
    pending: RefCell<HashMap<String, Rc<Notify>>>,
}

impl<V: Clone> CoalescingCache<V> {
    fn new() -> Self {
        Self { done: RefCell::new(HashMap::new()), pending: RefCell::new(HashMap::new()) }
    }

    fn get(&self, key: &str) -> Option<FetchResult<V>> {
        self.done.borrow().get(key).cloned()
    }

    /// Marks `key` as in-flight, or returns the notify handle to wait on if
    /// someone else already claimed it.
    fn claim_or_wait(&self, key: &str) -> Result<(), Rc<Notify>> {
        if let Some(notify) = self.pending.borrow().get(key) {
            return Err(Rc::clone(notify));
        }
        self.pending.borrow_mut().insert(key.to_string(), Rc::new(Notify::new()));
        Ok(())
    }

    fn complete(&self, key: &str, resolved_key: Option<&str>, value: FetchResult<V>) {
        self.done.borrow_mut().insert(key.to_string(), value.clone());
        if let Some(resolved_key) = resolved_key {
            if resolved_key != key {
                self.done.borrow_mut().insert(resolved_key.to_string(), value);
            }
        }
        if let Some(notify) = self.pending.borrow_mut().remove(key) {
            notify.notify_waiters();
        }
    }
}

pub struct MigrationFetcher<R: Registry> {
    registry: R,
    manifests: CoalescingCache<Rc<MigrationManifest>>,
    resolved_versions: CoalescingCache<String>,
}

impl<R: Registry> MigrationFetcher<R> {
    pub fn new(registry: R) -> Self {
        Self {
            registry,
            manifests: CoalescingCache::new(),
            resolved_versions: CoalescingCache::new(),
        }
    }

    pub async fn fetch(&self, pkg: &str, version_or_tag: &str) -> Result<Rc<MigrationManifest>, Box<dyn Error + Send + Sync>> {
        let request_key = cache_key(pkg, version_or_tag);

        if let Some(result) = self.manifests.get(&request_key) {
            return result.map_err(Into::into);
        }

        let resolved = self.resolve_version_cached(pkg, version_or_tag).await?;
        let resolved_key = cache_key(pkg, &resolved);

        if let Some(result) = self.manifests.get(&resolved_key) {
            self.manifests.complete(&request_key, None, result.clone());
            return result.map_err(Into::into);
        }

        match self.manifests.claim_or_wait(&request_key) {
            Err(notify) => {
                notify.notified().await;
                return self
                    .manifests
                    .get(&request_key)
                    .unwrap_or(Err("fetch coalescing lost its result".to_string()))
                    .map_err(Into::into);
            }
            Ok(()) => {}
        }

        let computed = self.fetch_uncached(pkg, &resolved).await;
        let stringified = computed.as_ref().map(|m| m.clone()).map_err(|e| e.to_string());
        self.manifests.complete(&request_key, Some(&resolved_key), stringified);
        computed
    }

    async fn resolve_version_cached(&self, pkg: &str, version_or_tag: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        let key = cache_key(pkg, version_or_tag);
        if let Some(result) = self.resolved_versions.get(&key) {
            return result.map_err(Into::into);
        }

        match self.resolved_versions.claim_or_wait(&key) {
            Err(notify) => {
                notify.notified().await;
                return self
                    .resolved_versions
                    .get(&key)
                    .unwrap_or(Err("version resolution coalescing lost its result".to_string()))
                    .map_err(Into::into);
            }
            Ok(()) => {}
        }

        let resolved = self.registry.resolve_version(pkg, version_or_tag).await;
        let stringified = resolved.as_ref().map(|v| v.clone()).map_err(|e| e.to_string());
        self.resolved_versions.complete(&key, None, stringified);
        resolved
    }

    async fn fetch_uncached(&self, pkg: &str, resolved_version: &str) -> Result<Rc<MigrationManifest>, Box<dyn Error + Send + Sync>> {
        match self.fetch_via_registry(pkg, resolved_version).await {
            Ok(manifest) => Ok(Rc::new(manifest)),
            Err(registry_err) => match self.fetch_via_temp_install(pkg, resolved_version).await {
                Ok(manifest) => Ok(Rc::new(manifest)),
                Err(install_err) => Err(MigrateError::RegistryTransient(format!(
                    "registry fetch of {pkg}@{resolved_version} failed ({registry_err}), install fallback also failed ({install_err})"
                ))
                .into()),
            },
        }
    }

    async fn fetch_via_registry(&self, pkg: &str, resolved_version: &str) -> Result<MigrationManifest, Box<dyn Error + Send + Sync>> {
        let version = crate::semver_normalize::normalize_with_tag_check(resolved_version);

        let Some(view) = self.registry.view(pkg, resolved_version).await? else {
            return Ok(MigrationManifest { version, ..Default::default() });
        };

        let package_group = match &view.package_group {
            Some(value) => manifest::parse_package_group(value)?,
            None => Default::default(),
        };

        let Some(migrations_path) = &view.migrations_path else {
            return Ok(MigrationManifest { version, package_group, ..Default::default() });
        };

        let tmp = tempfile_dir(pkg, resolved_version)?;
        let result = self.extract_and_parse(pkg, resolved_version, migrations_path, &tmp).await;
        let _ = std::fs::remove_dir_all(&tmp);

        let mut parsed = result.map_err(|_| -> Box<dyn Error + Send + Sync> {
            crate::error::MigrateError::MigrationsFileMissing {
                package: pkg.to_string(),
                version: resolved_version.to_string(),
                path: migrations_path.clone(),
            }
            .into()
        })?;
        parsed.version = version;
        if parsed.package_group.0.is_empty() {
            parsed.package_group = package_group;
        }
        Ok(parsed)
    }

    async fn extract_and_parse(
        &self,
        pkg: &str,
        resolved_version: &str,
        migrations_path: &str,
        tmp: &std::path::Path,
    ) -> Result<MigrationManifest, Box<dyn Error + Send + Sync>> {
        let tarball = self.registry.pack(pkg, resolved_version, tmp).await?;
        let out_path = tmp.join("migrations.json");
        self.registry.extract_file_from_tarball(&tarball, migrations_path, &out_path).await?;
        let data = std::fs::read_to_string(&out_path)?;
        let value: serde_json::Value = serde_json::from_str(&data)?;
        let fallback = crate::semver_normalize::normalize_with_tag_check(resolved_version);
        manifest::parse_manifest(&value, &fallback)
    }

    /// Fallback path: read the package's own manifest for
    /// its `nx-migrations`/`ng-update` config and resolve the migrations
    /// file relative to it.
    async fn fetch_via_temp_install(&self, pkg: &str, resolved_version: &str) -> Result<MigrationManifest, Box<dyn Error + Send + Sync>> {
        let tmp = tempfile_dir(pkg, resolved_version)?;
        let result = self.install_and_read(pkg, resolved_version, &tmp).await;
        let _ = std::fs::remove_dir_all(&tmp);
        result
    }

    async fn install_and_read(
        &self,
        pkg: &str,
        resolved_version: &str,
        tmp: &std::path::Path,
    ) -> Result<MigrationManifest, Box<dyn Error + Send + Sync>> {
        let tarball = self.registry.pack(pkg, resolved_version, tmp).await?;
        let package_json_out = tmp.join("package.json");
        self.registry.extract_file_from_tarball(&tarball, "package.json", &package_json_out).await?;

        let data = std::fs::read_to_string(&package_json_out)?;
        let own_manifest: serde_json::Value = serde_json::from_str(&data)?;
        let version = crate::semver_normalize::normalize_with_tag_check(resolved_version);

        let nx_migrations = own_manifest.get("nx-migrations").or_else(|| own_manifest.get("ng-update"));
        let Some(nx_migrations) = nx_migrations else {
            return Ok(MigrationManifest { version, ..Default::default() });
        };

        let migrations_path = if let Some(path) = nx_migrations.as_str() {
            path.to_string()
        } else if let Some(path) = nx_migrations.get("migrations").and_then(serde_json::Value::as_str) {
            path.to_string()
        } else {
            return Ok(MigrationManifest { version, ..Default::default() });
        };

        let migrations_out = tmp.join("resolved-migrations.json");
        self.registry.extract_file_from_tarball(&tarball, &migrations_path, &migrations_out).await?;
        let migrations_data = std::fs::read_to_string(&migrations_out)?;
        let migrations_value: serde_json::Value = serde_json::from_str(&migrations_data)?;
        let mut parsed = manifest::parse_manifest(&migrations_value, &version)?;
        parsed.version = version;
        Ok(parsed)
    }
}

fn cache_key(pkg: &str, version_or_tag: &str) -> String {
    format!("{pkg}-{version_or_tag}")
}

fn tempfile_dir(pkg: &str, version: &str) -> Result<std::path::PathBuf, Box<dyn Error + Send + Sync>> {
    let mut dir = std::env::temp_dir();
    dir.push(format!("nx-migrate-{}-{}-{}", pkg.replace('/', "_"), version, std::process::id()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
