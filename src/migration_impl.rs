//! Dynamic loading of migration implementations: treated as an external
//! collaborator with the fixed signature `(tree, options) -> ()`.
//! Implementation discovery (resolve path in a manifest's directory) is
//! mechanical and stays outside the planner's pure logic. The Runner is
//! parameterized on a loader so a real host can wire up whatever
//! JS/native bridge it has; this crate stops at the boundary.

use crate::tree::Tree;
use serde_json::Value;
use std::error::Error;
use std::path::Path;

pub trait MigrationImplementation {
    fn run(&self, tree: &mut Tree, options: &Value) -> Result<(), Box<dyn Error + Send + Sync>>;
}

pub trait MigrationImplementationLoader {
    /// Resolves `implementation_path` relative to `package_root` and
    /// returns the callable migration. `package_root` is the directory the
    /// package's own `nx-migrations`/`ng-update` config was declared in.
    fn load(
        &self,
        package_root: &Path,
        implementation_path: &str,
    ) -> Result<Box<dyn MigrationImplementation>, Box<dyn Error + Send + Sync>>;
}

/// The loader used when no host-specific bridge has been wired up. Every
/// resolution fails with an `AdapterError`-shaped message naming what was
/// requested, so the Runner's per-migration error path is exercised the
/// same way it would be with a real loader.
pub struct UnimplementedLoader;

impl MigrationImplementationLoader for UnimplementedLoader {
    fn load(&self, package_root: &Path, implementation_path: &str) -> Result<Box<dyn MigrationImplementation>, Box<dyn Error + Send + Sync>> {
        Err(format!(
            "no migration implementation loader configured for {} (package root {})",
            implementation_path,
            package_root.display()
        )
        .into())
    }
}
