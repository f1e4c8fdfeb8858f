//! The external adapter for non-`nx` migrations: a migration
//! list entry whose `cli` field is present and isn't `"nx"` is delegated
//! verbatim to whatever tool understands that CLI's own migration schematics
//! (e.g. Angular's `ng update`). The Runner stops at this boundary the same
//! way it stops at [`crate::migration_impl::MigrationImplementationLoader`]
//! for `nx` migrations.

use std::error::Error;
use std::path::Path;

pub struct AdapterOutcome {
    pub made_changes: bool,
    pub logging_queue: Vec<String>,
}

pub trait MigrationAdapter {
    fn run(
        &self,
        root: &Path,
        pkg: &str,
        name: &str,
        verbose: bool,
    ) -> Result<AdapterOutcome, Box<dyn Error + Send + Sync>>;
}

/// Used when no host-specific adapter has been wired up. Fails loudly with
/// an `AdapterError`-shaped message rather than silently skipping.
pub struct UnimplementedAdapter;

impl MigrationAdapter for UnimplementedAdapter {
    fn run(&self, _root: &Path, pkg: &str, name: &str, _verbose: bool) -> Result<AdapterOutcome, Box<dyn Error + Send + Sync>> {
        Err(format!("no external adapter configured for non-nx migration '{name}' in package '{pkg}'").into())
    }
}
