//! Persisted migration list I/O: `<root>/migrations.json`.

use crate::manifest::{MigrationListEntry, MigrationsFile};
use std::error::Error;
use std::path::Path;

pub fn read(path: &Path) -> Result<Option<MigrationsFile>, Box<dyn Error + Send + Sync>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    let file: MigrationsFile = serde_json::from_str(&data)?;
    Ok(Some(file))
}

/// Written only if `entries` is non-empty.
pub fn write(path: &Path, entries: &[MigrationListEntry]) -> Result<(), Box<dyn Error + Send + Sync>> {
    if entries.is_empty() {
        return Ok(());
    }
    let file = MigrationsFile { migrations: entries.to_vec() };
    let serialized = serde_json::to_string_pretty(&file)?;
    std::fs::write(path, serialized)?;
    Ok(())
}
