//! The code-modification host: a virtual file tree rooted
//! at the workspace, with an in-memory overlay that's only flushed to disk
//! when the migration that produced it made at least one change.

use std::collections::BTreeMap;
use std::error::Error;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone)]
enum Overlay {
    Write(Vec<u8>),
    Delete,
}

/// A per-migration scratch overlay over the real workspace root. Reads fall
/// through to disk when the path hasn't been touched yet; writes and
/// deletes stay in memory until `flush`.
pub struct Tree {
    root: PathBuf,
    overlay: BTreeMap<PathBuf, Overlay>,
}

impl Tree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), overlay: BTreeMap::new() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn read(&self, path: &Path) -> Option<Vec<u8>> {
        match self.overlay.get(path) {
            Some(Overlay::Write(bytes)) => Some(bytes.clone()),
            Some(Overlay::Delete) => None,
            None => std::fs::read(self.root.join(path)).ok(),
        }
    }

    pub fn exists(&self, path: &Path) -> bool {
        match self.overlay.get(path) {
            Some(Overlay::Write(_)) => true,
            Some(Overlay::Delete) => false,
            None => self.root.join(path).exists(),
        }
    }

    pub fn write(&mut self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) {
        self.overlay.insert(path.into(), Overlay::Write(content.into()));
    }

    pub fn delete(&mut self, path: impl Into<PathBuf>) {
        self.overlay.insert(path.into(), Overlay::Delete);
    }

    /// The changes this migration made, relative to what's on disk.
    pub fn list_changes(&self) -> Vec<FileChange> {
        self.overlay
            .iter()
            .filter_map(|(path, overlay)| {
                let on_disk = self.root.join(path);
                match overlay {
                    Overlay::Write(bytes) => {
                        let unchanged = std::fs::read(&on_disk).map(|existing| existing == *bytes).unwrap_or(false);
                        if unchanged {
                            None
                        } else if on_disk.exists() {
                            Some(FileChange { path: path.clone(), kind: ChangeKind::Update })
                        } else {
                            Some(FileChange { path: path.clone(), kind: ChangeKind::Create })
                        }
                    }
                    Overlay::Delete => on_disk.exists().then(|| FileChange { path: path.clone(), kind: ChangeKind::Delete }),
                }
            })
            .collect()
    }

    /// Writes every change to disk. Only called once the caller has
    /// confirmed `list_changes()` is non-empty.
    pub fn flush(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        for change in self.list_changes() {
            let on_disk = self.root.join(&change.path);
            match change.kind {
                ChangeKind::Delete => {
                    if on_disk.exists() {
                        std::fs::remove_file(&on_disk)?;
                    }
                }
                ChangeKind::Create | ChangeKind::Update => {
                    if let Some(parent) = on_disk.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    if let Some(Overlay::Write(bytes)) = self.overlay.get(&change.path) {
                        std::fs::write(&on_disk, bytes)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_path_reads_through_to_disk() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"hello").unwrap();
        let tree = Tree::new(tmp.path());
        assert_eq!(tree.read(Path::new("a.txt")), Some(b"hello".to_vec()));
    }

    #[test]
    fn identical_write_produces_no_change() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"hello").unwrap();
        let mut tree = Tree::new(tmp.path());
        tree.write("a.txt", b"hello".to_vec());
        assert!(tree.list_changes().is_empty());
    }

    #[test]
    fn new_file_is_a_create_and_flush_writes_it() {
        let tmp = tempfile::tempdir().unwrap();
        let mut tree = Tree::new(tmp.path());
        tree.write("new.txt", b"content".to_vec());
        let changes = tree.list_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Create);
        tree.flush().unwrap();
        assert_eq!(std::fs::read(tmp.path().join("new.txt")).unwrap(), b"content");
    }
}
