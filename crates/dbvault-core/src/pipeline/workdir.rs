//! Filesystem scopes owned by one pipeline invocation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::RngCore;
use tracing::{debug, warn};

const MAX_CREATE_ATTEMPTS: usize = 8;

/// Unique directory removed recursively when the scope ends.
///
/// `close` removes it explicitly and reports failures; dropping the
/// scope (early return, panic, cancelled future) removes it best-effort.
#[derive(Debug)]
pub struct ScopedWorkDir {
    path: PathBuf,
    removed: bool,
}

impl ScopedWorkDir {
    /// Creates `<root>/<label>-<random>`; `root` is created if absent.
    pub fn create(root: &Path, label: &str) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        let mut last_err = None;
        for _ in 0..MAX_CREATE_ATTEMPTS {
            let mut suffix = [0u8; 8];
            rand::thread_rng().fill_bytes(&mut suffix);
            let path = root.join(format!("{}-{}", label, hex::encode(suffix)));
            match fs::create_dir(&path) {
                Ok(()) => {
                    debug!("Created work directory {:?}", path);
                    return Ok(Self {
                        path,
                        removed: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AlreadyExists, "no unique work directory name")
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }

    pub fn close(mut self) -> io::Result<()> {
        self.removed = true;
        remove_tree(&self.path)
    }
}

impl Drop for ScopedWorkDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = remove_tree(&self.path) {
            warn!("Failed to remove work directory {:?}: {}", self.path, e);
        }
    }
}

fn remove_tree(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            debug!("Removed work directory {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Intermediate backup artifacts, deleted unless explicitly kept.
///
/// Deletion is advisory: failures are logged and returned as warnings,
/// never raised over the pipeline's own result.
#[derive(Debug, Default)]
pub struct IntermediateFiles {
    paths: Vec<PathBuf>,
}

impl IntermediateFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, path: &Path) {
        self.paths.push(path.to_path_buf());
    }

    /// Hands the artifacts over to the caller; nothing is deleted.
    pub fn keep(mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.paths)
            .into_iter()
            .filter(|p| p.exists())
            .collect()
    }

    /// Deletes every tracked artifact that exists.
    pub fn cleanup(mut self) -> Vec<String> {
        remove_files(std::mem::take(&mut self.paths))
    }
}

impl Drop for IntermediateFiles {
    fn drop(&mut self) {
        remove_files(std::mem::take(&mut self.paths));
    }
}

fn remove_files(paths: Vec<PathBuf>) -> Vec<String> {
    let mut warnings = Vec::new();
    for path in paths {
        match fs::remove_file(&path) {
            Ok(()) => debug!("Removed intermediate file {:?}", path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!("Failed to remove intermediate file {:?}: {}", path, e);
                warnings.push(format!("could not remove {}: {}", path.display(), e));
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_work_dir_removed_on_close_and_drop() {
        let root = TempDir::new().unwrap();

        let closed = ScopedWorkDir::create(root.path(), "restore").unwrap();
        let closed_path = closed.path().to_path_buf();
        fs::create_dir_all(closed.join("extracted/nested")).unwrap();
        fs::write(closed.join("extracted/nested/a.sql"), b"x").unwrap();
        closed.close().unwrap();
        assert!(!closed_path.exists());

        let dropped_path = {
            let dropped = ScopedWorkDir::create(root.path(), "restore").unwrap();
            fs::write(dropped.join("backup.zip"), b"x").unwrap();
            dropped.path().to_path_buf()
        };
        assert!(!dropped_path.exists());
        assert!(root.path().exists());
    }

    #[test]
    fn test_work_dirs_are_unique() {
        let root = TempDir::new().unwrap();
        let a = ScopedWorkDir::create(root.path(), "restore").unwrap();
        let b = ScopedWorkDir::create(root.path(), "restore").unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(root.path()));
    }

    #[test]
    fn test_intermediate_files() {
        let dir = TempDir::new().unwrap();
        let dump = dir.path().join("a.sql");
        let archive = dir.path().join("a.zip");
        fs::write(&dump, b"x").unwrap();

        let mut files = IntermediateFiles::new();
        files.track(&dump);
        files.track(&archive);
        assert!(files.cleanup().is_empty());
        assert!(!dump.exists());

        fs::write(&dump, b"x").unwrap();
        let mut kept = IntermediateFiles::new();
        kept.track(&dump);
        kept.track(&archive);
        assert_eq!(kept.keep(), vec![dump.clone()]);
        assert!(dump.exists());

        {
            let mut dropped = IntermediateFiles::new();
            dropped.track(&dump);
        }
        assert!(!dump.exists());
    }
}
