//! Per-execution working directories.
//!
//! Layout:
//! ```text
//! base_path/
//! └── {provider}/
//!     └── {region}/
//!         └── {resource_id}/
//!             └── {task_id}/
//!                 ├── main.tf.json
//!                 └── terraform.tfstate
//! ```

use std::fs;
use std::path::{Component, Path, PathBuf};

use prism_models::{ResourceId, TaskId};
use tracing::debug;

use crate::error::{Result, WorkspaceError};

/// Computes, creates and removes isolated working directories.
#[derive(Debug, Clone)]
pub struct WorkspaceAllocator {
    base_path: PathBuf,
}

impl WorkspaceAllocator {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Returns `base/provider/region/resource_id/task_id` without touching disk.
    pub fn path_for(
        &self,
        provider: &str,
        region: &str,
        resource_id: ResourceId,
        task_id: &TaskId,
    ) -> Result<PathBuf> {
        Ok(self
            .base_path
            .join(segment(provider)?)
            .join(segment(region)?)
            .join(resource_id.to_string())
            .join(segment(task_id.as_str())?))
    }

    /// Computes the workspace path and creates it with its parents.
    pub fn create(
        &self,
        provider: &str,
        region: &str,
        resource_id: ResourceId,
        task_id: &TaskId,
    ) -> Result<PathBuf> {
        let path = self.path_for(provider, region, resource_id, task_id)?;
        fs::create_dir_all(&path).map_err(|source| WorkspaceError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "Created workspace");
        Ok(path)
    }

    /// Recursively removes `path`. Refuses an empty path, a filesystem root,
    /// or any path containing `..`. A missing path is not an error.
    pub fn clean(&self, path: &Path) -> Result<()> {
        if is_unsafe_to_clean(path) {
            return Err(WorkspaceError::UnsafePath(path.to_path_buf()));
        }
        match fs::remove_dir_all(path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed workspace");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(WorkspaceError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Writes `filename` inside `dir`, replacing any existing file.
    pub fn write_file(&self, dir: &Path, filename: &str, contents: impl AsRef<[u8]>) -> Result<PathBuf> {
        let path = dir.join(segment(filename)?);
        fs::write(&path, contents).map_err(|source| WorkspaceError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Reads `filename` inside `dir`.
    pub fn read_file(&self, dir: &Path, filename: &str) -> Result<Vec<u8>> {
        let path = dir.join(segment(filename)?);
        fs::read(&path).map_err(|source| WorkspaceError::Io { path, source })
    }

    /// Returns true if `path` exists.
    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

fn is_unsafe_to_clean(path: &Path) -> bool {
    if path.as_os_str().is_empty() {
        return true;
    }
    // `..` can resolve anywhere, including the root.
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return true;
    }
    let mut components = path.components().filter(|c| !matches!(c, Component::CurDir));
    match components.next() {
        None => true,
        Some(Component::RootDir | Component::Prefix(_)) => {
            components.all(|c| matches!(c, Component::RootDir))
        }
        Some(_) => false,
    }
}

/// A single normal path component.
fn segment(value: &str) -> Result<&str> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !value.contains(['/', '\\']) => Ok(value),
        _ => Err(WorkspaceError::InvalidComponent(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_composes_path() {
        let dir = tempdir().unwrap();
        let ws = WorkspaceAllocator::new(dir.path());

        let path = ws.create("aws", "us-east-1", 42, &TaskId::from("t-1")).unwrap();

        assert_eq!(path, dir.path().join("aws/us-east-1/42/t-1"));
        assert!(path.is_dir());
        assert!(ws.exists(&path));
    }

    #[test]
    fn test_path_for_is_deterministic() {
        let ws = WorkspaceAllocator::new("/srv/prism");
        let a = ws.path_for("default", "default", 1, &TaskId::from("t")).unwrap();
        let b = ws.path_for("default", "default", 1, &TaskId::from("t")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, PathBuf::from("/srv/prism/default/default/1/t"));
    }

    #[test]
    fn test_rejects_escaping_segments() {
        let ws = WorkspaceAllocator::new("/srv/prism");
        assert!(ws.path_for("..", "r", 1, &TaskId::from("t")).is_err());
        assert!(ws.path_for("p", "a/b", 1, &TaskId::from("t")).is_err());
        assert!(ws.path_for("p", "r", 1, &TaskId::from("")).is_err());
        assert!(ws.path_for("/abs", "r", 1, &TaskId::from("t")).is_err());
    }

    #[test]
    fn test_clean_refuses_root_and_empty() {
        let ws = WorkspaceAllocator::new("/srv/prism");
        assert!(matches!(ws.clean(Path::new("")), Err(WorkspaceError::UnsafePath(_))));
        assert!(matches!(ws.clean(Path::new("/")), Err(WorkspaceError::UnsafePath(_))));
        assert!(matches!(ws.clean(Path::new(".")), Err(WorkspaceError::UnsafePath(_))));
        for path in ["/..", "/tmp/..", "/srv/prism/1/../../..", ".."] {
            assert!(
                matches!(ws.clean(Path::new(path)), Err(WorkspaceError::UnsafePath(_))),
                "{} should be refused",
                path
            );
        }
    }

    #[test]
    fn test_clean_removes_tree() {
        let dir = tempdir().unwrap();
        let ws = WorkspaceAllocator::new(dir.path());
        let path = ws.create("p", "r", 1, &TaskId::from("t")).unwrap();
        ws.write_file(&path, "main.tf", "terraform {}").unwrap();

        ws.clean(&path).unwrap();

        assert!(!path.exists());
        assert!(dir.path().join("p/r/1").exists());
        ws.clean(&path).unwrap();
    }

    #[test]
    fn test_scoped_file_io() {
        let dir = tempdir().unwrap();
        let ws = WorkspaceAllocator::new(dir.path());

        let written = ws.write_file(dir.path(), "main.tf.json", b"{}").unwrap();
        assert_eq!(written, dir.path().join("main.tf.json"));
        assert_eq!(ws.read_file(dir.path(), "main.tf.json").unwrap(), b"{}");

        assert!(ws.write_file(dir.path(), "../escape", b"x").is_err());
        assert!(matches!(
            ws.read_file(dir.path(), "missing.json"),
            Err(WorkspaceError::Io { .. })
        ));
    }
}
