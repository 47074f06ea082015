use std::{
    fs,
    path::{Path, PathBuf},
};

use super::PatchError;

/// Write `bytes` to `path`, creating parent directories as needed.
pub(crate) fn write_file(path: &Path, bytes: &[u8]) -> Result<(), PatchError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| PatchError::io(parent, source))?;
    }
    fs::write(path, bytes).map_err(|source| PatchError::io(path, source))
}

pub(crate) fn remove_dir_all_if_exists(path: &Path) -> Result<(), PatchError> {
    if path.exists() {
        fs::remove_dir_all(path).map_err(|source| PatchError::io(path, source))?;
    }
    Ok(())
}

/// Resolve a relative `/`-separated artifact path below `root`.
///
/// Absolute paths and `..` components are rejected so pushed payloads cannot
/// escape the deployment's storage.
pub(crate) fn child_path(root: &Path, relative: &str) -> Result<PathBuf, PatchError> {
    let mut resolved = root.to_path_buf();
    let mut saw_component = false;
    for part in relative.split('/') {
        match part {
            "" | "." => {}
            ".." => return Err(PatchError::InvalidPath(relative.to_string())),
            part if part.contains('\\') || part.contains(':') => {
                return Err(PatchError::InvalidPath(relative.to_string()));
            }
            part => {
                resolved.push(part);
                saw_component = true;
            }
        }
    }
    if !saw_component || relative.starts_with('/') {
        return Err(PatchError::InvalidPath(relative.to_string()));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_file_creates_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/C.class");
        write_file(&path, b"c").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"c");
    }

    #[test]
    fn child_path_rejects_escape() {
        let dir = tempdir().unwrap();
        assert!(child_path(dir.path(), "../evil.class").is_err());
        assert!(child_path(dir.path(), "/etc/passwd").is_err());
        assert!(child_path(dir.path(), "").is_err());
    }

    #[test]
    fn child_path_allows_nested_relative() {
        let dir = tempdir().unwrap();
        let path = child_path(dir.path(), "./pkg/Foo.class").unwrap();
        assert_eq!(path, dir.path().join("pkg").join("Foo.class"));
    }

    #[test]
    fn removing_missing_dir_is_ok() {
        let dir = tempdir().unwrap();
        remove_dir_all_if_exists(&dir.path().join("absent")).unwrap();
    }
}
