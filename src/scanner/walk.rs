use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::known::{KnownArtifactMap, modified_millis};

use super::ScanError;

/// Reserved directory whose content belongs to the container's class loading.
pub const WEB_INF: &str = "WEB-INF";

/// Which top-level subtrees a walk must leave alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Skip {
    Nothing,
    WebInf,
}

impl Skip {
    fn skips(self, relative_dir: &str) -> bool {
        matches!(self, Skip::WebInf) && relative_dir == WEB_INF
    }
}

/// Depth-first walk over every regular file below `root`.
///
/// The visitor receives the `/`-separated path relative to `root` and the
/// absolute path. A missing root yields nothing; symlinks are skipped.
pub(crate) fn visit_files(
    root: &Path,
    skip: Skip,
    visitor: &mut impl FnMut(&str, &Path) -> Result<(), ScanError>,
) -> Result<(), ScanError> {
    if !root.exists() {
        return Ok(());
    }
    if !root.is_dir() {
        return Err(ScanError::InvalidRoot(root.to_path_buf()));
    }
    let mut stack: Vec<(PathBuf, String)> = vec![(root.to_path_buf(), String::new())];
    while let Some((dir, relative_dir)) = stack.pop() {
        if skip.skips(&relative_dir) {
            continue;
        }
        let entries = fs::read_dir(&dir).map_err(|source| ScanError::io(&dir, source))?;
        for entry in entries {
            let entry = entry.map_err(|source| ScanError::io(&dir, source))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .map_err(|source| ScanError::io(&path, source))?;
            if file_type.is_symlink() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let relative = join_relative(&relative_dir, &name);
            if file_type.is_dir() {
                stack.push((path, relative));
            } else if file_type.is_file() {
                visitor(&relative, &path)?;
            }
        }
    }
    Ok(())
}

/// Collect the modification time of every file below `root` accepted by `filter`.
pub(crate) fn collect_times(
    root: &Path,
    skip: Skip,
    filter: impl Fn(&str) -> bool,
) -> Result<KnownArtifactMap, ScanError> {
    let mut found = KnownArtifactMap::new();
    visit_files(root, skip, &mut |relative, path| {
        if filter(relative) {
            let modified = modified_millis(path).map_err(|source| ScanError::io(path, source))?;
            found.insert(relative.to_string(), modified);
        }
        Ok(())
    })?;
    Ok(found)
}

pub(crate) fn join_relative(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}
