use std::{collections::BTreeMap, fs, path::Path};

use tracing::debug;

use crate::known::{KnownArtifactMap, modified_millis};
use crate::reconcile::manual_class_wins;

use super::ScanError;
use super::walk::{Skip, visit_files};

pub(crate) const CLASS_EXTENSION: &str = ".class";
pub(crate) const JAVA_EXTENSION: &str = ".java";

/// True when a file observed at `modified` must be treated as changed.
fn is_changed(known: Option<i64>, modified: i64) -> bool {
    known.is_none_or(|recorded| recorded < modified)
}

/// Collect sources whose installed class is missing or older than the source.
pub(super) fn scan_sources(
    root: &Path,
    known_classes: &KnownArtifactMap,
    changed_sources: &mut BTreeMap<String, i64>,
) -> Result<(), ScanError> {
    visit_files(root, Skip::Nothing, &mut |relative, path| {
        let Some(base_name) = relative.strip_suffix(JAVA_EXTENSION) else {
            return Ok(());
        };
        let modified = modified_millis(path).map_err(|source| ScanError::io(path, source))?;
        let class_key = format!("{base_name}{CLASS_EXTENSION}");
        if is_changed(known_classes.get(&class_key).copied(), modified) {
            changed_sources.insert(base_name.to_string(), modified);
        }
        Ok(())
    })
}

/// Collect externally compiled classes that are newer than the deployed copy.
///
/// A class that also has a pending source only wins when it is not older than
/// that source; the source is then dropped from the compile set.
pub(super) fn scan_classes(
    root: &Path,
    known_classes: &KnownArtifactMap,
    changed_sources: &mut BTreeMap<String, i64>,
    changed_classes: &mut BTreeMap<String, Vec<u8>>,
) -> Result<(), ScanError> {
    visit_files(root, Skip::Nothing, &mut |relative, path| {
        let Some(base_name) = relative.strip_suffix(CLASS_EXTENSION) else {
            return Ok(());
        };
        let modified = modified_millis(path).map_err(|source| ScanError::io(path, source))?;
        if !is_changed(known_classes.get(relative).copied(), modified) {
            return Ok(());
        }
        let pending = changed_sources.get(base_name).copied();
        if manual_class_wins(pending, modified) {
            if pending.is_some() {
                debug!(class = relative, "Manually compiled class supersedes pending source");
            }
            changed_sources.remove(base_name);
            changed_classes.insert(relative.to_string(), read_file(path)?);
        } else {
            debug!(class = relative, "Ignoring stale class; source is newer");
        }
        Ok(())
    })
}

/// Collect changed web resources, never descending into `WEB-INF`.
pub(super) fn scan_web_resources(
    root: &Path,
    known_web_resources: &KnownArtifactMap,
    changed_web_resources: &mut BTreeMap<String, Vec<u8>>,
) -> Result<(), ScanError> {
    visit_files(root, Skip::WebInf, &mut |relative, path| {
        let modified = modified_millis(path).map_err(|source| ScanError::io(path, source))?;
        if is_changed(known_web_resources.get(relative).copied(), modified) {
            changed_web_resources.insert(relative.to_string(), read_file(path)?);
        }
        Ok(())
    })
}

fn read_file(path: &Path) -> Result<Vec<u8>, ScanError> {
    fs::read(path).map_err(|source| ScanError::io(path, source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unknown_or_newer_files_are_changed() {
        assert!(is_changed(None, 0));
        assert!(is_changed(Some(10), 11));
        assert!(!is_changed(Some(10), 10));
        assert!(!is_changed(Some(10), 9));
    }
}
