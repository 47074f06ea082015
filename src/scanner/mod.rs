//! Differential scanning of external source, class and web-resource trees.
//!
//! Each pass compares the files under the configured external roots against
//! the deployment's known modification times and returns a fresh [`ChangeSet`].

mod diff;
mod errors;
mod walk;

use std::{collections::BTreeMap, path::PathBuf};

use crate::known::KnownArtifactMap;

pub use errors::ScanError;
pub use walk::WEB_INF;

pub(crate) use diff::{CLASS_EXTENSION, JAVA_EXTENSION};
pub(crate) use walk::{Skip, collect_times, visit_files};

/// External directories scanned for changes. Absent roots contribute nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRoots {
    pub sources: Option<PathBuf>,
    pub classes: Option<PathBuf>,
    pub web_resources: Option<PathBuf>,
}

impl ScanRoots {
    /// True when no external root is configured.
    pub fn is_empty(&self) -> bool {
        self.sources.is_none() && self.classes.is_none() && self.web_resources.is_none()
    }
}

/// Changes observed by a single scan pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    /// Source base names (relative path without `.java`) to source mtime.
    pub changed_source_files: BTreeMap<String, i64>,
    /// Relative class paths to externally supplied bytecode.
    pub changed_class_files: BTreeMap<String, Vec<u8>>,
    /// Relative web-resource paths to file content.
    pub changed_web_resources: BTreeMap<String, Vec<u8>>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed_source_files.is_empty()
            && self.changed_class_files.is_empty()
            && self.changed_web_resources.is_empty()
    }
}

/// Scan the configured roots against the known classes and web resources.
///
/// Sources are scanned first so that the class scan can apply manual
/// compilation precedence to the pending compile set.
pub fn scan(
    roots: &ScanRoots,
    known_classes: &KnownArtifactMap,
    known_web_resources: &KnownArtifactMap,
) -> Result<ChangeSet, ScanError> {
    let mut changes = ChangeSet::default();
    if let Some(root) = roots.sources.as_deref() {
        diff::scan_sources(root, known_classes, &mut changes.changed_source_files)?;
    }
    if let Some(root) = roots.classes.as_deref() {
        diff::scan_classes(
            root,
            known_classes,
            &mut changes.changed_source_files,
            &mut changes.changed_class_files,
        )?;
    }
    if let Some(root) = roots.web_resources.as_deref() {
        diff::scan_web_resources(
            root,
            known_web_resources,
            &mut changes.changed_web_resources,
        )?;
    }
    Ok(changes)
}
