use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::known::{ArtifactIndexes, KnownArtifactMap, modified_millis};
use crate::loader::DeploymentClassLoader;
use crate::reconcile::{ResolvedClassChanges, classify};
use crate::scanner::{CLASS_EXTENSION, Skip, collect_times};

use super::fs_ops::{child_path, write_file};
use super::{PatchError, PendingChanges, is_web_inf_path};

/// Deployment unpacked into a writable directory tree.
///
/// The physical tree is the only copy of the deployment, so patches are
/// written in place and no replacement store exists.
#[derive(Debug, Clone)]
pub struct ExplodedDeployment {
    root: PathBuf,
    classes_root: PathBuf,
}

impl ExplodedDeployment {
    pub fn new(root: PathBuf, classes_prefix: &str) -> Self {
        let classes_root = if classes_prefix.is_empty() {
            root.clone()
        } else {
            root.join(classes_prefix)
        };
        Self { root, classes_root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn classes_root(&self) -> &Path {
        &self.classes_root
    }

    pub(super) fn seed(&self, indexes: &ArtifactIndexes) -> Result<(), PatchError> {
        indexes.classes.record_all(self.known_classes()?);
        indexes.web_resources.record_all(self.known_web_resources()?);
        Ok(())
    }

    pub(super) fn known_classes(&self) -> Result<KnownArtifactMap, PatchError> {
        Ok(collect_times(&self.classes_root, Skip::Nothing, is_class)?)
    }

    pub(super) fn known_web_resources(&self) -> Result<KnownArtifactMap, PatchError> {
        Ok(collect_times(&self.root, Skip::WebInf, |_| true)?)
    }

    pub(super) fn read_resource(&self, relative: &str) -> Result<Option<Vec<u8>>, PatchError> {
        let path = child_path(&self.root, relative)?;
        if !path.is_file() {
            return Ok(None);
        }
        std::fs::read(&path)
            .map(Some)
            .map_err(|source| PatchError::io(&path, source))
    }

    /// Classify the pending changes, write them in place and record their mtimes.
    ///
    /// Classes whose on-disk mtime differs from the index are reported too,
    /// which picks up files modified behind the orchestrator's back. Every
    /// class is resolved before anything is written and the index is only
    /// updated once all writes succeeded, so a failed pass leaves the stale
    /// timestamps for the next scan to retry.
    pub(super) fn apply(
        &self,
        changes: PendingChanges,
        indexes: &ArtifactIndexes,
        loader: &dyn DeploymentClassLoader,
    ) -> Result<ResolvedClassChanges, PatchError> {
        let mut class_writes = Vec::with_capacity(changes.classes.len());
        for (path, bytes) in &changes.classes {
            class_writes.push((child_path(&self.classes_root, path)?, bytes.as_slice()));
        }
        let mut web_writes = Vec::with_capacity(changes.web_resources.len());
        for (path, bytes) in &changes.web_resources {
            if is_web_inf_path(path) {
                warn!(path = %path, "Refusing to write web resource into WEB-INF");
                continue;
            }
            web_writes.push((child_path(&self.root, path)?, bytes.as_slice()));
        }

        let mut touched: BTreeMap<String, Vec<u8>> = changes
            .classes
            .iter()
            .filter(|(path, _)| is_class(path))
            .map(|(path, bytes)| (path.clone(), bytes.clone()))
            .collect();
        for (path, modified) in self.known_classes()? {
            if touched.contains_key(&path) || indexes.classes.lookup(&path) == Some(modified) {
                continue;
            }
            let file = child_path(&self.classes_root, &path)?;
            let bytes = std::fs::read(&file).map_err(|source| PatchError::io(&file, source))?;
            touched.insert(path, bytes);
        }
        let mut resolved = ResolvedClassChanges::default();
        for (path, bytes) in &touched {
            let is_known = indexes.classes.lookup(path).is_some();
            if let Some(change) = classify(path, bytes.clone(), is_known, loader)? {
                resolved.push(change);
            }
        }

        for (file, bytes) in class_writes.into_iter().chain(web_writes) {
            write_file(&file, bytes)?;
        }
        for path in touched.keys() {
            let file = child_path(&self.classes_root, path)?;
            let modified = modified_millis(&file).map_err(|source| PatchError::io(&file, source))?;
            indexes.classes.record(path.clone(), modified);
        }
        debug!(
            root = %self.root.display(),
            modified = resolved.modified.len(),
            added = resolved.added.len(),
            "Exploded deployment patched"
        );
        Ok(resolved)
    }

    /// Persist bytes redefined by someone else and record the new mtime at once.
    pub(super) fn write_external_class(
        &self,
        class_path: &str,
        bytes: &[u8],
        indexes: &ArtifactIndexes,
    ) -> Result<(), PatchError> {
        let file = child_path(&self.classes_root, class_path)?;
        write_file(&file, bytes)?;
        let modified = modified_millis(&file).map_err(|source| PatchError::io(&file, source))?;
        indexes.classes.record(class_path, modified);
        Ok(())
    }
}

fn is_class(relative: &str) -> bool {
    relative.ends_with(CLASS_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{ClassLoadError, LoadedClass, LoaderId, StaticClassLoader};
    use tempfile::tempdir;

    const WEB_INF_CLASSES: &str = "WEB-INF/classes";

    fn deployment(root: &Path) -> ExplodedDeployment {
        std::fs::create_dir_all(root.join("WEB-INF/classes/pkg")).unwrap();
        std::fs::write(root.join("WEB-INF/classes/pkg/Old.class"), b"old").unwrap();
        std::fs::write(root.join("index.html"), b"<html/>").unwrap();
        ExplodedDeployment::new(root.to_path_buf(), WEB_INF_CLASSES)
    }

    #[test]
    fn seeds_classes_and_web_resources_separately() {
        let dir = tempdir().unwrap();
        let exploded = deployment(dir.path());
        let indexes = ArtifactIndexes::default();
        exploded.seed(&indexes).unwrap();
        assert!(indexes.classes.lookup("pkg/Old.class").is_some());
        assert!(indexes.web_resources.lookup("index.html").is_some());
        assert!(indexes.web_resources.lookup("WEB-INF/classes/pkg/Old.class").is_none());
    }

    #[test]
    fn apply_writes_in_place_and_classifies() {
        let dir = tempdir().unwrap();
        let exploded = deployment(dir.path());
        let indexes = ArtifactIndexes::default();
        exploded.seed(&indexes).unwrap();
        // Make the rewrite of Old observable even on coarse mtime filesystems.
        indexes.classes.record("pkg/Old.class", 0);
        let loader = StaticClassLoader::new(Vec::new());

        let mut classes = BTreeMap::new();
        classes.insert("pkg/Old.class".to_string(), b"new-old".to_vec());
        classes.insert("pkg/New.class".to_string(), b"new".to_vec());
        let mut web_resources = BTreeMap::new();
        web_resources.insert("index.html".to_string(), b"<html>2</html>".to_vec());
        web_resources.insert("WEB-INF/web.xml".to_string(), b"<web-app/>".to_vec());

        let resolved = exploded
            .apply(PendingChanges { classes, web_resources }, &indexes, &loader)
            .unwrap();

        assert_eq!(resolved.modified_names(), vec!["pkg.Old"]);
        assert_eq!(resolved.added_names(), vec!["pkg.New"]);
        assert_eq!(
            std::fs::read(dir.path().join("WEB-INF/classes/pkg/New.class")).unwrap(),
            b"new"
        );
        assert_eq!(std::fs::read(dir.path().join("index.html")).unwrap(), b"<html>2</html>");
        assert!(!dir.path().join("WEB-INF/web.xml").exists());
        assert!(indexes.classes.lookup("pkg/New.class").is_some());
    }

    #[test]
    fn apply_reports_classes_touched_outside_the_batch() {
        let dir = tempdir().unwrap();
        let exploded = deployment(dir.path());
        let indexes = ArtifactIndexes::default();
        exploded.seed(&indexes).unwrap();
        std::fs::write(dir.path().join("WEB-INF/classes/pkg/Sneaky.class"), b"s").unwrap();
        let loader = StaticClassLoader::new(Vec::new());

        let resolved = exploded
            .apply(PendingChanges::default(), &indexes, &loader)
            .unwrap();

        assert_eq!(resolved.added_names(), vec!["pkg.Sneaky"]);
        let again = exploded
            .apply(PendingChanges::default(), &indexes, &loader)
            .unwrap();
        assert!(again.is_empty());
    }

    #[derive(Debug)]
    struct EmptyLoader(LoaderId);

    impl DeploymentClassLoader for EmptyLoader {
        fn id(&self) -> LoaderId {
            self.0
        }

        fn load_class(&self, name: &str) -> Result<LoadedClass, ClassLoadError> {
            Err(ClassLoadError::NotFound {
                name: name.to_string(),
                loader: self.0,
            })
        }

        fn class_path(&self) -> Vec<PathBuf> {
            Vec::new()
        }
    }

    #[test]
    fn failed_lookup_writes_and_records_nothing() {
        let dir = tempdir().unwrap();
        let exploded = deployment(dir.path());
        let indexes = ArtifactIndexes::default();
        exploded.seed(&indexes).unwrap();
        let recorded = indexes.classes.lookup("pkg/Old.class");

        let mut classes = BTreeMap::new();
        classes.insert("pkg/New.class".to_string(), b"new".to_vec());
        classes.insert("pkg/Old.class".to_string(), b"new-old".to_vec());
        let mut web_resources = BTreeMap::new();
        web_resources.insert("index.html".to_string(), b"<html>2</html>".to_vec());
        let result = exploded.apply(
            PendingChanges { classes, web_resources },
            &indexes,
            &EmptyLoader(LoaderId::next()),
        );

        assert!(result.is_err());
        assert_eq!(std::fs::read(dir.path().join("WEB-INF/classes/pkg/Old.class")).unwrap(), b"old");
        assert!(!dir.path().join("WEB-INF/classes/pkg/New.class").exists());
        assert_eq!(std::fs::read(dir.path().join("index.html")).unwrap(), b"<html/>");
        assert_eq!(indexes.classes.lookup("pkg/Old.class"), recorded);
        assert!(indexes.classes.lookup("pkg/New.class").is_none());
    }

    #[test]
    fn external_class_write_records_timestamp() {
        let dir = tempdir().unwrap();
        let exploded = deployment(dir.path());
        let indexes = ArtifactIndexes::default();
        exploded
            .write_external_class("pkg/Old.class", b"debugger", &indexes)
            .unwrap();
        let on_disk = modified_millis(&dir.path().join("WEB-INF/classes/pkg/Old.class")).unwrap();
        assert_eq!(indexes.classes.lookup("pkg/Old.class"), Some(on_disk));
    }
}
