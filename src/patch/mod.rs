//! Patch stage: persists accepted changes to the deployment's storage.
//!
//! Exploded deployments are written in place. Archive deployments stage
//! patches in a replacement store that is folded back into the archive when
//! the deployment is unmounted.

mod archive;
mod exploded;
pub(crate) mod fs_ops;

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::known::{ArtifactIndexes, KnownArtifactMap};
use crate::loader::{ClassLoadError, DeploymentClassLoader};
use crate::reconcile::ResolvedClassChanges;
use crate::scanner::{ScanError, WEB_INF};

pub use archive::{ArchiveDeployment, RepackageOutcome};
pub use exploded::ExplodedDeployment;

const WAR_SUFFIX: &str = ".war";
const WAR_CLASSES_PREFIX: &str = "WEB-INF/classes";

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("Deployment root missing: {0}")]
    MissingRoot(PathBuf),
    #[error("Invalid artifact path {0:?}")]
    InvalidPath(String),
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Archive error in {path}: {message}")]
    Zip { path: PathBuf, message: String },
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    ClassLoad(#[from] ClassLoadError),
}

impl PatchError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Class and web-resource bytes accepted for one patch pass.
///
/// Class keys are relative class paths (`pkg/Foo.class`), web keys are
/// relative to the deployment root.
#[derive(Debug, Default, Clone)]
pub struct PendingChanges {
    pub classes: BTreeMap<String, Vec<u8>>,
    pub web_resources: BTreeMap<String, Vec<u8>>,
}

impl PendingChanges {
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.web_resources.is_empty()
    }
}

/// Storage flavour of a deployment.
#[derive(Debug, Clone)]
pub enum DeploymentKind {
    Archive(ArchiveDeployment),
    Exploded(ExplodedDeployment),
}

impl DeploymentKind {
    /// Pick the storage flavour from what `root` is on disk.
    pub fn detect(name: &str, root: &Path, temp_dir: &Path) -> Result<Self, PatchError> {
        let prefix = classes_prefix(name);
        if root.is_dir() {
            Ok(Self::Exploded(ExplodedDeployment::new(root.to_path_buf(), prefix)))
        } else if root.is_file() {
            Ok(Self::Archive(ArchiveDeployment::new(
                root.to_path_buf(),
                name,
                temp_dir,
                prefix,
            )))
        } else {
            Err(PatchError::MissingRoot(root.to_path_buf()))
        }
    }

    pub fn root(&self) -> &Path {
        match self {
            Self::Archive(archive) => archive.archive(),
            Self::Exploded(exploded) => exploded.root(),
        }
    }

    pub fn is_archive(&self) -> bool {
        matches!(self, Self::Archive(_))
    }

    /// Populate the indexes from the deployed artifact.
    pub fn seed(&self, indexes: &ArtifactIndexes) -> Result<(), PatchError> {
        match self {
            Self::Archive(archive) => archive.seed(indexes),
            Self::Exploded(exploded) => exploded.seed(indexes),
        }
    }

    /// Current class state, including classes added by earlier patches.
    pub fn known_classes(&self, indexes: &ArtifactIndexes) -> Result<KnownArtifactMap, PatchError> {
        match self {
            Self::Archive(archive) => archive.known_classes(indexes),
            Self::Exploded(_) => Ok(indexes.classes.snapshot_all()),
        }
    }

    pub fn known_web_resources(
        &self,
        indexes: &ArtifactIndexes,
    ) -> Result<KnownArtifactMap, PatchError> {
        match self {
            Self::Archive(archive) => archive.known_web_resources(indexes),
            Self::Exploded(exploded) => exploded.known_web_resources(),
        }
    }

    /// Persist `changes` and classify the affected classes.
    ///
    /// `known_classes` is the class state captured before the pass started.
    pub fn apply(
        &self,
        changes: PendingChanges,
        known_classes: &KnownArtifactMap,
        indexes: &ArtifactIndexes,
        loader: &dyn DeploymentClassLoader,
    ) -> Result<ResolvedClassChanges, PatchError> {
        match self {
            Self::Archive(archive) => archive.apply(changes, known_classes, loader),
            Self::Exploded(exploded) => exploded.apply(changes, indexes, loader),
        }
    }

    /// Persist bytes redefined by an outside party.
    pub fn write_external_class(
        &self,
        class_path: &str,
        bytes: &[u8],
        indexes: &ArtifactIndexes,
    ) -> Result<(), PatchError> {
        match self {
            Self::Archive(archive) => archive.write_external_class(class_path, bytes),
            Self::Exploded(exploded) => exploded.write_external_class(class_path, bytes, indexes),
        }
    }

    /// Read a resource of the deployed artifact by its relative path.
    pub fn read_resource(&self, relative: &str) -> Result<Option<Vec<u8>>, PatchError> {
        match self {
            Self::Archive(archive) => archive.read_resource(relative),
            Self::Exploded(exploded) => exploded.read_resource(relative),
        }
    }

    /// Release the deployment's storage; archives are re-packaged here.
    pub fn unmount(&self) -> Result<RepackageOutcome, PatchError> {
        match self {
            Self::Archive(archive) => archive.unmount(),
            Self::Exploded(_) => Ok(RepackageOutcome::Untouched),
        }
    }
}

/// Whether `relative` lies inside the top-level `WEB-INF` directory.
pub(crate) fn is_web_inf_path(relative: &str) -> bool {
    relative
        .strip_prefix(WEB_INF)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Location of compiled classes inside a deployment named `name`.
pub fn classes_prefix(name: &str) -> &'static str {
    if name.ends_with(WAR_SUFFIX) {
        WAR_CLASSES_PREFIX
    } else {
        ""
    }
}
