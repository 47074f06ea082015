//! Per-deployment orchestration and the lifecycle bridge that owns it.

mod gate;
mod listener;
mod markers;
mod registry;
mod support;

use thiserror::Error;

use crate::compile::CompileError;
use crate::config::ConfigError;
use crate::fallback::FallbackError;
use crate::loader::ClassLoadError;
use crate::patch::PatchError;
use crate::scanner::ScanError;

pub use listener::{ChangedClassDefinition, ClassChangeListener, NewClassDefinition};
pub use markers::{MarkerFileController, suffix as marker_suffix};
pub use registry::{ClassChangeRegistry, DeploymentUnit};
pub use support::{Collaborators, DeploymentClassChangeSupport, PassReport, ScanOutcome};

/// Failure of a scan, notify or lifecycle call on a deployment.
#[derive(Debug, Error)]
pub enum ClassChangeError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error(transparent)]
    ClassLoad(#[from] ClassLoadError),
    #[error(transparent)]
    Fallback(#[from] FallbackError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Class loader for {0} has not been resolved yet")]
    LoaderNotSet(String),
    #[error("Class loader for {0} was already set")]
    LoaderAlreadySet(String),
    #[error("Deployment {0} is not registered")]
    UnknownDeployment(String),
    #[error("Deployment {0} is already registered")]
    DuplicateDeployment(String),
    #[error("Pushed source {0} is not a .java file")]
    NotASourceFile(String),
}
