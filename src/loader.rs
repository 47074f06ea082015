//! Deployment class loader abstraction.
//!
//! The orchestrator never loads classes itself; it asks the deployment's loader
//! for the live class behind a modified path and hands the loader's class path
//! to the compiler.

use std::{
    fmt,
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
};

use thiserror::Error;

use crate::scanner::CLASS_EXTENSION;

static NEXT_LOADER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a class loader, used to filter change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoaderId(u64);

impl LoaderId {
    /// Allocate a process-unique loader id.
    pub fn next() -> Self {
        Self(NEXT_LOADER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LoaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loader#{}", self.0)
    }
}

/// A class that is currently loaded by a deployment's loader.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadedClass {
    /// Binary class name, e.g. `com.acme.Foo$Inner`.
    pub name: String,
    pub loader: LoaderId,
}

#[derive(Debug, Error)]
pub enum ClassLoadError {
    #[error("Class {name} is not visible to {loader}")]
    NotFound { name: String, loader: LoaderId },
}

/// Class loader of a single deployment, delivered once module resolution completes.
pub trait DeploymentClassLoader: Send + Sync + fmt::Debug {
    fn id(&self) -> LoaderId;

    /// Resolve the live class for a binary name.
    fn load_class(&self, name: &str) -> Result<LoadedClass, ClassLoadError>;

    /// Entries the compiler should resolve referenced classes against.
    fn class_path(&self) -> Vec<PathBuf>;
}

/// Loader backed by a fixed class path that reports every requested class as loaded.
#[derive(Debug, Clone)]
pub struct StaticClassLoader {
    id: LoaderId,
    class_path: Vec<PathBuf>,
}

impl StaticClassLoader {
    pub fn new(class_path: Vec<PathBuf>) -> Self {
        Self {
            id: LoaderId::next(),
            class_path,
        }
    }
}

impl DeploymentClassLoader for StaticClassLoader {
    fn id(&self) -> LoaderId {
        self.id
    }

    fn load_class(&self, name: &str) -> Result<LoadedClass, ClassLoadError> {
        Ok(LoadedClass {
            name: name.to_string(),
            loader: self.id,
        })
    }

    fn class_path(&self) -> Vec<PathBuf> {
        self.class_path.clone()
    }
}

/// Binary class name for a relative class-file path (`a/b/C.class` -> `a.b.C`).
pub fn class_name_for_path(path: &str) -> Option<String> {
    let base = path.strip_suffix(CLASS_EXTENSION)?;
    if base.is_empty() {
        return None;
    }
    Some(base.replace('/', "."))
}

/// Relative class-file path for a binary class name (`a.b.C` -> `a/b/C.class`).
pub fn class_path_for_name(name: &str) -> String {
    format!("{}{CLASS_EXTENSION}", name.replace('.', "/"))
}
