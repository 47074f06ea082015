//! Compile stage: turns changed sources into in-memory bytecode.
//!
//! The compiler itself is external. Implementations resolve referenced classes
//! through the deployment's class loader and must not write into the
//! deployment; persisting the output is the patch stage's job.

mod command;

use std::{collections::BTreeMap, path::Path};

use thiserror::Error;
use tracing::info;

use crate::loader::DeploymentClassLoader;
use crate::scanner::ScanError;

pub use command::CommandCompiler;

/// Class base name (relative path without `.class`) to bytecode.
pub type CompiledClasses = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Error)]
pub enum CompileError {
    /// The compiler ran and reported diagnostics.
    #[error("Compilation failed:\n{diagnostics}")]
    Failed { diagnostics: String },
    #[error("Failed to launch compiler {program}: {source}")]
    Launch {
        program: String,
        source: std::io::Error,
    },
    #[error("Invalid compiler class path: {0}")]
    ClassPath(String),
    #[error("Compiler I/O error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}

impl From<ScanError> for CompileError {
    fn from(error: ScanError) -> Self {
        match error {
            ScanError::Io { path, source } => CompileError::Io { path, source },
            ScanError::InvalidRoot(path) => CompileError::Io {
                path,
                source: std::io::Error::new(std::io::ErrorKind::NotADirectory, "not a directory"),
            },
        }
    }
}

/// External compiler bound to a deployment's class loader.
pub trait Compiler: Send + Sync {
    /// Compile `<source_root>/<base>.java` for every base name.
    ///
    /// Either every requested source compiles or the call fails; partial
    /// output is never returned.
    fn compile(
        &self,
        loader: &dyn DeploymentClassLoader,
        source_root: &Path,
        base_names: &[String],
    ) -> Result<CompiledClasses, CompileError>;
}

/// Run the compile stage for the given base names, logging what is compiled.
pub fn compile_changed(
    compiler: &dyn Compiler,
    loader: &dyn DeploymentClassLoader,
    source_root: &Path,
    base_names: &[String],
) -> Result<CompiledClasses, CompileError> {
    info!(sources = ?base_names, "Compiling changed source files");
    compiler.compile(loader, source_root, base_names)
}
