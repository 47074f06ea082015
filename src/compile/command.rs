use std::{path::Path, process::Command};

use tracing::debug;

use crate::loader::DeploymentClassLoader;
use crate::scanner::{CLASS_EXTENSION, JAVA_EXTENSION, Skip, visit_files};

use super::{CompileError, CompiledClasses, Compiler};

/// Compiler that shells out to a `javac`-compatible program.
///
/// Output lands in a scratch directory that is removed once the bytecode has
/// been read back into memory.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    program: String,
    args: Vec<String>,
}

impl CommandCompiler {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for CommandCompiler {
    fn default() -> Self {
        Self::new("javac", Vec::new())
    }
}

impl Compiler for CommandCompiler {
    fn compile(
        &self,
        loader: &dyn DeploymentClassLoader,
        source_root: &Path,
        base_names: &[String],
    ) -> Result<CompiledClasses, CompileError> {
        let output_dir = tempfile::Builder::new()
            .prefix("class-change-javac")
            .tempdir()
            .map_err(|source| CompileError::Io {
                path: std::env::temp_dir(),
                source,
            })?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("-d")
            .arg(output_dir.path())
            .arg("-sourcepath")
            .arg(source_root);
        let class_path = loader.class_path();
        if !class_path.is_empty() {
            let joined = std::env::join_paths(&class_path)
                .map_err(|err| CompileError::ClassPath(err.to_string()))?;
            command.arg("-classpath").arg(joined);
        }
        for base_name in base_names {
            command.arg(source_root.join(format!("{base_name}{JAVA_EXTENSION}")));
        }
        debug!(program = %self.program, count = base_names.len(), "Launching compiler");
        let output = command.output().map_err(|source| CompileError::Launch {
            program: self.program.clone(),
            source,
        })?;
        if !output.status.success() {
            let mut diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
            diagnostics.push_str(&String::from_utf8_lossy(&output.stdout));
            return Err(CompileError::Failed {
                diagnostics: diagnostics.trim_end().to_string(),
            });
        }
        read_output(output_dir.path())
    }
}

fn read_output(dir: &Path) -> Result<CompiledClasses, CompileError> {
    let mut compiled = CompiledClasses::new();
    visit_files(dir, Skip::Nothing, &mut |relative, path| {
        if let Some(base_name) = relative.strip_suffix(CLASS_EXTENSION) {
            let bytes = std::fs::read(path).map_err(|source| crate::scanner::ScanError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            compiled.insert(base_name.to_string(), bytes);
        }
        Ok(())
    })?;
    Ok(compiled)
}
