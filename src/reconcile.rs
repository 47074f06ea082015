//! Precedence and classification rules for changed classes.

use crate::loader::{ClassLoadError, DeploymentClassLoader, LoadedClass, LoaderId, class_name_for_path};

/// Whether an externally compiled class supersedes a pending source.
///
/// The class wins when no source is pending or when it is not older than the
/// pending source, which signals that the developer compiled it by hand.
pub fn manual_class_wins(pending_source_ms: Option<i64>, class_ms: i64) -> bool {
    pending_source_ms.is_none_or(|source_ms| class_ms >= source_ms)
}

/// New bytecode for a class the deployment has already loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDefinition {
    pub class: LoadedClass,
    pub bytecode: Vec<u8>,
}

/// Bytecode for a class the deployment has never loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedClass {
    pub name: String,
    pub loader: LoaderId,
    pub bytecode: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedClassChange {
    Modified(ClassDefinition),
    Added(AddedClass),
}

/// Modified and added classes of one batch, submitted together.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResolvedClassChanges {
    pub modified: Vec<ClassDefinition>,
    pub added: Vec<AddedClass>,
}

impl ResolvedClassChanges {
    pub fn push(&mut self, change: ResolvedClassChange) {
        match change {
            ResolvedClassChange::Modified(definition) => self.modified.push(definition),
            ResolvedClassChange::Added(added) => self.added.push(added),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.added.is_empty()
    }

    pub fn modified_names(&self) -> Vec<&str> {
        self.modified
            .iter()
            .map(|definition| definition.class.name.as_str())
            .collect()
    }

    pub fn added_names(&self) -> Vec<&str> {
        self.added.iter().map(|added| added.name.as_str()).collect()
    }
}

/// Classify a changed class path as modified (already known) or added.
///
/// `is_known` must reflect the deployment's current class state, including
/// classes introduced by earlier patches. Paths that are not class files
/// yield `None`.
pub fn classify(
    path: &str,
    bytecode: Vec<u8>,
    is_known: bool,
    loader: &dyn DeploymentClassLoader,
) -> Result<Option<ResolvedClassChange>, ClassLoadError> {
    let Some(name) = class_name_for_path(path) else {
        return Ok(None);
    };
    let change = if is_known {
        ResolvedClassChange::Modified(ClassDefinition {
            class: loader.load_class(&name)?,
            bytecode,
        })
    } else {
        ResolvedClassChange::Added(AddedClass {
            name,
            loader: loader.id(),
            bytecode,
        })
    };
    Ok(Some(change))
}
