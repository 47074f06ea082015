use tracing::warn;

use crate::classfile::{ClassInfo, index_class};
use crate::loader::{LoadedClass, LoaderId};
use crate::redefine::RedefinitionReport;

/// A redefined class together with its indexed metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedClassDefinition {
    pub class: LoadedClass,
    pub data: Vec<u8>,
    pub info: ClassInfo,
}

/// A class newly made available to the deployment's loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClassDefinition {
    pub name: String,
    pub loader: LoaderId,
    pub data: Vec<u8>,
    pub info: ClassInfo,
}

/// Notified after every successful redefinition touching a deployment.
pub trait ClassChangeListener: Send + Sync {
    fn classes_replaced(&self, changed: &[ChangedClassDefinition], added: &[NewClassDefinition]);
}

impl<F> ClassChangeListener for F
where
    F: Fn(&[ChangedClassDefinition], &[NewClassDefinition]) + Send + Sync,
{
    fn classes_replaced(&self, changed: &[ChangedClassDefinition], added: &[NewClassDefinition]) {
        self(changed, added)
    }
}

/// Entries of `report` that belong to `loader`, indexed for listeners.
///
/// Classes whose bytes cannot be indexed are logged and left out; the
/// redefinition itself already happened.
pub(crate) fn indexed_for_loader(
    report: &RedefinitionReport,
    loader: LoaderId,
) -> (Vec<ChangedClassDefinition>, Vec<NewClassDefinition>) {
    let changed = report
        .changed
        .iter()
        .filter(|class| class.class.loader == loader)
        .filter_map(|class| {
            let info = index_or_warn(&class.class.name, &class.data)?;
            Some(ChangedClassDefinition {
                class: class.class.clone(),
                data: class.data.clone(),
                info,
            })
        })
        .collect();
    let added = report
        .added
        .iter()
        .filter(|class| class.loader == loader)
        .filter_map(|class| {
            let info = index_or_warn(&class.class_name, &class.data)?;
            Some(NewClassDefinition {
                name: class.class_name.clone(),
                loader: class.loader,
                data: class.data.clone(),
                info,
            })
        })
        .collect();
    (changed, added)
}

fn index_or_warn(name: &str, data: &[u8]) -> Option<ClassInfo> {
    match index_class(data) {
        Ok(info) => Some(info),
        Err(err) => {
            warn!(class = %name, error = %err, "Cannot index class");
            None
        }
    }
}
