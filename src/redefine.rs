//! Redefinition step: submit one batch to the agent, fall back to redeploy on refusal.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use thiserror::Error;
use tracing::{info, warn};

use crate::fallback::{FallbackError, ServiceController, redeploy};
use crate::loader::{LoadedClass, LoaderId};
use crate::reconcile::{AddedClass, ClassDefinition, ResolvedClassChanges};

#[derive(Debug, Error)]
pub enum RedefinitionError {
    #[error("Redefinition rejected: {0}")]
    Rejected(String),
    #[error("Change to {class} is not supported: {reason}")]
    Unsupported { class: String, reason: String },
}

/// A live class whose bytecode was replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedClass {
    pub class: LoadedClass,
    pub data: Vec<u8>,
}

/// A class made available to a loader for the first time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClassData {
    pub class_name: String,
    pub loader: LoaderId,
    pub data: Vec<u8>,
}

/// What an agent actually changed, as reported back to deployments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedefinitionReport {
    pub changed: Vec<ChangedClass>,
    pub added: Vec<NewClassData>,
}

impl RedefinitionReport {
    /// Report describing exactly the submitted batch.
    pub fn for_batch(modified: &[ClassDefinition], added: &[AddedClass]) -> Self {
        Self {
            changed: modified
                .iter()
                .map(|definition| ChangedClass {
                    class: definition.class.clone(),
                    data: definition.bytecode.clone(),
                })
                .collect(),
            added: added
                .iter()
                .map(|class| NewClassData {
                    class_name: class.name.clone(),
                    loader: class.loader,
                    data: class.bytecode.clone(),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.added.is_empty()
    }
}

/// External service able to swap bytecode of loaded classes in place.
///
/// A batch is all-or-nothing: an error means nothing was redefined.
pub trait RedefinitionAgent: Send + Sync {
    fn redefine(
        &self,
        modified: &[ClassDefinition],
        added: &[AddedClass],
    ) -> Result<RedefinitionReport, RedefinitionError>;
}

/// Agent used when no redefinition service is attached; every batch is refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableAgent;

impl RedefinitionAgent for UnavailableAgent {
    fn redefine(
        &self,
        _modified: &[ClassDefinition],
        _added: &[AddedClass],
    ) -> Result<RedefinitionReport, RedefinitionError> {
        Err(RedefinitionError::Rejected(
            "no redefinition agent attached".to_string(),
        ))
    }
}

/// Marks a deployment as the instigator of the change in flight.
///
/// The flag is cleared when the guard drops, on every exit path.
#[derive(Debug)]
pub struct InstigationGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InstigationGuard<'a> {
    pub fn acquire(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self { flag }
    }
}

impl Drop for InstigationGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// How a batch ended up live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedefinitionOutcome {
    Redefined { changed: usize, added: usize },
    Redeployed { elapsed: Duration },
}

/// Applies resolved batches through an agent, with redeploy as the only fallback.
pub struct RedefinitionCoordinator<'a> {
    pub agent: &'a dyn RedefinitionAgent,
    pub controller: &'a dyn ServiceController,
    pub instigating: &'a AtomicBool,
}

impl RedefinitionCoordinator<'_> {
    /// Submit `changes` as one batch.
    ///
    /// `after_change` receives the agent's report while the instigation flag
    /// is still set. Any agent error triggers a full redeploy of the owning
    /// service.
    pub fn apply(
        &self,
        changes: &ResolvedClassChanges,
        after_change: &dyn Fn(&RedefinitionReport),
    ) -> Result<RedefinitionOutcome, FallbackError> {
        let _guard = InstigationGuard::acquire(self.instigating);
        info!(
            modified = ?changes.modified_names(),
            added = ?changes.added_names(),
            "Attempting to replace classes"
        );
        match self.agent.redefine(&changes.modified, &changes.added) {
            Ok(report) => {
                let outcome = RedefinitionOutcome::Redefined {
                    changed: report.changed.len(),
                    added: report.added.len(),
                };
                after_change(&report);
                Ok(outcome)
            }
            Err(err) => {
                warn!(error = %err, "Class replacement failed, falling back to redeployment");
                let elapsed = redeploy(self.controller)?;
                Ok(RedefinitionOutcome::Redeployed { elapsed })
            }
        }
    }
}
