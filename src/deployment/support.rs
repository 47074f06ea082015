use std::{
    collections::BTreeMap,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::compile::{CompileError, Compiler, compile_changed};
use crate::config::ClassChangeConfig;
use crate::fallback::ServiceController;
use crate::known::{ArtifactIndexes, KnownArtifactMap};
use crate::loader::{DeploymentClassLoader, LoaderId, class_path_for_name};
use crate::patch::fs_ops::{child_path, write_file};
use crate::patch::{DeploymentKind, PendingChanges, RepackageOutcome};
use crate::redefine::{RedefinitionAgent, RedefinitionCoordinator, RedefinitionOutcome, RedefinitionReport};
use crate::scanner::{self, CLASS_EXTENSION, JAVA_EXTENSION};

use super::ClassChangeError;
use super::gate::ScanGate;
use super::listener::{ClassChangeListener, indexed_for_loader};

/// External services a deployment's pipeline calls into.
#[derive(Clone)]
pub struct Collaborators {
    pub compiler: Arc<dyn Compiler>,
    pub agent: Arc<dyn RedefinitionAgent>,
    pub controller: Arc<dyn ServiceController>,
}

/// What one pipeline pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Source base names that were compiled.
    pub compiled_sources: Vec<String>,
    /// Binary names submitted as modified classes.
    pub modified: Vec<String>,
    /// Binary names submitted as added classes.
    pub added: Vec<String>,
    /// Web resources written to the deployment.
    pub web_resources: Vec<String>,
    /// How the class batch went live; `None` when no class changed.
    pub outcome: Option<RedefinitionOutcome>,
}

impl PassReport {
    pub fn is_empty(&self) -> bool {
        self.compiled_sources.is_empty()
            && self.modified.is_empty()
            && self.added.is_empty()
            && self.web_resources.is_empty()
    }
}

/// Result of asking a deployment to scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Another caller is scanning and will run one more pass on our behalf.
    Coalesced,
    /// Passes run by this caller, the first plus any coalesced reruns.
    Completed(Vec<PassReport>),
}

impl ScanOutcome {
    pub fn passes(&self) -> &[PassReport] {
        match self {
            Self::Coalesced => &[],
            Self::Completed(passes) => passes,
        }
    }

    pub fn has_changes(&self) -> bool {
        self.passes().iter().any(|pass| !pass.is_empty())
    }
}

/// Class-change orchestrator of a single deployment unit.
///
/// The class loader is delivered once after module resolution. Scans are
/// single-flight and notifications are serialized with them, so the indexes
/// only ever see one patch pass at a time.
pub struct DeploymentClassChangeSupport {
    name: String,
    kind: DeploymentKind,
    config: ClassChangeConfig,
    indexes: ArtifactIndexes,
    class_loader: OnceLock<Arc<dyn DeploymentClassLoader>>,
    listeners: RwLock<Vec<Arc<dyn ClassChangeListener>>>,
    instigating: AtomicBool,
    gate: ScanGate,
    pipeline: Mutex<()>,
    collaborators: Collaborators,
}

impl std::fmt::Debug for DeploymentClassChangeSupport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentClassChangeSupport")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("config", &self.config)
            .field("known_classes", &self.indexes.classes.len())
            .field("loader", &self.class_loader.get().map(|loader| loader.id()))
            .finish_non_exhaustive()
    }
}

impl DeploymentClassChangeSupport {
    /// Seed the deployment's indexes and build its orchestrator.
    pub fn activate(
        name: impl Into<String>,
        kind: DeploymentKind,
        config: ClassChangeConfig,
        collaborators: Collaborators,
    ) -> Result<Self, ClassChangeError> {
        let name = name.into();
        let indexes = ArtifactIndexes::default();
        kind.seed(&indexes)?;
        info!(
            deployment = %name,
            archive = kind.is_archive(),
            classes = indexes.classes.len(),
            web_resources = indexes.web_resources.len(),
            remote = config.is_remote(),
            "Class change support activated"
        );
        Ok(Self {
            name,
            kind,
            config,
            indexes,
            class_loader: OnceLock::new(),
            listeners: RwLock::new(Vec::new()),
            instigating: AtomicBool::new(false),
            gate: ScanGate::default(),
            pipeline: Mutex::new(()),
            collaborators,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &DeploymentKind {
        &self.kind
    }

    pub fn config(&self) -> &ClassChangeConfig {
        &self.config
    }

    /// Password remote push clients must present, when remote mode is on.
    pub fn remote_password(&self) -> Option<&str> {
        self.config.remote_password.as_deref()
    }

    /// Deliver the class loader once module resolution completed.
    pub fn set_class_loader(&self, loader: Arc<dyn DeploymentClassLoader>) -> Result<(), ClassChangeError> {
        let id = loader.id();
        self.class_loader
            .set(loader)
            .map_err(|_| ClassChangeError::LoaderAlreadySet(self.name.clone()))?;
        debug!(deployment = %self.name, loader = %id, "Class loader resolved");
        Ok(())
    }

    pub fn loader_id(&self) -> Option<LoaderId> {
        self.class_loader.get().map(|loader| loader.id())
    }

    /// True while this deployment is applying a change it started itself.
    pub fn is_instigating_change(&self) -> bool {
        self.instigating.load(Ordering::Acquire)
    }

    pub fn add_listener(&self, listener: Arc<dyn ClassChangeListener>) {
        self.listeners.write().push(listener);
    }

    /// Current class state, including patched and added classes.
    pub fn get_known_classes(&self) -> Result<KnownArtifactMap, ClassChangeError> {
        Ok(self.kind.known_classes(&self.indexes)?)
    }

    pub fn get_known_web_resources(&self) -> Result<KnownArtifactMap, ClassChangeError> {
        Ok(self.kind.known_web_resources(&self.indexes)?)
    }

    /// Scan the configured local roots and push any changes live.
    ///
    /// Returns [`ScanOutcome::Coalesced`] when a scan is already running; that
    /// scan performs one more pass before it returns. If it fails first, the
    /// pass is owed to the next caller.
    pub fn scan_for_changed_classes(&self) -> Result<ScanOutcome, ClassChangeError> {
        let Some(mut ticket) = self.gate.try_enter() else {
            debug!(deployment = %self.name, "Scan already running; coalesced");
            return Ok(ScanOutcome::Coalesced);
        };
        let mut passes = Vec::new();
        loop {
            passes.push(self.scan_pass()?);
            if !ticket.rerun_or_release() {
                break;
            }
        }
        Ok(ScanOutcome::Completed(passes))
    }

    /// Apply explicitly supplied changes, bypassing the local scan.
    ///
    /// Source keys are relative `.java` paths, class keys relative `.class`
    /// paths and web keys paths relative to the deployment root.
    pub fn notify_changed_classes(
        &self,
        sources: &BTreeMap<String, Vec<u8>>,
        classes: BTreeMap<String, Vec<u8>>,
        web_resources: BTreeMap<String, Vec<u8>>,
    ) -> Result<PassReport, ClassChangeError> {
        let _pipeline = self.pipeline.lock();
        let loader = self.loader()?;
        let known_classes = self.kind.known_classes(&self.indexes)?;
        let mut pending = PendingChanges {
            classes,
            web_resources,
        };
        let mut compiled_sources = Vec::with_capacity(sources.len());
        for path in sources.keys() {
            let Some(base) = path.strip_suffix(JAVA_EXTENSION) else {
                return Err(ClassChangeError::NotASourceFile(path.clone()));
            };
            compiled_sources.push(base.to_string());
        }
        if !sources.is_empty() {
            let staging = tempfile::tempdir().map_err(|source| CompileError::Io {
                path: std::env::temp_dir(),
                source,
            })?;
            for (path, bytes) in sources {
                write_file(&child_path(staging.path(), path)?, bytes)?;
            }
            let compiled = compile_changed(
                self.collaborators.compiler.as_ref(),
                loader.as_ref(),
                staging.path(),
                &compiled_sources,
            )?;
            merge_compiled(&mut pending, compiled);
        }
        if pending.is_empty() {
            return Ok(PassReport::default());
        }
        self.patch_and_redefine(pending, &known_classes, loader.as_ref(), compiled_sources)
    }

    /// Deliver a redefinition report; entries for other loaders are ignored.
    ///
    /// Changes this deployment did not start itself (a debugger, another
    /// deployment) are first persisted to its storage.
    pub fn after_change(&self, report: &RedefinitionReport) {
        let Some(loader) = self.loader_id() else {
            return;
        };
        if !self.is_instigating_change() {
            self.handle_non_instigated_change(report, loader);
        }
        let (changed, added) = indexed_for_loader(report, loader);
        if changed.is_empty() && added.is_empty() {
            return;
        }
        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();
        for listener in listeners {
            listener.classes_replaced(&changed, &added);
        }
    }

    /// Release the deployment's storage; archives get their patches folded in.
    pub fn deployment_unmounted(&self) -> Result<RepackageOutcome, ClassChangeError> {
        let _pipeline = self.pipeline.lock();
        let outcome = self.kind.unmount()?;
        info!(deployment = %self.name, outcome = ?outcome, "Deployment unmounted");
        Ok(outcome)
    }

    fn scan_pass(&self) -> Result<PassReport, ClassChangeError> {
        let _pipeline = self.pipeline.lock();
        let roots = self.config.scan_roots();
        if roots.is_empty() {
            return Ok(PassReport::default());
        }
        let loader = self.loader()?;
        let known_classes = self.kind.known_classes(&self.indexes)?;
        let known_web_resources = self.kind.known_web_resources(&self.indexes)?;
        let changes = scanner::scan(&roots, &known_classes, &known_web_resources)?;
        if changes.is_empty() {
            return Ok(PassReport::default());
        }
        debug!(
            deployment = %self.name,
            sources = changes.changed_source_files.len(),
            classes = changes.changed_class_files.len(),
            web_resources = changes.changed_web_resources.len(),
            "Detected changes"
        );

        let mut pending = PendingChanges {
            classes: changes.changed_class_files,
            web_resources: changes.changed_web_resources,
        };
        let compiled_sources: Vec<String> = changes.changed_source_files.into_keys().collect();
        if let Some(source_root) = roots.sources.as_deref()
            && !compiled_sources.is_empty()
        {
            let compiled = compile_changed(
                self.collaborators.compiler.as_ref(),
                loader.as_ref(),
                source_root,
                &compiled_sources,
            )?;
            merge_compiled(&mut pending, compiled);
        }
        self.patch_and_redefine(pending, &known_classes, loader.as_ref(), compiled_sources)
    }

    fn patch_and_redefine(
        &self,
        pending: PendingChanges,
        known_classes: &KnownArtifactMap,
        loader: &dyn DeploymentClassLoader,
        compiled_sources: Vec<String>,
    ) -> Result<PassReport, ClassChangeError> {
        let web_resources = pending.web_resources.keys().cloned().collect();
        let resolved = self.kind.apply(pending, known_classes, &self.indexes, loader)?;
        let mut report = PassReport {
            compiled_sources,
            modified: resolved.modified_names().into_iter().map(str::to_string).collect(),
            added: resolved.added_names().into_iter().map(str::to_string).collect(),
            web_resources,
            outcome: None,
        };
        if resolved.is_empty() {
            return Ok(report);
        }
        let coordinator = RedefinitionCoordinator {
            agent: self.collaborators.agent.as_ref(),
            controller: self.collaborators.controller.as_ref(),
            instigating: &self.instigating,
        };
        let outcome = coordinator.apply(&resolved, &|changes: &RedefinitionReport| {
            self.after_change(changes)
        })?;
        info!(deployment = %self.name, outcome = ?outcome, "Class changes applied");
        report.outcome = Some(outcome);
        Ok(report)
    }

    fn handle_non_instigated_change(&self, report: &RedefinitionReport, loader: LoaderId) {
        let changed = report
            .changed
            .iter()
            .filter(|class| class.class.loader == loader)
            .map(|class| (class.class.name.as_str(), class.data.as_slice()));
        let added = report
            .added
            .iter()
            .filter(|class| class.loader == loader)
            .map(|class| (class.class_name.as_str(), class.data.as_slice()));
        for (name, data) in changed.chain(added) {
            let class_path = class_path_for_name(name);
            if let Err(err) = self.kind.write_external_class(&class_path, data, &self.indexes) {
                warn!(
                    deployment = %self.name,
                    class = %name,
                    error = %err,
                    "Failed to persist externally redefined class"
                );
            }
        }
    }

    fn loader(&self) -> Result<Arc<dyn DeploymentClassLoader>, ClassChangeError> {
        self.class_loader
            .get()
            .cloned()
            .ok_or_else(|| ClassChangeError::LoaderNotSet(self.name.clone()))
    }
}

fn merge_compiled(pending: &mut PendingChanges, compiled: crate::compile::CompiledClasses) {
    for (base_name, bytes) in compiled {
        pending
            .classes
            .insert(format!("{base_name}{CLASS_EXTENSION}"), bytes);
    }
}
