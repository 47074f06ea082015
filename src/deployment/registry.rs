use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::RwLock;
use tracing::{error, info};

use crate::compile::Compiler;
use crate::config::load_for_deployment;
use crate::fallback::ServiceController;
use crate::loader::DeploymentClassLoader;
use crate::patch::{DeploymentKind, RepackageOutcome};
use crate::redefine::{RedefinitionAgent, RedefinitionReport};

use super::ClassChangeError;
use super::support::{Collaborators, DeploymentClassChangeSupport, ScanOutcome};

/// A deployment as handed over by the server's deployment pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentUnit {
    /// Runtime name, e.g. `app.war`.
    pub name: String,
    /// Deployed archive file or exploded directory.
    pub root: PathBuf,
}

impl DeploymentUnit {
    /// Unit named after the last component of `root`.
    pub fn from_path(root: &Path) -> Option<Self> {
        let name = root.file_name()?.to_str()?.to_string();
        Some(Self {
            name,
            root: root.to_path_buf(),
        })
    }
}

/// Installs and tears down one class-change orchestrator per deployment.
pub struct ClassChangeRegistry {
    temp_dir: PathBuf,
    compiler: Arc<dyn Compiler>,
    agent: Arc<dyn RedefinitionAgent>,
    deployments: RwLock<BTreeMap<String, Arc<DeploymentClassChangeSupport>>>,
}

impl ClassChangeRegistry {
    pub fn new(
        temp_dir: PathBuf,
        compiler: Arc<dyn Compiler>,
        agent: Arc<dyn RedefinitionAgent>,
    ) -> Self {
        Self {
            temp_dir,
            compiler,
            agent,
            deployments: RwLock::new(BTreeMap::new()),
        }
    }

    /// Activate class-change support for `unit`.
    ///
    /// Detects archive vs exploded storage, reads the deployment's properties
    /// and seeds its indexes. The class loader arrives later through
    /// [`ClassChangeRegistry::module_resolved`].
    pub fn activate(
        &self,
        unit: DeploymentUnit,
        controller: Arc<dyn ServiceController>,
    ) -> Result<Arc<DeploymentClassChangeSupport>, ClassChangeError> {
        if self.deployments.read().contains_key(&unit.name) {
            return Err(ClassChangeError::DuplicateDeployment(unit.name));
        }
        let kind = DeploymentKind::detect(&unit.name, &unit.root, &self.temp_dir)?;
        let config = load_for_deployment(&kind)?;
        let support = Arc::new(DeploymentClassChangeSupport::activate(
            unit.name.clone(),
            kind,
            config,
            Collaborators {
                compiler: Arc::clone(&self.compiler),
                agent: Arc::clone(&self.agent),
                controller,
            },
        )?);
        let mut deployments = self.deployments.write();
        if deployments.contains_key(&unit.name) {
            return Err(ClassChangeError::DuplicateDeployment(unit.name));
        }
        deployments.insert(unit.name, Arc::clone(&support));
        Ok(support)
    }

    /// Deliver the deployment's class loader; only the first delivery is accepted.
    pub fn module_resolved(
        &self,
        name: &str,
        loader: Arc<dyn DeploymentClassLoader>,
    ) -> Result<(), ClassChangeError> {
        self.require(name)?.set_class_loader(loader)
    }

    pub fn get(&self, name: &str) -> Option<Arc<DeploymentClassChangeSupport>> {
        self.deployments.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.deployments.read().keys().cloned().collect()
    }

    /// Scan every deployment that already has its class loader.
    ///
    /// A failing deployment is logged and reported without stopping the others.
    pub fn scan_all(&self) -> Vec<(String, Result<ScanOutcome, ClassChangeError>)> {
        let deployments: Vec<_> = self.deployments.read().values().cloned().collect();
        deployments
            .into_iter()
            .filter(|support| support.loader_id().is_some())
            .map(|support| {
                let result = support.scan_for_changed_classes();
                if let Err(err) = &result {
                    error!(deployment = %support.name(), error = %err, "Class change scan failed");
                }
                (support.name().to_string(), result)
            })
            .collect()
    }

    /// Hand a redefinition made outside any deployment (e.g. by a debugger) to all of them.
    pub fn broadcast_change(&self, report: &RedefinitionReport) {
        let deployments: Vec<_> = self.deployments.read().values().cloned().collect();
        for support in deployments {
            support.after_change(report);
        }
    }

    /// Unmount and forget the deployment.
    pub fn undeploy(&self, name: &str) -> Result<RepackageOutcome, ClassChangeError> {
        let support = self
            .deployments
            .write()
            .remove(name)
            .ok_or_else(|| ClassChangeError::UnknownDeployment(name.to_string()))?;
        let outcome = support.deployment_unmounted()?;
        info!(deployment = %name, "Class change support removed");
        Ok(outcome)
    }

    fn require(&self, name: &str) -> Result<Arc<DeploymentClassChangeSupport>, ClassChangeError> {
        self.get(name)
            .ok_or_else(|| ClassChangeError::UnknownDeployment(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::CommandCompiler;
    use crate::fallback::{LifecycleListener, ListenerId, ServiceError, ServiceMode};
    use crate::loader::StaticClassLoader;
    use crate::redefine::UnavailableAgent;
    use tempfile::tempdir;

    struct IdleController;

    impl ServiceController for IdleController {
        fn set_mode(&self, _mode: ServiceMode) -> Result<(), ServiceError> {
            Ok(())
        }

        fn add_lifecycle_listener(&self, _listener: LifecycleListener) -> ListenerId {
            ListenerId::next()
        }

        fn remove_lifecycle_listener(&self, _id: ListenerId) {}

        fn await_stability(&self) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    fn registry(temp: &Path) -> ClassChangeRegistry {
        ClassChangeRegistry::new(
            temp.to_path_buf(),
            Arc::new(CommandCompiler::default()),
            Arc::new(UnavailableAgent),
        )
    }

    fn exploded_unit(dir: &Path) -> DeploymentUnit {
        let root = dir.join("app.war");
        std::fs::create_dir_all(root.join("WEB-INF/classes")).unwrap();
        DeploymentUnit::from_path(&root).unwrap()
    }

    #[test]
    fn activation_is_unique_per_name() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());
        let unit = exploded_unit(dir.path());
        registry.activate(unit.clone(), Arc::new(IdleController)).unwrap();
        let err = registry.activate(unit, Arc::new(IdleController)).unwrap_err();
        assert!(matches!(err, ClassChangeError::DuplicateDeployment(name) if name == "app.war"));
        assert_eq!(registry.names(), vec!["app.war".to_string()]);
    }

    #[test]
    fn class_loader_is_delivered_once() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());
        registry
            .activate(exploded_unit(dir.path()), Arc::new(IdleController))
            .unwrap();
        let loader: Arc<dyn DeploymentClassLoader> = Arc::new(StaticClassLoader::new(Vec::new()));
        registry.module_resolved("app.war", Arc::clone(&loader)).unwrap();
        let err = registry.module_resolved("app.war", loader).unwrap_err();
        assert!(matches!(err, ClassChangeError::LoaderAlreadySet(_)));
    }

    #[test]
    fn scan_all_skips_unresolved_deployments() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());
        registry
            .activate(exploded_unit(dir.path()), Arc::new(IdleController))
            .unwrap();
        assert!(registry.scan_all().is_empty());
    }

    #[test]
    fn undeploy_forgets_the_deployment() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());
        registry
            .activate(exploded_unit(dir.path()), Arc::new(IdleController))
            .unwrap();
        assert_eq!(registry.undeploy("app.war").unwrap(), RepackageOutcome::Untouched);
        assert!(registry.get("app.war").is_none());
        assert!(matches!(
            registry.undeploy("app.war"),
            Err(ClassChangeError::UnknownDeployment(_))
        ));
    }
}
