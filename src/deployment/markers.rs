//! Service controller driving a deployment through filesystem marker files.
//!
//! A filesystem deployment scanner watches `<name>.<marker>` files next to
//! each deployment. Removing `.deployed` undeploys it, the scanner answers
//! with `.undeployed`; writing `.dodeploy` deploys it again and the scanner
//! answers with `.deployed` or `.failed`.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::fallback::{
    LifecycleEvent, LifecycleListener, ListenerId, ServiceController, ServiceError, ServiceMode,
};

/// Marker file suffixes understood by the deployment scanner.
pub mod suffix {
    pub const DEPLOYED: &str = ".deployed";
    pub const FAILED: &str = ".failed";
    pub const DO_DEPLOY: &str = ".dodeploy";
    pub const DEPLOYING: &str = ".isdeploying";
    pub const UNDEPLOYING: &str = ".isundeploying";
    pub const UNDEPLOYED: &str = ".undeployed";
    pub const SKIP_DEPLOY: &str = ".skipdeploy";
    pub const PENDING: &str = ".pending";
}

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// [`ServiceController`] speaking the marker-file protocol for one deployment.
///
/// Lifecycle listeners are invoked synchronously: `Down` from within
/// `set_mode(Never)` once the scanner confirms the undeploy, `Up`/`Failed`
/// from within `await_stability`.
pub struct MarkerFileController {
    deployments_dir: PathBuf,
    deployment_name: String,
    timeout: Duration,
    poll_interval: Duration,
    listeners: Mutex<Vec<(ListenerId, Arc<LifecycleListener>)>>,
    interrupted: AtomicBool,
}

impl MarkerFileController {
    /// Controller for the deployment at `deployment` (an archive or directory).
    pub fn new(deployment: &Path, timeout: Duration) -> Result<Self, ServiceError> {
        let invalid = || ServiceError::Io {
            path: deployment.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "deployment path has no parent directory or file name",
            ),
        };
        let deployments_dir = deployment
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .ok_or_else(invalid)?
            .to_path_buf();
        let deployment_name = deployment
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(invalid)?
            .to_string();
        Ok(Self {
            deployments_dir,
            deployment_name,
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
            listeners: Mutex::new(Vec::new()),
            interrupted: AtomicBool::new(false),
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Path of the marker with `suffix` for this deployment.
    pub fn marker(&self, suffix: &str) -> PathBuf {
        self.deployments_dir
            .join(format!("{}{suffix}", self.deployment_name))
    }

    /// Abort the current (and any later) wait with [`ServiceError::Interrupted`].
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    fn emit(&self, event: LifecycleEvent) {
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        debug!(deployment = %self.deployment_name, event = ?event, "Lifecycle event");
        for listener in listeners {
            listener(self, event);
        }
    }

    fn exists(&self, suffix: &str) -> bool {
        self.marker(suffix).exists()
    }

    fn remove(&self, suffix: &str) -> Result<(), ServiceError> {
        let path = self.marker(suffix);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ServiceError::Io { path, source }),
        }
    }

    fn write(&self, suffix: &str, contents: &str) -> Result<(), ServiceError> {
        let path = self.marker(suffix);
        fs::write(&path, contents).map_err(|source| ServiceError::Io { path, source })
    }

    fn wait_until(&self, condition: impl Fn() -> bool) -> Result<(), ServiceError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if self.interrupted.load(Ordering::Acquire) {
                return Err(ServiceError::Interrupted);
            }
            if condition() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ServiceError::Timeout(self.timeout));
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn in_transition(&self) -> bool {
        [
            suffix::DO_DEPLOY,
            suffix::DEPLOYING,
            suffix::UNDEPLOYING,
            suffix::PENDING,
        ]
        .into_iter()
        .any(|suffix| self.exists(suffix))
    }
}

impl ServiceController for MarkerFileController {
    fn set_mode(&self, mode: ServiceMode) -> Result<(), ServiceError> {
        match mode {
            ServiceMode::Never => {
                if !self.exists(suffix::DEPLOYED) && !self.exists(suffix::DEPLOYING) {
                    debug!(deployment = %self.deployment_name, "Deployment already stopped");
                    self.emit(LifecycleEvent::Down);
                    return Ok(());
                }
                info!(deployment = %self.deployment_name, "Requesting undeploy");
                self.remove(suffix::DO_DEPLOY)?;
                self.remove(suffix::DEPLOYED)?;
                self.wait_until(|| {
                    self.exists(suffix::UNDEPLOYED) && !self.exists(suffix::UNDEPLOYING)
                })?;
                self.emit(LifecycleEvent::Down);
            }
            ServiceMode::Active => {
                info!(deployment = %self.deployment_name, "Requesting deploy");
                self.write(suffix::DO_DEPLOY, "")?;
                self.remove(suffix::UNDEPLOYED)?;
                self.remove(suffix::FAILED)?;
                self.remove(suffix::SKIP_DEPLOY)?;
            }
        }
        Ok(())
    }

    fn add_lifecycle_listener(&self, listener: LifecycleListener) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    fn remove_lifecycle_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(existing, _)| *existing != id);
    }

    fn await_stability(&self) -> Result<(), ServiceError> {
        self.wait_until(|| {
            !self.in_transition()
                && [suffix::DEPLOYED, suffix::FAILED, suffix::UNDEPLOYED]
                    .into_iter()
                    .any(|suffix| self.exists(suffix))
        })?;
        if self.exists(suffix::FAILED) {
            let path = self.marker(suffix::FAILED);
            let reason = fs::read_to_string(&path).map_err(|source| ServiceError::Io { path, source })?;
            self.emit(LifecycleEvent::Failed);
            return Err(ServiceError::Failed {
                name: self.deployment_name.clone(),
                reason: reason.trim().to_string(),
            });
        }
        if self.exists(suffix::DEPLOYED) {
            self.emit(LifecycleEvent::Up);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::{FallbackError, redeploy};
    use tempfile::tempdir;

    /// Minimal deployment scanner reacting to marker files until dropped.
    struct FakeScanner {
        stop: Arc<AtomicBool>,
        handle: Option<thread::JoinHandle<()>>,
    }

    impl FakeScanner {
        fn start(dir: &Path, name: &str, fail_with: Option<&'static str>) -> Self {
            let stop = Arc::new(AtomicBool::new(false));
            let thread_stop = Arc::clone(&stop);
            let marker = {
                let dir = dir.to_path_buf();
                let name = name.to_string();
                move |suffix: &str| dir.join(format!("{name}{suffix}"))
            };
            let handle = thread::spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    if marker(suffix::DO_DEPLOY).exists() {
                        let _ = fs::remove_file(marker(suffix::UNDEPLOYED));
                        match fail_with {
                            Some(reason) => fs::write(marker(suffix::FAILED), reason).unwrap(),
                            None => fs::write(marker(suffix::DEPLOYED), "").unwrap(),
                        }
                        fs::remove_file(marker(suffix::DO_DEPLOY)).unwrap();
                    } else if !marker(suffix::DEPLOYED).exists()
                        && !marker(suffix::UNDEPLOYED).exists()
                        && !marker(suffix::FAILED).exists()
                    {
                        fs::write(marker(suffix::UNDEPLOYED), "").unwrap();
                    }
                    thread::sleep(Duration::from_millis(2));
                }
            });
            Self {
                stop,
                handle: Some(handle),
            }
        }
    }

    impl Drop for FakeScanner {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Release);
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }

    fn deployed(dir: &Path) -> MarkerFileController {
        let deployment = dir.join("app.war");
        fs::create_dir(&deployment).unwrap();
        fs::write(dir.join("app.war.deployed"), "").unwrap();
        MarkerFileController::new(&deployment, Duration::from_secs(10))
            .unwrap()
            .with_poll_interval(Duration::from_millis(2))
    }

    #[test]
    fn redeploy_cycles_markers() {
        let dir = tempdir().unwrap();
        let controller = deployed(dir.path());
        let _scanner = FakeScanner::start(dir.path(), "app.war", None);

        redeploy(&controller).unwrap();

        assert!(controller.marker(suffix::DEPLOYED).exists());
        assert!(!controller.marker(suffix::DO_DEPLOY).exists());
    }

    #[test]
    fn failed_marker_is_a_service_error() {
        let dir = tempdir().unwrap();
        let controller = deployed(dir.path());
        let _scanner = FakeScanner::start(dir.path(), "app.war", Some("missing dependency"));

        let err = redeploy(&controller).unwrap_err();

        match err {
            FallbackError::Service(ServiceError::Failed { name, reason }) => {
                assert_eq!(name, "app.war");
                assert_eq!(reason, "missing dependency");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn undeploy_wait_times_out_without_scanner() {
        let dir = tempdir().unwrap();
        let deployment = dir.path().join("lib.jar");
        fs::write(&deployment, b"PK").unwrap();
        fs::write(dir.path().join("lib.jar.deployed"), "").unwrap();
        let controller = MarkerFileController::new(&deployment, Duration::from_millis(30))
            .unwrap()
            .with_poll_interval(Duration::from_millis(5));

        let err = controller.set_mode(ServiceMode::Never).unwrap_err();

        assert!(matches!(err, ServiceError::Timeout(_)));
        assert!(!controller.marker(suffix::DEPLOYED).exists());
    }

    #[test]
    fn interrupt_aborts_wait() {
        let dir = tempdir().unwrap();
        let controller = Arc::new(deployed(dir.path()));
        let interrupter = {
            let controller = Arc::clone(&controller);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                controller.interrupt();
            })
        };

        let err = redeploy(controller.as_ref()).unwrap_err();
        interrupter.join().unwrap();

        assert!(matches!(err, FallbackError::Interrupted));
    }

    #[test]
    fn stopped_deployment_reports_down_immediately() {
        let dir = tempdir().unwrap();
        let deployment = dir.path().join("app.war");
        fs::create_dir(&deployment).unwrap();
        let controller = MarkerFileController::new(&deployment, Duration::from_millis(30)).unwrap();
        let downs = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&downs);
        controller.add_lifecycle_listener(Box::new(
            move |_: &dyn ServiceController, event: LifecycleEvent| {
                if event == LifecycleEvent::Down {
                    seen.fetch_add(1, Ordering::Relaxed);
                }
            },
        ));

        controller.set_mode(ServiceMode::Never).unwrap();

        assert_eq!(downs.load(Ordering::Relaxed), 1);
    }
}
