//! Redeployment fallback: a controlled stop/start cycle of the owning service.
//!
//! The service is set to never start, which stops it asynchronously. When the
//! stop completes the mode is set back to active, and the calling thread
//! blocks until the service container reports stability.

use std::{
    fmt,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, info};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceMode {
    /// Administratively stopped; the service never starts on its own.
    Never,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Up,
    Down,
    Removed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub type LifecycleListener = Box<dyn Fn(&dyn ServiceController, LifecycleEvent) + Send + Sync>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Interrupted while waiting for the service container")]
    Interrupted,
    #[error("Timed out after {0:?} waiting for the service container")]
    Timeout(Duration),
    #[error("Service {name} failed: {reason}")]
    Failed { name: String, reason: String },
    #[error("Service I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Controller of the service that owns a deployment.
pub trait ServiceController: Send + Sync {
    fn set_mode(&self, mode: ServiceMode) -> Result<(), ServiceError>;

    /// Register a lifecycle listener. It may be invoked on any thread,
    /// including synchronously from within [`ServiceController::set_mode`].
    fn add_lifecycle_listener(&self, listener: LifecycleListener) -> ListenerId;

    fn remove_lifecycle_listener(&self, id: ListenerId);

    /// Block until the container has no pending service transitions.
    fn await_stability(&self) -> Result<(), ServiceError>;
}

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("Redeployment interrupted while awaiting stability")]
    Interrupted,
    #[error("Redeployment failed: {0}")]
    Service(#[from] ServiceError),
    #[error("Service did not stop before the container became stable")]
    NeverStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FallbackState {
    Running,
    Stopping,
    Stopped,
    Starting,
}

impl fmt::Display for FallbackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Starting => "starting",
        };
        f.write_str(label)
    }
}

#[derive(Debug)]
struct Cycle {
    state: FallbackState,
    restart_error: Option<ServiceError>,
}

/// Stop and restart the service behind `controller`, returning the time taken.
pub fn redeploy(controller: &dyn ServiceController) -> Result<Duration, FallbackError> {
    info!("Attempting redeployment");
    let started = Instant::now();
    let cycle = Arc::new(Mutex::new(Cycle {
        state: FallbackState::Running,
        restart_error: None,
    }));

    let listener_cycle = Arc::clone(&cycle);
    let listener_id = controller.add_lifecycle_listener(Box::new(
        move |controller: &dyn ServiceController, event: LifecycleEvent| {
            {
                let mut cycle = listener_cycle.lock();
                if cycle.state != FallbackState::Stopping || event != LifecycleEvent::Down {
                    return;
                }
                cycle.state = FallbackState::Stopped;
            }
            let restarted = controller.set_mode(ServiceMode::Active);
            let mut cycle = listener_cycle.lock();
            match restarted {
                Ok(()) => cycle.state = FallbackState::Starting,
                Err(err) => {
                    error!(error = %err, "Failed to restart service during redeployment");
                    cycle.restart_error = Some(err);
                }
            }
        },
    ));

    let result = drive_cycle(controller, &cycle);
    controller.remove_lifecycle_listener(listener_id);
    result?;

    let elapsed = started.elapsed();
    info!(
        elapsed_ms = elapsed.as_millis() as u64,
        "Redeployment complete in {} ms",
        elapsed.as_millis()
    );
    Ok(elapsed)
}

fn drive_cycle(controller: &dyn ServiceController, cycle: &Mutex<Cycle>) -> Result<(), FallbackError> {
    cycle.lock().state = FallbackState::Stopping;
    controller.set_mode(ServiceMode::Never).map_err(fallback_error)?;
    controller.await_stability().map_err(fallback_error)?;
    let mut cycle = cycle.lock();
    if let Some(err) = cycle.restart_error.take() {
        return Err(err.into());
    }
    match cycle.state {
        FallbackState::Starting => {
            cycle.state = FallbackState::Running;
            Ok(())
        }
        state => {
            error!(state = %state, "Service never reported stopping");
            Err(FallbackError::NeverStopped)
        }
    }
}

fn fallback_error(err: ServiceError) -> FallbackError {
    match err {
        ServiceError::Interrupted => FallbackError::Interrupted,
        other => FallbackError::Service(other),
    }
}
