//! Hot class-change orchestration for application server deployments.
//!
//! A deployment's external source, class and web-resource directories are
//! scanned against the timestamps last installed. Changed sources are
//! compiled, manually compiled classes take precedence when they are not
//! older than their source, and the result is persisted to the deployment
//! (in place for exploded directories, in a replacement store for archives).
//! Changed classes are then handed to a redefinition agent as one batch; if
//! the agent refuses, the owning service is redeployed instead.

/// Application directory helpers.
pub mod app_dirs;
/// Class-file header indexing.
pub mod classfile;
/// External compiler invocation.
pub mod compile;
/// Per-deployment properties and process settings.
pub mod config;
/// Per-deployment orchestrator, listeners and lifecycle bridge.
pub mod deployment;
/// Stop/start fallback when redefinition is refused.
pub mod fallback;
/// Last-observed modification times.
pub mod known;
/// Class loader abstraction.
pub mod loader;
/// Logging setup for the binary.
pub mod logging;
/// Persisting accepted changes to archive or exploded deployments.
pub mod patch;
/// Precedence and modified/added classification.
pub mod reconcile;
/// Redefinition agent seam and coordinator.
pub mod redefine;
/// Differential scanning of external trees.
pub mod scanner;

pub use deployment::{
    ClassChangeError, ClassChangeListener, ClassChangeRegistry, DeploymentClassChangeSupport,
    DeploymentUnit, ScanOutcome,
};
