//! Configuration: per-deployment properties and process-wide TOML settings.

mod properties;
mod settings;

use std::path::PathBuf;

use thiserror::Error;

use crate::app_dirs;
use crate::patch::PatchError;

pub use properties::{
    CLASSES_DIR_KEY, ClassChangeConfig, PROPERTIES_LOCATIONS, Properties, REMOTE_PASSWORD_KEY,
    SOURCES_DIR_KEY, WEB_RESOURCES_DIR_KEY, load_for_deployment,
};
pub use settings::{
    CompilerSettings, SETTINGS_FILE_NAME, Settings, load_from, load_or_default, save_to_path,
    settings_path,
};

/// Errors that may occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No usable config directory found.
    #[error("No suitable config directory found")]
    NoConfigDir,
    #[error("Unable to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid settings at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize settings to TOML at {path}: {source}")]
    SerializeToml {
        path: PathBuf,
        source: toml::ser::Error,
    },
    #[error("Invalid properties at {location}: {message}")]
    InvalidProperties { location: String, message: String },
    /// The deployment could not be read while looking for properties.
    #[error(transparent)]
    Resource(#[from] PatchError),
}

fn map_app_dir_error(error: app_dirs::AppDirError) -> ConfigError {
    match error {
        app_dirs::AppDirError::NoBaseDir => ConfigError::NoConfigDir,
        app_dirs::AppDirError::CreateDir { path, source } => {
            ConfigError::CreateDir { path, source }
        }
    }
}
