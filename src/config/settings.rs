use std::{
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::app_dirs;

use super::ConfigError;

/// Default filename used to store the process settings.
pub const SETTINGS_FILE_NAME: &str = "class-change.toml";

/// Process-wide settings loaded from TOML.
///
/// Config keys: `temp_dir`, `scan_interval_ms`, `stability_timeout_ms`,
/// `compiler.program`, `compiler.args`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Server temp dir holding archive replacement stores.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    #[serde(default = "default_stability_timeout_ms")]
    pub stability_timeout_ms: u64,
    #[serde(default)]
    pub compiler: CompilerSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerSettings {
    #[serde(default = "default_compiler_program")]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            temp_dir: None,
            scan_interval_ms: default_scan_interval_ms(),
            stability_timeout_ms: default_stability_timeout_ms(),
            compiler: CompilerSettings::default(),
        }
    }
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            program: default_compiler_program(),
            args: Vec::new(),
        }
    }
}

impl Settings {
    /// Configured temp dir, or the OS temp dir.
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms.max(1))
    }

    pub fn stability_timeout(&self) -> Duration {
        Duration::from_millis(self.stability_timeout_ms)
    }
}

fn default_scan_interval_ms() -> u64 {
    2_000
}

fn default_stability_timeout_ms() -> u64 {
    60_000
}

fn default_compiler_program() -> String {
    "javac".to_string()
}

/// Resolve the settings file path, ensuring the parent directory exists.
pub fn settings_path() -> Result<PathBuf, ConfigError> {
    let dir = app_dirs::app_root_dir().map_err(super::map_app_dir_error)?;
    Ok(dir.join(SETTINGS_FILE_NAME))
}

/// Load settings from the application directory, returning defaults if missing.
pub fn load_or_default() -> Result<Settings, ConfigError> {
    load_from(&settings_path()?)
}

pub fn load_from(path: &Path) -> Result<Settings, ConfigError> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })
}

/// Write settings atomically so a crash never leaves a partial file.
pub fn save_to_path(settings: &Settings, path: &Path) -> Result<(), ConfigError> {
    let data = toml::to_string_pretty(settings).map_err(|source| ConfigError::SerializeToml {
        path: path.to_path_buf(),
        source,
    })?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|source| ConfigError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    temp.write_all(data.as_bytes()).map_err(write_err)?;
    temp.as_file().sync_all().map_err(write_err)?;
    temp.persist(path).map_err(|err| write_err(err.error))?;
    Ok(())
}
