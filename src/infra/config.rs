use crate::domain::DEFAULT_PREVIEW_CHARS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ResolveStateDirError {
    #[error("home directory not found")]
    HomeDirNotFound,
}

pub fn resolve_state_dir() -> Result<PathBuf, ResolveStateDirError> {
    if let Some(override_dir) = std::env::var_os("PROMPTLOG_HOME") {
        return Ok(PathBuf::from(override_dir));
    }

    let Some(home) = dirs::home_dir() else {
        return Err(ResolveStateDirError::HomeDirNotFound);
    };
    Ok(home.join(".promptlog"))
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    pub preview_chars: usize,
    /// `tracing` filter directive used when `PROMPTLOG_LOG` is unset.
    pub log_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preview_chars: DEFAULT_PREVIEW_CHARS,
            log_filter: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] io::Error),

    #[error(
        "failed to parse config: {0}\nHint: run `promptlog config --preview-chars N` to rewrite it, or delete the file."
    )]
    Parse(#[from] serde_json::Error),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Error)]
pub enum SaveConfigError {
    #[error("failed to encode config: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write config: {0}")]
    Write(#[from] io::Error),
}

pub fn config_path(state_dir: &Path) -> PathBuf {
    state_dir.join("config.json")
}

pub fn load_config(state_dir: &Path) -> Result<Config, LoadConfigError> {
    let path = config_path(state_dir);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            return Ok(Config::default());
        }
        Err(error) => return Err(error.into()),
    };

    let file: ConfigFile = serde_json::from_str(&raw)?;
    if file.version > CONFIG_VERSION {
        return Err(LoadConfigError::UnsupportedVersion(file.version));
    }

    let defaults = Config::default();
    Ok(Config {
        preview_chars: file
            .preview_chars
            .filter(|chars| *chars > 0)
            .unwrap_or(defaults.preview_chars),
        log_filter: file
            .log_filter
            .map(|filter| filter.trim().to_string())
            .filter(|filter| !filter.is_empty()),
    })
}

/// Loads the config, falling back to defaults when the file cannot be used. The error is
/// handed back so the caller can still report it.
pub fn load_config_or_default(state_dir: &Path) -> (Config, Option<LoadConfigError>) {
    match load_config(state_dir) {
        Ok(config) => (config, None),
        Err(error) => (Config::default(), Some(error)),
    }
}

pub fn save_config(state_dir: &Path, config: &Config) -> Result<(), SaveConfigError> {
    fs::create_dir_all(state_dir)?;

    let path = config_path(state_dir);
    let tmp = path.with_extension("json.tmp");
    let file = ConfigFile {
        version: CONFIG_VERSION,
        preview_chars: Some(config.preview_chars),
        log_filter: config.log_filter.clone(),
    };
    let text = serde_json::to_string_pretty(&file)?;
    fs::write(&tmp, text)?;
    fs::rename(tmp, path)?;
    Ok(())
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    preview_chars: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    log_filter: Option<String>,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}
