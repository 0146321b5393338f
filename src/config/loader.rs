//! Configuration file discovery and loading.

use std::path::{Path, PathBuf};

use super::SupervisorConfig;

/// Environment variable naming a config file to use before any other location.
pub const CONFIG_ENV_VAR: &str = "CMD_SUPERVISOR_CONFIG";

/// File name looked up in the working directory.
const LOCAL_CONFIG_FILE: &str = ".cmd-supervisor.toml";

/// Finds and parses the supervisor configuration.
///
/// Candidates are tried in order and the first existing file wins:
/// `$CMD_SUPERVISOR_CONFIG`, `./.cmd-supervisor.toml`, then
/// `<config dir>/cmd-supervisor/config.toml`. Without any file the
/// defaults apply.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    candidates: Vec<PathBuf>,
}

impl ConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        let env_path = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
        let user_path = dirs::config_dir().map(|dir| dir.join("cmd-supervisor").join("config.toml"));

        let candidates = env_path
            .into_iter()
            .chain(std::iter::once(PathBuf::from(LOCAL_CONFIG_FILE)))
            .chain(user_path)
            .collect();
        Self { candidates }
    }

    /// Only consult `path`.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            candidates: vec![path],
        }
    }

    #[must_use]
    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// First candidate that exists on disk.
    #[must_use]
    pub fn locate(&self) -> Option<&Path> {
        self.candidates
            .iter()
            .map(PathBuf::as_path)
            .find(|path| path.is_file())
    }

    /// Load the first config file found, or the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, is not valid TOML
    /// for [`SupervisorConfig`], or holds values the supervisor cannot use.
    pub fn load(&self) -> Result<SupervisorConfig, ConfigError> {
        let Some(path) = self.locate() else {
            tracing::debug!("No config file found, using defaults");
            return Ok(SupervisorConfig::default());
        };

        tracing::debug!(path = %path.display(), "Loading config file");
        let config = parse_file(path)?;
        validate(&config).map_err(|reason| ConfigError::Invalid {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_file(path: &Path) -> Result<SupervisorConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn validate(config: &SupervisorConfig) -> Result<(), String> {
    if config.shell.trim().is_empty() {
        return Err("shell must not be empty".to_string());
    }
    if config.tick_interval_ms == 0 || config.slow_tick_interval_ms == 0 {
        return Err("tick intervals must be at least 1 ms".to_string());
    }
    if config.event_capacity == 0 {
        return Err("event_capacity must be at least 1".to_string());
    }
    Ok(())
}

/// Errors raised while loading a config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid config file {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}
