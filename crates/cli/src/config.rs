//! Server configuration: `labseq.toml`, `LABSEQ_*` environment variables,
//! and command-line flags.
//!
//! Precedence is flag > environment > file > default.

use std::path::{Path, PathBuf};

use labseq_core::{DeviceTypeResolver, DEFAULT_SEPARATOR, KNOWN_DEVICE_TYPES};
use labseq_storage::LabData;
use serde::Deserialize;

/// Port used when no flag, environment variable, or file sets one.
pub(crate) const DEFAULT_PORT: u16 = 8080;

pub(crate) const PORT_ENV: &str = "LABSEQ_PORT";
pub(crate) const DATA_ENV: &str = "LABSEQ_DATA";

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    #[error("error reading '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("error parsing '{}': {source}", path.display())]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("error parsing JSON in '{}': {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid value for {var}: '{value}'")]
    Env { var: &'static str, value: String },
}

/// Contents of a `labseq.toml` file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileConfig {
    pub(crate) port: Option<u16>,
    /// Lab-data seed file, relative to the working directory.
    pub(crate) data: Option<PathBuf>,
    /// Replaces the built-in prefix list; order matters.
    pub(crate) device_type_prefixes: Option<Vec<String>>,
    pub(crate) separator: Option<char>,
}

impl FileConfig {
    pub(crate) fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub(crate) fn resolver(&self) -> DeviceTypeResolver {
        let prefixes = self
            .device_type_prefixes
            .clone()
            .unwrap_or_else(|| KNOWN_DEVICE_TYPES.iter().map(|p| p.to_string()).collect());
        DeviceTypeResolver::new(self.separator.unwrap_or(DEFAULT_SEPARATOR), prefixes)
    }
}

/// Values that can come from flags or from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Overrides {
    pub(crate) port: Option<u16>,
    pub(crate) data: Option<PathBuf>,
}

impl Overrides {
    pub(crate) fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read `LABSEQ_PORT` / `LABSEQ_DATA` through `lookup`. Empty values
    /// count as unset.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = match lookup(PORT_ENV).filter(|v| !v.trim().is_empty()) {
            Some(value) => Some(value.trim().parse().map_err(|_| ConfigError::Env {
                var: PORT_ENV,
                value,
            })?),
            None => None,
        };
        let data = lookup(DATA_ENV)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        Ok(Overrides { port, data })
    }
}

/// Effective settings for `labseq serve`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServeSettings {
    pub(crate) port: u16,
    pub(crate) data: Option<PathBuf>,
    pub(crate) resolver: DeviceTypeResolver,
}

impl ServeSettings {
    pub(crate) fn merge(file: &FileConfig, env: Overrides, flags: Overrides) -> Self {
        ServeSettings {
            port: flags
                .port
                .or(env.port)
                .or(file.port)
                .unwrap_or(DEFAULT_PORT),
            data: flags.data.or(env.data).or_else(|| file.data.clone()),
            resolver: file.resolver(),
        }
    }
}

/// Read a lab-data seed file.
pub(crate) fn load_lab_data(path: &Path) -> Result<LabData, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}
