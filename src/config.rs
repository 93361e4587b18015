use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, Result};
use crate::Device;

/// File read when no config path is given.
pub const DEFAULT_CONFIG_FILE: &str = "voicecast.toml";

/// Settings shared by the CLI and library consumers.
///
/// ```toml
/// device = "cuda"
///
/// [runtimes]
/// multilingual = "/opt/voicecast/bin/voicecast-xtts"
/// expressive = "voicecast-expressive"
///
/// [output]
/// dir = "renders"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub runtimes: RuntimeConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Compute device; auto-detected when unset.
    #[serde(default)]
    pub device: Option<Device>,
}

/// Inference runtime programs, looked up on `PATH` unless absolute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_multilingual_runtime")]
    pub multilingual: PathBuf,
    #[serde(default = "default_expressive_runtime")]
    pub expressive: PathBuf,
}

/// Where generated audio goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for generated files that were not given an explicit path.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

fn default_multilingual_runtime() -> PathBuf {
    PathBuf::from("voicecast-xtts")
}

fn default_expressive_runtime() -> PathBuf {
    PathBuf::from("voicecast-expressive")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            multilingual: default_multilingual_runtime(),
            expressive: default_expressive_runtime(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

impl Config {
    /// Load the config.
    ///
    /// An explicit `path` must exist and parse. Without one,
    /// [`DEFAULT_CONFIG_FILE`] is read if present and defaults are used otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Parse `path`. A missing or malformed file is [`ConfigurationError::InvalidConfig`].
    pub fn from_file(path: &Path) -> Result<Self> {
        let invalid = |message: String| ConfigurationError::InvalidConfig {
            path: path.to_path_buf(),
            message,
        };

        let content = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let config: Config = toml::from_str(&content).map_err(|e| invalid(e.to_string()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Configured device, or the detected one.
    pub fn device(&self) -> Device {
        self.device.unwrap_or_else(Device::detect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voicecast.toml");
        std::fs::write(&path, "device = \"cpu\"\n[output]\ndir = \"renders\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.device, Some(Device::Cpu));
        assert_eq!(config.device(), Device::Cpu);
        assert_eq!(config.output.dir, PathBuf::from("renders"));
        assert_eq!(config.runtimes, RuntimeConfig::default());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/voicecast.toml"))).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Configuration(ConfigurationError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "device = \"tpu\"").unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
