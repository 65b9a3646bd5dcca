// ABOUTME: Configuration types and parsing for crishim.yml.
// ABOUTME: Handles YAML parsing, file discovery, and environment overrides.

mod engine;
mod init;
mod stream;

pub use engine::EngineConfig;
pub use init::init_config;
pub use stream::{DEFAULT_STREAM_ADDRESS, StreamConfig};

use crate::error::{Error, Result};
use crate::server::ServiceConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "crishim.yml";
pub const CONFIG_FILENAME_ALT: &str = "crishim.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".crishim/config.yml";

pub const ENV_ROOT_DIR: &str = "CRISHIM_ROOT_DIR";
pub const ENV_STATE_DIR: &str = "CRISHIM_STATE_DIR";
pub const ENV_STREAM_ADDRESS: &str = "CRISHIM_STREAM_ADDRESS";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Parent of the per-container root directories.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Parent of the per-container checkpoints.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("/var/lib/crishim")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/run/crishim")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self::template()
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Find the config file in `dir`, falling back to defaults when none exists.
    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading config");
                return Self::load(path);
            }
        }

        Ok(Self::template())
    }

    /// Discover the config and apply `CRISHIM_*` environment overrides.
    pub fn resolve(dir: &Path) -> Result<Self> {
        let mut config = Self::discover(dir)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(root) = env_override(ENV_ROOT_DIR) {
            self.root_dir = PathBuf::from(root);
        }
        if let Some(state) = env_override(ENV_STATE_DIR) {
            self.state_dir = PathBuf::from(state);
        }
        if let Some(address) = env_override(ENV_STREAM_ADDRESS) {
            self.stream.address = address;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.stream.address.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "stream.address cannot be empty".to_string(),
            ));
        }
        if self.stream.token_ttl.is_zero() {
            return Err(Error::InvalidConfig(
                "stream.token_ttl must be greater than zero".to_string(),
            ));
        }
        if self.root_dir == self.state_dir {
            return Err(Error::InvalidConfig(
                "root_dir and state_dir must differ".to_string(),
            ));
        }
        Ok(())
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            root_dir: self.root_dir.clone(),
            state_dir: self.state_dir.clone(),
        }
    }

    pub fn template() -> Self {
        Config {
            root_dir: default_root_dir(),
            state_dir: default_state_dir(),
            log_level: default_log_level(),
            stream: StreamConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
