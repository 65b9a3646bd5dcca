// ABOUTME: Process engine configuration.
// ABOUTME: Grace period between SIGTERM and SIGKILL on forced task deletion.

use serde::Deserialize;
use std::time::Duration;

use crate::runtime::ProcessEngineConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_kill_grace", with = "humantime_serde")]
    pub kill_grace: Duration,
}

fn default_kill_grace() -> Duration {
    Duration::from_secs(10)
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            kill_grace: default_kill_grace(),
        }
    }
}

impl From<&EngineConfig> for ProcessEngineConfig {
    fn from(config: &EngineConfig) -> Self {
        ProcessEngineConfig {
            kill_grace: config.kill_grace,
        }
    }
}
