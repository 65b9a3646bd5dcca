// ABOUTME: Validated container names and the orchestrator naming convention.
// ABOUTME: Names are the keys of the name index, so they must be stable and unambiguous.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Prefix shared by every name built from orchestrator metadata.
const NAME_PREFIX: &str = "k8s";

/// Separator between the components of a generated name.
const NAME_DELIMITER: char = '_';

const MAX_NAME_LEN: usize = 253;

#[derive(Debug, Error)]
pub enum ContainerNameError {
    #[error("container name cannot be empty")]
    Empty,

    #[error("container name exceeds maximum length of {MAX_NAME_LEN} characters")]
    TooLong,

    #[error("invalid character in container name: '{0}'")]
    InvalidChar(char),
}

/// Orchestrator metadata identifying a container inside its sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContainerMetadata {
    pub name: String,
    #[serde(default)]
    pub attempt: u32,
}

/// Orchestrator metadata identifying a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SandboxMetadata {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerName(String);

impl ContainerName {
    pub fn new(value: &str) -> Result<Self, ContainerNameError> {
        if value.is_empty() {
            return Err(ContainerNameError::Empty);
        }

        if value.len() > MAX_NAME_LEN {
            return Err(ContainerNameError::TooLong);
        }

        for c in value.chars() {
            if c.is_whitespace() || c.is_control() || c == '/' {
                return Err(ContainerNameError::InvalidChar(c));
            }
        }

        Ok(Self(value.to_string()))
    }

    /// Build the unique name for a container from its own and its sandbox's
    /// metadata: `k8s_<container>_<sandbox>_<namespace>_<uid>_<attempt>`.
    pub fn from_metadata(
        container: &ContainerMetadata,
        sandbox: &SandboxMetadata,
    ) -> Result<Self, ContainerNameError> {
        let attempt = container.attempt.to_string();
        let parts = [
            NAME_PREFIX,
            container.name.as_str(),
            sandbox.name.as_str(),
            sandbox.namespace.as_str(),
            sandbox.uid.as_str(),
            attempt.as_str(),
        ];
        if container.name.is_empty() {
            return Err(ContainerNameError::Empty);
        }
        Self::new(&parts.join(&NAME_DELIMITER.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ContainerName {
    type Error = ContainerNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<ContainerName> for String {
    fn from(name: ContainerName) -> Self {
        name.0
    }
}
