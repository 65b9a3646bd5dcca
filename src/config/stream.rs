// ABOUTME: Streaming endpoint configuration.
// ABOUTME: Address attach URLs are built on and the attach token lifetime.

use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_STREAM_ADDRESS: &str = "127.0.0.1:10010";

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_token_ttl", with = "humantime_serde")]
    pub token_ttl: Duration,
}

fn default_address() -> String {
    DEFAULT_STREAM_ADDRESS.to_string()
}

fn default_token_ttl() -> Duration {
    Duration::from_secs(60)
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            address: default_address(),
            token_ttl: default_token_ttl(),
        }
    }
}
