// ABOUTME: Streaming endpoint provider handing out attach URLs.
// ABOUTME: Tokens are single use and expire after a configured lifetime.

use crate::server::AttachRequest;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("unknown stream token {0:?}")]
    UnknownToken(String),

    #[error("stream token {0:?} expired")]
    Expired(String),
}

/// Endpoint address returned for an attach request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachResponse {
    pub url: String,
}

/// Allocates streaming endpoints for interactive requests.
pub trait StreamServer: Send + Sync {
    fn get_attach(&self, request: &AttachRequest) -> Result<AttachResponse, StreamError>;
}

struct PendingAttach {
    request: AttachRequest,
    expires_at: Instant,
}

/// Stream server that caches each request under a random token and serves
/// it back once through [`consume`](TokenStreamServer::consume).
pub struct TokenStreamServer {
    address: String,
    ttl: Duration,
    pending: Mutex<HashMap<String, PendingAttach>>,
}

impl TokenStreamServer {
    pub fn new(address: impl Into<String>, ttl: Duration) -> Self {
        Self {
            address: address.into(),
            ttl,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Take the request cached under `token`.
    pub fn consume(&self, token: &str) -> Result<AttachRequest, StreamError> {
        let pending = self
            .pending
            .lock()
            .remove(token)
            .ok_or_else(|| StreamError::UnknownToken(token.to_string()))?;
        if pending.expires_at <= Instant::now() {
            return Err(StreamError::Expired(token.to_string()));
        }
        Ok(pending.request)
    }

    /// Number of tokens not yet consumed or expired.
    pub fn pending(&self) -> usize {
        let now = Instant::now();
        let mut pending = self.pending.lock();
        pending.retain(|_, p| p.expires_at > now);
        pending.len()
    }
}

impl StreamServer for TokenStreamServer {
    fn get_attach(&self, request: &AttachRequest) -> Result<AttachResponse, StreamError> {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let now = Instant::now();
        {
            let mut pending = self.pending.lock();
            pending.retain(|_, p| p.expires_at > now);
            pending.insert(
                token.clone(),
                PendingAttach {
                    request: request.clone(),
                    expires_at: now + self.ttl,
                },
            );
        }
        Ok(AttachResponse {
            url: format!(
                "http://{}/attach/{}",
                self.address,
                urlencoding::encode(&token)
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContainerId;

    fn request() -> AttachRequest {
        AttachRequest {
            container_id: ContainerId::new("c1"),
            stdin: true,
            stdout: true,
            stderr: false,
            tty: false,
        }
    }

    fn token_of(url: &str) -> String {
        let encoded = url.rsplit('/').next().unwrap();
        urlencoding::decode(encoded).unwrap().into_owned()
    }

    #[test]
    fn tokens_are_single_use() {
        let server = TokenStreamServer::new("127.0.0.1:10010", Duration::from_secs(60));
        let response = server.get_attach(&request()).unwrap();
        assert!(response.url.starts_with("http://127.0.0.1:10010/attach/"));

        let token = token_of(&response.url);
        assert_eq!(server.consume(&token).unwrap(), request());
        assert!(matches!(
            server.consume(&token),
            Err(StreamError::UnknownToken(_))
        ));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let server = TokenStreamServer::new("127.0.0.1:10010", Duration::ZERO);
        let token = token_of(&server.get_attach(&request()).unwrap().url);
        assert!(matches!(server.consume(&token), Err(StreamError::Expired(_))));
        assert_eq!(server.pending(), 0);
    }
}
