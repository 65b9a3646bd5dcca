// ABOUTME: Test support utilities.
// ABOUTME: Builds a runtime service over the mock engine in temporary directories.

use crishim::runtime::MockEngine;
use crishim::server::{ContainerConfig, RuntimeService, ServiceConfig};
use crishim::store::{ContainerState, SandboxConfig, Status};
use crishim::stream::TokenStreamServer;
use crishim::types::{ContainerId, ContainerMetadata, SandboxId, SandboxMetadata};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("crishim=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const STREAM_ADDRESS: &str = "127.0.0.1:10010";

/// Runtime service over a mock engine, with its directories.
#[allow(dead_code)]
pub struct Fixture {
    pub engine: MockEngine,
    pub streams: Arc<TokenStreamServer>,
    pub service: RuntimeService,
    pub root_dir: TempDir,
    pub state_dir: TempDir,
    pub log_dir: TempDir,
}

#[allow(dead_code)]
impl Fixture {
    pub fn new() -> Self {
        init_tracing();
        let engine = MockEngine::new();
        let root_dir = tempfile::tempdir().unwrap();
        let state_dir = tempfile::tempdir().unwrap();
        let log_dir = tempfile::tempdir().unwrap();
        let streams = Arc::new(TokenStreamServer::new(
            STREAM_ADDRESS,
            Duration::from_secs(60),
        ));
        let service = RuntimeService::new(
            ServiceConfig {
                root_dir: root_dir.path().to_path_buf(),
                state_dir: state_dir.path().to_path_buf(),
            },
            Arc::new(engine.clone()),
            streams.clone(),
        );
        Self {
            engine,
            streams,
            service,
            root_dir,
            state_dir,
            log_dir,
        }
    }

    /// A fresh service over the same directories, as after a restart.
    pub fn restart(&self, engine: MockEngine) -> RuntimeService {
        RuntimeService::new(
            self.service.config().clone(),
            Arc::new(engine),
            self.streams.clone(),
        )
    }

    pub async fn sandbox(&self) -> SandboxId {
        self.service
            .run_sandbox(SandboxConfig {
                metadata: SandboxMetadata {
                    name: "pod".to_string(),
                    namespace: "default".to_string(),
                    uid: uuid::Uuid::new_v4().to_string(),
                    attempt: 0,
                },
                log_directory: Some(self.log_dir.path().to_path_buf()),
                labels: HashMap::new(),
            })
            .await
            .unwrap()
    }

    pub async fn create(&self, sandbox: &SandboxId, name: &str) -> ContainerId {
        self.service
            .create_container(sandbox, container_config(name))
            .await
            .unwrap()
    }

    /// Sandbox plus one container in it.
    pub async fn created(&self, name: &str) -> (SandboxId, ContainerId) {
        let sandbox = self.sandbox().await;
        let id = self.create(&sandbox, name).await;
        (sandbox, id)
    }

    pub fn status(&self, id: &ContainerId) -> Status {
        self.service.containers().get(id).unwrap().status.get()
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.log_dir.path().join(format!("{name}.log"))
    }

    pub async fn wait_for_state(&self, id: &ContainerId, state: ContainerState) {
        let service = &self.service;
        wait_until(|| service.containers().get(id).unwrap().status.get().state() == state).await;
    }
}

#[allow(dead_code)]
pub fn container_config(name: &str) -> ContainerConfig {
    ContainerConfig {
        metadata: ContainerMetadata {
            name: name.to_string(),
            attempt: 0,
        },
        image: "busybox".to_string(),
        command: vec!["sh".to_string()],
        log_path: Some(PathBuf::from(format!("{name}.log"))),
        ..Default::default()
    }
}

/// Poll `cond` until it holds. Panics after five seconds.
#[allow(dead_code)]
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Read a log file once it holds `lines` entries.
#[allow(dead_code)]
pub async fn read_log(path: &std::path::Path, lines: usize) -> String {
    wait_until(|| {
        std::fs::read_to_string(path)
            .map(|contents| contents.lines().count() >= lines)
            .unwrap_or(false)
    })
    .await;
    std::fs::read_to_string(path).unwrap()
}
