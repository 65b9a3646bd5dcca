// ABOUTME: End-to-end tests running real host processes through the service.
// ABOUTME: Grouped under `process`; they need /bin/sh and a /proc filesystem.

mod support;

use crishim::io::{LogStream, parse_log};
use crishim::runtime::{
    ContainerSpec, EngineOps, ProcessEngine, ProcessEngineConfig, TaskDeleteOpts, TaskIo,
    TaskStatus,
};
use crishim::server::{AttachStreams, EventMonitor, RuntimeService, ServiceConfig};
use crishim::store::{ContainerState, REASON_START_ERROR, SandboxConfig};
use crishim::stream::TokenStreamServer;
use crishim::types::{ContainerId, SandboxId, SandboxMetadata};
use std::sync::Arc;
use std::time::Duration;
use support::container_config;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

struct Host {
    service: RuntimeService,
    monitor: Option<EventMonitor>,
    log_dir: TempDir,
    _root_dir: TempDir,
    _state_dir: TempDir,
}

impl Host {
    async fn new() -> (Self, SandboxId) {
        support::init_tracing();
        let root_dir = tempfile::tempdir().unwrap();
        let state_dir = tempfile::tempdir().unwrap();
        let log_dir = tempfile::tempdir().unwrap();
        let engine = ProcessEngine::new(ProcessEngineConfig {
            kill_grace: Duration::from_secs(2),
        });
        let service = RuntimeService::new(
            ServiceConfig {
                root_dir: root_dir.path().to_path_buf(),
                state_dir: state_dir.path().to_path_buf(),
            },
            Arc::new(engine),
            Arc::new(TokenStreamServer::new(
                support::STREAM_ADDRESS,
                Duration::from_secs(60),
            )),
        );
        let monitor = EventMonitor::start(service.clone());
        let sandbox = service
            .run_sandbox(SandboxConfig {
                metadata: SandboxMetadata {
                    name: "host".to_string(),
                    namespace: "default".to_string(),
                    uid: uuid::Uuid::new_v4().to_string(),
                    attempt: 0,
                },
                log_directory: Some(log_dir.path().to_path_buf()),
                ..Default::default()
            })
            .await
            .unwrap();
        let host = Self {
            service,
            monitor: Some(monitor),
            log_dir,
            _root_dir: root_dir,
            _state_dir: state_dir,
        };
        (host, sandbox)
    }

    async fn run(&self, sandbox: &SandboxId, name: &str, script: &str) -> ContainerId {
        let mut config = container_config(name);
        config.command = vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()];
        let id = self
            .service
            .create_container(sandbox, config)
            .await
            .unwrap();
        self.service.start_container(&id).await.unwrap();
        id
    }

    async fn wait_exited(&self, id: &ContainerId) {
        let service = &self.service;
        support::wait_until(|| {
            service.container_status(id).unwrap().state == ContainerState::Exited
        })
        .await;
    }

    async fn stop(mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.stop().await;
        }
    }
}

#[test_group::group(process)]
#[tokio::test]
async fn exit_code_and_output_are_recorded() {
    let (host, sandbox) = Host::new().await;

    let id = host
        .run(&sandbox, "script", "echo out; echo err >&2; exit 3")
        .await;
    host.wait_exited(&id).await;

    let view = host.service.container_status(&id).unwrap();
    assert_eq!(view.exit_code, 3);
    assert_eq!(view.reason, "Error");

    let log = support::read_log(&host.log_dir.path().join("script.log"), 2).await;
    let lines = parse_log(&log).unwrap();
    assert!(
        lines
            .iter()
            .any(|l| l.stream == LogStream::Stdout && l.content == "out")
    );
    assert!(
        lines
            .iter()
            .any(|l| l.stream == LogStream::Stderr && l.content == "err")
    );

    host.service.remove_container(&id).await.unwrap();
    host.stop().await;
}

#[test_group::group(process)]
#[tokio::test]
async fn stopped_task_is_deleted_with_its_exit_code() {
    support::init_tracing();
    let engine = ProcessEngine::new(ProcessEngineConfig {
        kill_grace: Duration::from_secs(1),
    });
    let container = engine
        .create_container(&ContainerSpec {
            id: "c1".to_string(),
            command: vec!["/bin/sh".to_string(), "-c".to_string(), "exit 3".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    let task = container
        .new_task(TaskIo {
            stdin: None,
            stdout: Box::new(tokio::io::sink()),
            stderr: Box::new(tokio::io::sink()),
            terminal: false,
        })
        .await
        .unwrap();
    task.start().await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while task.status().await.unwrap() != TaskStatus::Stopped {
        assert!(tokio::time::Instant::now() < deadline, "task never stopped");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let exit = task.delete(TaskDeleteOpts::default()).await.unwrap();
    assert_eq!(exit.code, 3);
}

#[test_group::group(process)]
#[tokio::test]
async fn missing_binary_fails_start() {
    let (host, sandbox) = Host::new().await;
    let mut config = container_config("ghost");
    config.command = vec!["/nonexistent/binary".to_string()];
    let id = host
        .service
        .create_container(&sandbox, config)
        .await
        .unwrap();

    host.service.start_container(&id).await.unwrap_err();

    let view = host.service.container_status(&id).unwrap();
    assert_eq!(view.state, ContainerState::Exited);
    assert_eq!(view.reason, REASON_START_ERROR);
    host.stop().await;
}

#[test_group::group(process)]
#[tokio::test]
async fn attach_round_trips_through_cat() {
    let (host, sandbox) = Host::new().await;
    let mut config = container_config("cat");
    config.command = vec!["cat".to_string()];
    config.stdin = true;
    config.stdin_once = true;
    let id = host
        .service
        .create_container(&sandbox, config)
        .await
        .unwrap();
    host.service.start_container(&id).await.unwrap();

    let (mut client_in, shim_in) = tokio::io::duplex(1024);
    let (shim_out, mut client_out) = tokio::io::duplex(1024);
    let service = host.service.clone();
    let attach_id = id.clone();
    let session = tokio::spawn(async move {
        service
            .attach_container(
                &attach_id,
                AttachStreams {
                    stdin: Some(Box::new(shim_in)),
                    stdout: Some(Box::new(shim_out)),
                    ..Default::default()
                },
            )
            .await
    });

    client_in.write_all(b"hello\n").await.unwrap();
    let mut echoed = [0u8; 6];
    client_out.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"hello\n");

    // Closing stdin ends cat, which ends the session.
    drop(client_in);
    session.await.unwrap().unwrap();
    host.wait_exited(&id).await;
    assert_eq!(host.service.container_status(&id).unwrap().exit_code, 0);
    host.stop().await;
}

#[test_group::group(process)]
#[tokio::test]
async fn stats_read_from_proc() {
    let (host, sandbox) = Host::new().await;
    let id = host.run(&sandbox, "sleeper", "sleep 5").await;

    let stats = host.service.container_stats(&id).await.unwrap();

    assert!(stats.memory.unwrap().working_set_bytes > 0);
    assert!(stats.cpu.is_some());
    host.stop().await;
}
