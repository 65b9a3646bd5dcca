// ABOUTME: In-memory task engine for tests.
// ABOUTME: Records calls, injects failures and delays, and scripts task output and exits.

use super::traits::sealed::Sealed;
use super::traits::{
    CloseIoOpts, ContainerOps, ContainerSpec, DeleteOpts, EngineOps, ExitStatus, IoReader,
    IoWriter, MetricsFilter, TaskDeleteOpts, TaskEvent, TaskExit, TaskIo, TaskMetrics, TaskOps,
    TaskStatus,
};
use super::RuntimeError;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Notify, broadcast};

/// Engine operations that can be counted, failed or delayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    CreateContainer,
    DeleteContainer,
    NewTask,
    StartTask,
    TaskStatus,
    DeleteTask,
    Resize,
    CloseIo,
    Metrics,
}

#[derive(Default)]
struct MockState {
    containers: HashMap<String, Arc<MockContainer>>,
    calls: HashMap<MockOp, usize>,
    failures: HashMap<MockOp, RuntimeError>,
    delays: HashMap<MockOp, Duration>,
    metrics: Option<Vec<TaskMetrics>>,
    outputs: HashMap<String, ScriptedOutput>,
    resizes: Vec<(String, u32, u32)>,
}

#[derive(Debug, Clone, Default)]
struct ScriptedOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    echo_stdin: bool,
}

struct Shared {
    state: Mutex<MockState>,
    events: broadcast::Sender<TaskEvent>,
    next_pid: AtomicU32,
}

impl Shared {
    /// Count the call, then apply any injected delay and failure.
    async fn enter(&self, op: MockOp) -> Result<(), RuntimeError> {
        let (delay, failure) = {
            let mut state = self.state.lock();
            *state.calls.entry(op).or_default() += 1;
            (state.delays.get(&op).copied(), state.failures.remove(&op))
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// In-memory engine used by the test suite.
#[derive(Clone)]
pub struct MockEngine {
    shared: Arc<Shared>,
}

impl Default for MockEngine {
    fn default() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MockState::default()),
                events,
                next_pid: AtomicU32::new(1000),
            }),
        }
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `op` was called.
    pub fn calls(&self, op: MockOp) -> usize {
        self.shared.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Make the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: MockOp, err: RuntimeError) {
        self.shared.state.lock().failures.insert(op, err);
    }

    /// Delay every call of `op`.
    pub fn delay(&self, op: MockOp, delay: Duration) {
        self.shared.state.lock().delays.insert(op, delay);
    }

    /// Replace the metrics returned by `metrics()`.
    pub fn set_metrics(&self, metrics: Vec<TaskMetrics>) {
        self.shared.state.lock().metrics = Some(metrics);
    }

    /// Output written by the container's task as soon as it starts.
    pub fn script_output(&self, id: &str, stdout: &[u8], stderr: &[u8]) {
        let mut state = self.shared.state.lock();
        let output = state.outputs.entry(id.to_string()).or_default();
        output.stdout = stdout.to_vec();
        output.stderr = stderr.to_vec();
    }

    /// Make the container's task copy everything it reads on stdin to stdout.
    pub fn echo_stdin(&self, id: &str) {
        let mut state = self.shared.state.lock();
        state.outputs.entry(id.to_string()).or_default().echo_stdin = true;
    }

    /// Resize calls seen so far, as `(container id, width, height)`.
    pub fn resizes(&self) -> Vec<(String, u32, u32)> {
        self.shared.state.lock().resizes.clone()
    }

    /// Whether the engine still knows the container.
    pub fn has_container(&self, id: &str) -> bool {
        self.shared.state.lock().containers.contains_key(id)
    }

    /// Whether the container currently has a task.
    pub fn has_task(&self, id: &str) -> bool {
        let container = self.shared.state.lock().containers.get(id).cloned();
        container.is_some_and(|c| c.task.lock().is_some())
    }

    /// Whether stdin was closed on the container's current task.
    pub fn stdin_closed(&self, id: &str) -> bool {
        let container = self.shared.state.lock().containers.get(id).cloned();
        container
            .and_then(|c| c.task.lock().clone())
            .is_some_and(|t| *t.stdin_closed.lock())
    }

    /// Publish an out-of-memory event for the container.
    pub fn oom(&self, id: &str) {
        let _ = self.shared.events.send(TaskEvent::Oom {
            container_id: id.to_string(),
        });
    }

    /// Make the container's task exit with `code`, closing its output and
    /// publishing an exit event.
    pub async fn exit(&self, id: &str, code: i32) -> Option<TaskExit> {
        let container = self.shared.state.lock().containers.get(id).cloned()?;
        let task = container.task.lock().clone()?;
        task.finish(code).await
    }
}

impl Sealed for MockEngine {}

#[async_trait]
impl EngineOps for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create_container(
        &self,
        spec: &ContainerSpec,
    ) -> Result<Arc<dyn ContainerOps>, RuntimeError> {
        self.shared.enter(MockOp::CreateContainer).await?;
        let mut state = self.shared.state.lock();
        if state.containers.contains_key(&spec.id) {
            return Err(RuntimeError::AlreadyExists(spec.id.clone()));
        }
        let container = Arc::new(MockContainer {
            id: spec.id.clone(),
            shared: Arc::clone(&self.shared),
            task: Mutex::new(None),
        });
        state
            .containers
            .insert(spec.id.clone(), Arc::clone(&container));
        Ok(container)
    }

    async fn load_container(&self, id: &str) -> Result<Arc<dyn ContainerOps>, RuntimeError> {
        let state = self.shared.state.lock();
        match state.containers.get(id) {
            Some(container) => Ok(Arc::clone(container) as Arc<dyn ContainerOps>),
            None => Err(RuntimeError::NotFound(format!("container {id}"))),
        }
    }

    async fn metrics(&self, filter: &MetricsFilter) -> Result<Vec<TaskMetrics>, RuntimeError> {
        self.shared.enter(MockOp::Metrics).await?;
        let state = self.shared.state.lock();
        if let Some(metrics) = &state.metrics {
            return Ok(metrics
                .iter()
                .filter(|m| filter.matches(&m.id))
                .cloned()
                .collect());
        }

        let mut metrics = Vec::new();
        for (id, container) in &state.containers {
            if !filter.matches(id) || container.task.lock().is_none() {
                continue;
            }
            metrics.push(TaskMetrics {
                id: id.clone(),
                timestamp: Utc::now(),
                data: serde_json::json!({
                    "cpu": { "usage": { "total": 1_000_000u64 } },
                    "memory": { "usage": { "usage": 4096u64 }, "total_inactive_file": 1024u64 }
                }),
            });
        }
        Ok(metrics)
    }

    fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.shared.events.subscribe()
    }
}

/// Container object of the mock engine.
pub struct MockContainer {
    id: String,
    shared: Arc<Shared>,
    task: Mutex<Option<Arc<MockTask>>>,
}

impl Sealed for MockContainer {}

#[async_trait]
impl ContainerOps for MockContainer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn new_task(&self, io: TaskIo) -> Result<Arc<dyn TaskOps>, RuntimeError> {
        self.shared.enter(MockOp::NewTask).await?;
        let mut slot = self.task.lock();
        if slot.is_some() {
            return Err(RuntimeError::AlreadyExists(format!("task {}", self.id)));
        }
        let task = Arc::new(MockTask {
            id: self.id.clone(),
            pid: self.shared.next_pid.fetch_add(1, Ordering::SeqCst),
            shared: Arc::clone(&self.shared),
            status: Mutex::new(TaskStatus::Created),
            stdout: Arc::new(tokio::sync::Mutex::new(Some(io.stdout))),
            stderr: Arc::new(tokio::sync::Mutex::new(Some(io.stderr))),
            stdin: Mutex::new(io.stdin),
            stdin_closed: Mutex::new(false),
            stdin_notify: Arc::new(Notify::new()),
            exit: Mutex::new(None),
        });
        *slot = Some(Arc::clone(&task));
        Ok(task)
    }

    async fn task(&self) -> Result<Arc<dyn TaskOps>, RuntimeError> {
        match self.task.lock().clone() {
            Some(task) => Ok(task),
            None => Err(RuntimeError::NotFound(format!("task {}", self.id))),
        }
    }

    async fn delete(&self, _opts: DeleteOpts) -> Result<(), RuntimeError> {
        self.shared.enter(MockOp::DeleteContainer).await?;
        let running = self
            .task
            .lock()
            .as_ref()
            .is_some_and(|t| *t.status.lock() == TaskStatus::Running);
        if running {
            return Err(RuntimeError::FailedPrecondition(format!(
                "container {} has a running task",
                self.id
            )));
        }
        let mut state = self.shared.state.lock();
        match state.containers.remove(&self.id) {
            Some(_) => Ok(()),
            None => Err(RuntimeError::NotFound(format!("container {}", self.id))),
        }
    }
}

type SharedWriter = Arc<tokio::sync::Mutex<Option<IoWriter>>>;

/// Task of the mock engine.
pub struct MockTask {
    id: String,
    pid: u32,
    shared: Arc<Shared>,
    status: Mutex<TaskStatus>,
    stdout: SharedWriter,
    stderr: SharedWriter,
    stdin: Mutex<Option<IoReader>>,
    stdin_closed: Mutex<bool>,
    stdin_notify: Arc<Notify>,
    exit: Mutex<Option<ExitStatus>>,
}

impl MockTask {
    async fn finish(&self, code: i32) -> Option<TaskExit> {
        {
            let mut status = self.status.lock();
            if *status != TaskStatus::Running {
                return None;
            }
            *status = TaskStatus::Stopped;
        }
        self.stdin_notify.notify_waiters();
        close_writer(&self.stdout).await;
        close_writer(&self.stderr).await;

        let exit = TaskExit {
            container_id: self.id.clone(),
            pid: self.pid,
            exit_status: code,
            exited_at: Utc::now(),
        };
        *self.exit.lock() = Some(ExitStatus {
            code,
            exited_at: exit.exited_at,
        });
        let _ = self.shared.events.send(TaskEvent::Exit(exit.clone()));
        Some(exit)
    }
}

async fn close_writer(writer: &SharedWriter) {
    if let Some(mut w) = writer.lock().await.take() {
        let _ = w.shutdown().await;
    }
}

async fn write_to(writer: &SharedWriter, data: &[u8]) -> std::io::Result<()> {
    let mut guard = writer.lock().await;
    match guard.as_mut() {
        Some(w) => {
            w.write_all(data).await?;
            w.flush().await
        }
        None => Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe)),
    }
}

impl Sealed for MockTask {}

#[async_trait]
impl TaskOps for MockTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    async fn start(&self) -> Result<(), RuntimeError> {
        self.shared.enter(MockOp::StartTask).await?;
        {
            let mut status = self.status.lock();
            if *status != TaskStatus::Created {
                return Err(RuntimeError::FailedPrecondition(format!(
                    "task {} is {:?}",
                    self.id, *status
                )));
            }
            *status = TaskStatus::Running;
        }

        let output = self
            .shared
            .state
            .lock()
            .outputs
            .get(&self.id)
            .cloned()
            .unwrap_or_default();
        if !output.stdout.is_empty() {
            write_to(&self.stdout, &output.stdout).await?;
        }
        if !output.stderr.is_empty() {
            write_to(&self.stderr, &output.stderr).await?;
        }

        let stdin = if output.echo_stdin {
            self.stdin.lock().take()
        } else {
            None
        };
        if let Some(mut stdin) = stdin {
            let stdout = Arc::clone(&self.stdout);
            let closed = Arc::clone(&self.stdin_notify);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    let n = tokio::select! {
                        biased;
                        r = stdin.read(&mut buf) => match r {
                            Ok(0) | Err(_) => break,
                            Ok(n) => n,
                        },
                        _ = closed.notified() => break,
                    };
                    if write_to(&stdout, &buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
        Ok(())
    }

    async fn status(&self) -> Result<TaskStatus, RuntimeError> {
        self.shared.enter(MockOp::TaskStatus).await?;
        Ok(*self.status.lock())
    }

    async fn resize(&self, width: u32, height: u32) -> Result<(), RuntimeError> {
        self.shared.enter(MockOp::Resize).await?;
        self.shared
            .state
            .lock()
            .resizes
            .push((self.id.clone(), width, height));
        Ok(())
    }

    async fn close_io(&self, opts: CloseIoOpts) -> Result<(), RuntimeError> {
        self.shared.enter(MockOp::CloseIo).await?;
        if opts.stdin {
            *self.stdin_closed.lock() = true;
            self.stdin.lock().take();
            self.stdin_notify.notify_waiters();
        }
        Ok(())
    }

    async fn delete(&self, opts: TaskDeleteOpts) -> Result<ExitStatus, RuntimeError> {
        self.shared.enter(MockOp::DeleteTask).await?;
        let running = *self.status.lock() == TaskStatus::Running;
        if running && !opts.kill {
            return Err(RuntimeError::FailedPrecondition(format!(
                "task {} is still running",
                self.id
            )));
        }
        if running {
            self.finish(137).await;
        }

        let container = self.shared.state.lock().containers.get(&self.id).cloned();
        if let Some(container) = container {
            container.task.lock().take();
        }
        close_writer(&self.stdout).await;
        close_writer(&self.stderr).await;

        let exit = *self.exit.lock();
        Ok(exit.unwrap_or_else(|| ExitStatus {
            code: 0,
            exited_at: Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn null_io() -> TaskIo {
        TaskIo {
            stdin: None,
            stdout: Box::new(tokio::io::sink()),
            stderr: Box::new(tokio::io::sink()),
            terminal: false,
        }
    }

    #[tokio::test]
    async fn counts_calls_and_injects_failures_once() {
        let engine = MockEngine::new();
        let spec = ContainerSpec {
            id: "c1".to_string(),
            ..Default::default()
        };
        let container = engine.create_container(&spec).await.unwrap();

        engine.fail_next(MockOp::NewTask, RuntimeError::Runtime("boom".to_string()));
        assert!(container.new_task(null_io()).await.is_err());
        assert!(container.new_task(null_io()).await.is_ok());
        assert_eq!(engine.calls(MockOp::NewTask), 2);
    }

    #[tokio::test]
    async fn refuses_to_delete_container_with_running_task() {
        let engine = MockEngine::new();
        let spec = ContainerSpec {
            id: "c1".to_string(),
            ..Default::default()
        };
        let container = engine.create_container(&spec).await.unwrap();
        let task = container.new_task(null_io()).await.unwrap();
        task.start().await.unwrap();

        let err = container.delete(DeleteOpts::default()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::FailedPrecondition(_)));

        engine.exit("c1", 0).await.unwrap();
        container.delete(DeleteOpts::default()).await.unwrap();
        assert!(!engine.has_container("c1"));

        let err = container.delete(DeleteOpts::default()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn exit_publishes_event() {
        let engine = MockEngine::new();
        let mut events = engine.subscribe();
        let spec = ContainerSpec {
            id: "c1".to_string(),
            ..Default::default()
        };
        let container = engine.create_container(&spec).await.unwrap();
        let task = container.new_task(null_io()).await.unwrap();
        task.start().await.unwrap();

        engine.exit("c1", 3).await.unwrap();
        match events.recv().await.unwrap() {
            TaskEvent::Exit(exit) => {
                assert_eq!(exit.container_id, "c1");
                assert_eq!(exit.pid, task.pid());
                assert_eq!(exit.exit_status, 3);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
