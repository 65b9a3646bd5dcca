// ABOUTME: Task engine that runs container commands as host processes.
// ABOUTME: No isolation; used by the CLI and by tests that need real process I/O.

use super::traits::sealed::Sealed;
use super::traits::{
    CloseIoOpts, ContainerOps, ContainerSpec, DeleteOpts, EngineOps, ExitStatus, IoWriter,
    MetricsFilter, TaskDeleteOpts, TaskEvent, TaskExit, TaskIo, TaskMetrics, TaskOps,
    TaskStatus,
};
use super::RuntimeError;
use async_trait::async_trait;
use chrono::Utc;
use nix::unistd::{SysconfVar, sysconf};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

/// How long to wait for output pumps to drain after the process exits.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Settings for the process engine.
#[derive(Debug, Clone)]
pub struct ProcessEngineConfig {
    /// How long a forced delete waits for the killed process to be reaped.
    pub kill_grace: Duration,
}

impl Default for ProcessEngineConfig {
    fn default() -> Self {
        Self {
            kill_grace: Duration::from_secs(10),
        }
    }
}

struct EngineShared {
    config: ProcessEngineConfig,
    containers: Mutex<HashMap<String, Arc<ProcessContainer>>>,
    events: broadcast::Sender<TaskEvent>,
}

/// Engine running each container command as a child process of the shim.
///
/// A container created without a command is a sandbox holder: its task has no
/// process and stays running until it is deleted.
#[derive(Clone)]
pub struct ProcessEngine {
    shared: Arc<EngineShared>,
}

impl ProcessEngine {
    pub fn new(config: ProcessEngineConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            shared: Arc::new(EngineShared {
                config,
                containers: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }
}

impl Default for ProcessEngine {
    fn default() -> Self {
        Self::new(ProcessEngineConfig::default())
    }
}

impl Sealed for ProcessEngine {}

#[async_trait]
impl EngineOps for ProcessEngine {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn create_container(
        &self,
        spec: &ContainerSpec,
    ) -> Result<Arc<dyn ContainerOps>, RuntimeError> {
        let mut containers = self.shared.containers.lock();
        if containers.contains_key(&spec.id) {
            return Err(RuntimeError::AlreadyExists(format!("container {}", spec.id)));
        }
        let container = Arc::new(ProcessContainer {
            spec: spec.clone(),
            engine: Arc::downgrade(&self.shared),
            task: Mutex::new(None),
        });
        containers.insert(spec.id.clone(), Arc::clone(&container));
        tracing::debug!("Created process container {}", spec.id);
        Ok(container)
    }

    async fn load_container(&self, id: &str) -> Result<Arc<dyn ContainerOps>, RuntimeError> {
        match self.shared.containers.lock().get(id) {
            Some(container) => Ok(Arc::clone(container) as Arc<dyn ContainerOps>),
            None => Err(RuntimeError::NotFound(format!("container {id}"))),
        }
    }

    async fn metrics(&self, filter: &MetricsFilter) -> Result<Vec<TaskMetrics>, RuntimeError> {
        let tasks: Vec<Arc<ProcessTask>> = self
            .shared
            .containers
            .lock()
            .iter()
            .filter(|(id, _)| filter.matches(id))
            .filter_map(|(_, c)| c.task.lock().clone())
            .collect();

        let mut metrics = Vec::new();
        for task in tasks {
            let pid = task.pid();
            if pid == 0 || task.current_status() != TaskStatus::Running {
                continue;
            }
            match read_proc_metrics(pid).await {
                Ok(data) => metrics.push(TaskMetrics {
                    id: task.id.clone(),
                    timestamp: Utc::now(),
                    data,
                }),
                Err(e) => tracing::debug!("No metrics for task {} (pid {}): {}", task.id, pid, e),
            }
        }
        Ok(metrics)
    }

    fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.shared.events.subscribe()
    }
}

/// Container object of the process engine.
pub struct ProcessContainer {
    spec: ContainerSpec,
    engine: Weak<EngineShared>,
    task: Mutex<Option<Arc<ProcessTask>>>,
}

impl ProcessContainer {
    fn engine(&self) -> Result<Arc<EngineShared>, RuntimeError> {
        self.engine
            .upgrade()
            .ok_or_else(|| RuntimeError::Runtime("process engine shut down".to_string()))
    }
}

impl Sealed for ProcessContainer {}

#[async_trait]
impl ContainerOps for ProcessContainer {
    fn id(&self) -> &str {
        &self.spec.id
    }

    async fn new_task(&self, io: TaskIo) -> Result<Arc<dyn TaskOps>, RuntimeError> {
        let engine = self.engine()?;
        let mut slot = self.task.lock();
        if slot.is_some() {
            return Err(RuntimeError::AlreadyExists(format!("task {}", self.spec.id)));
        }
        let (exit_tx, _) = watch::channel(None);
        let task = Arc::new(ProcessTask {
            id: self.spec.id.clone(),
            spec: self.spec.clone(),
            terminal: io.terminal,
            kill_grace: engine.config.kill_grace,
            events: engine.events.clone(),
            container: self.engine.clone(),
            pid: AtomicU32::new(0),
            state: Arc::new(Mutex::new(TaskState::Created)),
            io: Mutex::new(Some(io)),
            stdin_pump: Mutex::new(None),
            kill: Mutex::new(None),
            exit: exit_tx,
        });
        *slot = Some(Arc::clone(&task));
        Ok(task)
    }

    async fn task(&self) -> Result<Arc<dyn TaskOps>, RuntimeError> {
        match self.task.lock().clone() {
            Some(task) => Ok(task),
            None => Err(RuntimeError::NotFound(format!("task {}", self.spec.id))),
        }
    }

    async fn delete(&self, _opts: DeleteOpts) -> Result<(), RuntimeError> {
        let engine = self.engine()?;
        if let Some(task) = self.task.lock().as_ref()
            && task.current_status() == TaskStatus::Running
        {
            return Err(RuntimeError::FailedPrecondition(format!(
                "container {} has a running task",
                self.spec.id
            )));
        }
        match engine.containers.lock().remove(&self.spec.id) {
            Some(_) => Ok(()),
            None => Err(RuntimeError::NotFound(format!("container {}", self.spec.id))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Created,
    Running,
    Stopped,
}

type SharedWriter = Arc<tokio::sync::Mutex<IoWriter>>;

/// Task of the process engine.
pub struct ProcessTask {
    id: String,
    spec: ContainerSpec,
    terminal: bool,
    kill_grace: Duration,
    events: broadcast::Sender<TaskEvent>,
    container: Weak<EngineShared>,
    pid: AtomicU32,
    state: Arc<Mutex<TaskState>>,
    io: Mutex<Option<TaskIo>>,
    stdin_pump: Mutex<Option<JoinHandle<()>>>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
    exit: watch::Sender<Option<ExitStatus>>,
}

impl ProcessTask {
    fn current_status(&self) -> TaskStatus {
        match *self.state.lock() {
            TaskState::Created => TaskStatus::Created,
            TaskState::Running => TaskStatus::Running,
            TaskState::Stopped => TaskStatus::Stopped,
        }
    }

    fn is_holder(&self) -> bool {
        self.spec.command.is_empty()
    }

    /// Spawn the child process and start pumping its pipes into the task I/O.
    fn spawn_process(&self, io: TaskIo) -> Result<(Child, Vec<JoinHandle<()>>), RuntimeError> {
        let (program, args) = self
            .spec
            .command
            .split_first()
            .ok_or_else(|| RuntimeError::FailedPrecondition("empty command".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&self.spec.env)
            .stdin(if io.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.spec.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;

        if let (Some(mut source), Some(mut child_stdin)) = (io.stdin, child.stdin.take()) {
            let handle = tokio::spawn(async move {
                let _ = tokio::io::copy(&mut source, &mut child_stdin).await;
                let _ = child_stdin.shutdown().await;
            });
            *self.stdin_pump.lock() = Some(handle);
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let pumps = if self.terminal {
            // A terminal interleaves both streams on stdout.
            let mut unused = io.stderr;
            tokio::spawn(async move {
                let _ = unused.shutdown().await;
            });
            let out: SharedWriter = Arc::new(tokio::sync::Mutex::new(io.stdout));
            let a = tokio::spawn(pump(stdout, Arc::clone(&out)));
            let b = tokio::spawn(pump(stderr, Arc::clone(&out)));
            vec![tokio::spawn(async move {
                let _ = a.await;
                let _ = b.await;
                let _ = out.lock().await.shutdown().await;
            })]
        } else {
            let out: SharedWriter = Arc::new(tokio::sync::Mutex::new(io.stdout));
            let err: SharedWriter = Arc::new(tokio::sync::Mutex::new(io.stderr));
            vec![
                tokio::spawn(pump_and_close(stdout, out)),
                tokio::spawn(pump_and_close(stderr, err)),
            ]
        };

        Ok((child, pumps))
    }

    /// Reap the child, drain its output, then publish the exit event.
    fn spawn_waiter(&self, mut child: Child, pumps: Vec<JoinHandle<()>>) {
        let (kill_tx, kill_rx) = oneshot::channel();
        *self.kill.lock() = Some(kill_tx);

        let id = self.id.clone();
        let pid = self.pid();
        let events = self.events.clone();
        let exit = self.exit.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            let code = match status {
                Ok(status) => exit_code(status),
                Err(e) => {
                    tracing::warn!("Failed to wait for task {} (pid {}): {}", id, pid, e);
                    255
                }
            };

            let drain = futures::future::join_all(pumps);
            if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, drain)
                .await
                .is_err()
            {
                tracing::warn!("Output of task {} still open after exit", id);
            }

            let exited_at = Utc::now();
            *state.lock() = TaskState::Stopped;
            exit.send_replace(Some(ExitStatus { code, exited_at }));
            tracing::debug!("Task {} (pid {}) exited with {}", id, pid, code);
            let _ = events.send(TaskEvent::Exit(TaskExit {
                container_id: id,
                pid,
                exit_status: code,
                exited_at,
            }));
        });
    }

    /// Stop a holder task, which has no process to reap.
    fn stop_holder(&self, code: i32) {
        let exited_at = Utc::now();
        *self.state.lock() = TaskState::Stopped;
        self.exit.send_replace(Some(ExitStatus { code, exited_at }));
        let _ = self.events.send(TaskEvent::Exit(TaskExit {
            container_id: self.id.clone(),
            pid: 0,
            exit_status: code,
            exited_at,
        }));
    }

    async fn wait_exit(&self) -> Result<ExitStatus, RuntimeError> {
        let mut rx = self.exit.subscribe();
        let waited = tokio::time::timeout(self.kill_grace, rx.wait_for(|e| e.is_some())).await;
        match waited {
            Ok(Ok(exit)) => (*exit).ok_or_else(|| RuntimeError::Runtime("missing exit".into())),
            Ok(Err(_)) => Err(RuntimeError::Runtime(format!(
                "task {} exit channel closed",
                self.id
            ))),
            Err(_) => Err(RuntimeError::Runtime(format!(
                "task {} did not exit within {:?}",
                self.id, self.kill_grace
            ))),
        }
    }

    fn detach_from_container(&self) {
        let Some(engine) = self.container.upgrade() else {
            return;
        };
        let container = engine.containers.lock().get(&self.id).cloned();
        if let Some(container) = container {
            container.task.lock().take();
        }
    }
}

impl Sealed for ProcessTask {}

#[async_trait]
impl TaskOps for ProcessTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn pid(&self) -> u32 {
        self.pid.load(Ordering::SeqCst)
    }

    async fn start(&self) -> Result<(), RuntimeError> {
        if *self.state.lock() != TaskState::Created {
            return Err(RuntimeError::FailedPrecondition(format!(
                "task {} already started",
                self.id
            )));
        }
        let io = self.io.lock().take().ok_or_else(|| {
            RuntimeError::FailedPrecondition(format!("task {} has no I/O", self.id))
        })?;

        if self.is_holder() {
            let TaskIo {
                mut stdout,
                mut stderr,
                ..
            } = io;
            let _ = stdout.shutdown().await;
            let _ = stderr.shutdown().await;
            *self.state.lock() = TaskState::Running;
            return Ok(());
        }

        let (child, pumps) = self.spawn_process(io)?;
        self.pid.store(child.id().unwrap_or(0), Ordering::SeqCst);
        *self.state.lock() = TaskState::Running;
        self.spawn_waiter(child, pumps);
        tracing::debug!("Started task {} (pid {})", self.id, self.pid());
        Ok(())
    }

    async fn status(&self) -> Result<TaskStatus, RuntimeError> {
        Ok(self.current_status())
    }

    async fn resize(&self, width: u32, height: u32) -> Result<(), RuntimeError> {
        if !self.terminal {
            return Err(RuntimeError::Unsupported(format!(
                "task {} has no terminal",
                self.id
            )));
        }
        // Processes run without a pty, so there is no window to resize.
        tracing::debug!("Resize of task {} to {}x{} ignored", self.id, width, height);
        Ok(())
    }

    async fn close_io(&self, opts: CloseIoOpts) -> Result<(), RuntimeError> {
        if opts.stdin {
            if let Some(handle) = self.stdin_pump.lock().take() {
                handle.abort();
            }
            if let Some(io) = self.io.lock().as_mut() {
                io.stdin = None;
            }
        }
        Ok(())
    }

    async fn delete(&self, opts: TaskDeleteOpts) -> Result<ExitStatus, RuntimeError> {
        let exit = match self.current_status() {
            TaskStatus::Running if !opts.kill => {
                return Err(RuntimeError::FailedPrecondition(format!(
                    "task {} is still running",
                    self.id
                )));
            }
            TaskStatus::Running if self.is_holder() => {
                self.stop_holder(137);
                self.wait_exit().await?
            }
            TaskStatus::Running => {
                if let Some(kill) = self.kill.lock().take() {
                    let _ = kill.send(());
                }
                self.wait_exit().await?
            }
            TaskStatus::Stopped => self.wait_exit().await?,
            _ => {
                self.io.lock().take();
                ExitStatus {
                    code: 0,
                    exited_at: Utc::now(),
                }
            }
        };
        self.detach_from_container();
        Ok(exit)
    }
}

async fn pump<R>(reader: Option<R>, writer: SharedWriter)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut buf = vec![0u8; 32 * 1024];
    let mut writable = true;
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        // Keep draining after the consumer goes away so the child never blocks.
        if writable {
            let mut w = writer.lock().await;
            if w.write_all(&buf[..n]).await.is_err() || w.flush().await.is_err() {
                writable = false;
            }
        }
    }
}

async fn pump_and_close<R>(reader: Option<R>, writer: SharedWriter)
where
    R: AsyncRead + Unpin,
{
    pump(reader, Arc::clone(&writer)).await;
    let _ = writer.lock().await.shutdown().await;
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

fn clock_ticks_per_second() -> u64 {
    match sysconf(SysconfVar::CLK_TCK) {
        Ok(Some(ticks)) if ticks > 0 => ticks as u64,
        _ => 100,
    }
}

/// Read CPU and memory usage of a process from procfs, shaped like a cgroup
/// metrics document.
async fn read_proc_metrics(pid: u32) -> Result<serde_json::Value, RuntimeError> {
    let stat = tokio::fs::read_to_string(format!("/proc/{pid}/stat")).await?;
    // The command name may contain spaces, so fields are counted after ')'.
    let rest = stat
        .rsplit_once(')')
        .map(|(_, rest)| rest)
        .ok_or_else(|| RuntimeError::Runtime(format!("malformed stat for pid {pid}")))?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let ticks = |idx: usize| -> Result<u64, RuntimeError> {
        fields
            .get(idx)
            .and_then(|f| f.parse::<u64>().ok())
            .ok_or_else(|| RuntimeError::Runtime(format!("malformed stat for pid {pid}")))
    };
    // utime and stime are fields 14 and 15; `rest` starts at field 3.
    let cpu_ticks = ticks(11)? + ticks(12)?;
    let cpu_ns = cpu_ticks * 1_000_000_000 / clock_ticks_per_second();

    let status = tokio::fs::read_to_string(format!("/proc/{pid}/status")).await?;
    let rss_kb = status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|v| v.split_whitespace().next())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    Ok(serde_json::json!({
        "cpu": { "usage": { "total": cpu_ns } },
        "memory": { "usage": { "usage": rss_kb * 1024 }, "total_inactive_file": 0 }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_exit_codes_are_offset() {
        use std::os::unix::process::ExitStatusExt;
        let killed = std::process::ExitStatus::from_raw(9);
        assert_eq!(exit_code(killed), 137);
        let normal = std::process::ExitStatus::from_raw(3 << 8);
        assert_eq!(exit_code(normal), 3);
    }

    #[tokio::test]
    async fn holder_task_runs_until_deleted() {
        let engine = ProcessEngine::default();
        let spec = ContainerSpec {
            id: "sandbox".to_string(),
            ..Default::default()
        };
        let container = engine.create_container(&spec).await.unwrap();
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
        assert_eq!(task.status().await.unwrap(), TaskStatus::Running);
        assert_eq!(task.pid(), 0);

        let exit = task.delete(TaskDeleteOpts { kill: true }).await.unwrap();
        assert_eq!(exit.code, 137);
        assert!(matches!(container.task().await, Err(e) if e.is_not_found()));
        container.delete(DeleteOpts::default()).await.unwrap();
    }
}
