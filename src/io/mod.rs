// ABOUTME: Stream plumbing of one container task: pipes, log agents and attach.
// ABOUTME: ContainerIo owns the output fan-out and the shared stdin of a task incarnation.

mod logger;
mod writer_group;

pub use logger::{
    ContainerLogger, LogLine, LogParseError, LogStream, LogTag, MAX_LOG_LINE, SharedLog,
    parse_log,
};
pub use writer_group::WriterGroup;

use crate::runtime::{IoReader, IoWriter, RuntimeError, TaskIo};
use crate::types::ContainerId;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Bytes buffered in each pipe between the task and the shim.
const PIPE_BUFFER: usize = 64 * 1024;

const LOG_SINK: &str = "log";

#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("failed to open log file {path}: {source}")]
    OpenLog {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("I/O of container {0} is closed")]
    Closed(String),
}

/// How to wire the I/O of a new task.
#[derive(Debug, Clone, Default)]
pub struct IoOptions {
    /// Give the task a stdin.
    pub stdin: bool,
    /// The task runs with a terminal, so stderr is merged into stdout.
    pub tty: bool,
    /// Log file the output is copied into.
    pub log_path: Option<PathBuf>,
}

/// Callback closing the task's stdin once a stdin-once session ends.
pub type CloseStdinFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), RuntimeError>> + Send>;

/// Streams of one attach session.
#[derive(Default)]
pub struct AttachOptions {
    pub stdin: Option<IoReader>,
    pub stdout: Option<IoWriter>,
    pub stderr: Option<IoWriter>,
    pub tty: bool,
    /// Close the task's stdin when this session's stdin ends.
    pub stdin_once: bool,
    pub close_stdin: Option<CloseStdinFn>,
}

/// I/O of one task incarnation.
///
/// Output pipes are read by router tasks that copy every chunk to the log
/// agents and to attached sessions. Routers end when the task closes its
/// output or when the I/O is closed.
pub struct ContainerIo {
    id: ContainerId,
    tty: bool,
    stdin: Option<Arc<tokio::sync::Mutex<Option<DuplexStream>>>>,
    stdout: Arc<WriterGroup>,
    stderr: Arc<WriterGroup>,
    task_io: Mutex<Option<TaskIo>>,
    closed: watch::Sender<bool>,
    routers: Mutex<Vec<JoinHandle<()>>>,
    sessions: AtomicU64,
}

impl ContainerIo {
    /// Create the pipes and start the routers and log agents, so no output
    /// is lost once the task starts.
    pub async fn new(id: &ContainerId, opts: IoOptions) -> Result<Self, IoError> {
        let (task_stdout, shim_stdout) = tokio::io::duplex(PIPE_BUFFER);
        let (task_stderr, shim_stderr) = tokio::io::duplex(PIPE_BUFFER);
        let (stdin, task_stdin) = if opts.stdin {
            let (shim, task) = tokio::io::duplex(PIPE_BUFFER);
            (
                Some(Arc::new(tokio::sync::Mutex::new(Some(shim)))),
                Some(Box::new(task) as IoReader),
            )
        } else {
            (None, None)
        };

        let io = Self {
            id: id.clone(),
            tty: opts.tty,
            stdin,
            stdout: Arc::new(WriterGroup::new()),
            stderr: Arc::new(WriterGroup::new()),
            task_io: Mutex::new(Some(TaskIo {
                stdin: task_stdin,
                stdout: Box::new(task_stdout),
                stderr: Box::new(task_stderr),
                terminal: opts.tty,
            })),
            closed: watch::channel(false).0,
            routers: Mutex::new(Vec::new()),
            sessions: AtomicU64::new(0),
        };

        let mut routers = vec![
            io.spawn_router(shim_stdout, Arc::clone(&io.stdout)),
            io.spawn_router(shim_stderr, Arc::clone(&io.stderr)),
        ];
        if let Some(path) = &opts.log_path {
            let log = open_log(path).await?;
            routers.push(
                io.start_logger(&io.stdout, LogStream::Stdout, Arc::clone(&log))
                    .await,
            );
            if !opts.tty {
                routers.push(io.start_logger(&io.stderr, LogStream::Stderr, log).await);
            }
        }
        *io.routers.lock() = routers;
        tracing::debug!("Created I/O for container {}", id);
        Ok(io)
    }

    /// Endpoints to hand to the engine. Available once.
    pub fn take_task_io(&self) -> Option<TaskIo> {
        self.task_io.lock().take()
    }

    /// Stop routing output. Closes the read ends of the pipes, which ends the
    /// log agents and every attached session.
    pub fn close(&self) {
        self.closed.send_replace(true);
        self.task_io.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait until the routers and the log agents have finished.
    pub async fn wait(&self) {
        let routers: Vec<_> = std::mem::take(&mut *self.routers.lock());
        for router in routers {
            let _ = router.await;
        }
    }

    /// Attach a session to the live streams and wait until it ends.
    ///
    /// The session ends when its output sinks are closed: by the task closing
    /// its output, by the I/O being closed, or, without stdin-once, by the
    /// session's own stdin ending.
    pub async fn attach(&self, opts: AttachOptions) -> Result<(), IoError> {
        if self.is_closed() || self.stdout.is_closed().await {
            return Err(IoError::Closed(self.id.to_string()));
        }
        let key = format!("attach-{}", self.sessions.fetch_add(1, Ordering::SeqCst));
        tracing::debug!("Attaching session {} to container {}", key, self.id);

        let mut outputs = Vec::new();
        if let Some(stdout) = opts.stdout {
            outputs.push(self.stdout.add(key.clone(), stdout).await);
        }
        match opts.stderr {
            Some(stderr) if !opts.tty && !self.tty => {
                outputs.push(self.stderr.add(key.clone(), stderr).await);
            }
            Some(mut stderr) => {
                // Terminal output arrives interleaved on stdout.
                let _ = stderr.shutdown().await;
            }
            None => {}
        }

        let copier = match (opts.stdin, &self.stdin) {
            (Some(source), Some(target)) => Some(tokio::spawn(copy_stdin(
                source,
                Arc::clone(target),
                StdinEnd {
                    id: self.id.clone(),
                    key: key.clone(),
                    stdin_once: opts.stdin_once,
                    close_stdin: opts.close_stdin,
                    stdout: Arc::clone(&self.stdout),
                    stderr: Arc::clone(&self.stderr),
                },
            ))),
            (Some(_), None) => {
                tracing::debug!("Container {} has no stdin; ignoring session input", self.id);
                None
            }
            (None, _) => None,
        };

        if outputs.is_empty() {
            if let Some(copier) = copier {
                let _ = copier.await;
            }
        } else {
            futures::future::join_all(outputs).await;
            if let Some(copier) = copier {
                copier.abort();
            }
        }
        tracing::debug!("Session {} of container {} ended", key, self.id);
        Ok(())
    }

    async fn start_logger(
        &self,
        group: &WriterGroup,
        stream: LogStream,
        log: SharedLog,
    ) -> JoinHandle<()> {
        let (sink, source) = tokio::io::duplex(PIPE_BUFFER);
        // The agent ends when its sink is closed with the group.
        let _closed = group.add(LOG_SINK, Box::new(sink)).await;
        let logger = ContainerLogger::new(self.id.as_str(), stream, log);
        tokio::spawn(logger.run(source))
    }

    fn spawn_router(&self, mut source: DuplexStream, group: Arc<WriterGroup>) -> JoinHandle<()> {
        let mut closed = self.closed.subscribe();
        let id = self.id.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 32 * 1024];
            loop {
                tokio::select! {
                    read = source.read(&mut buf) => match read {
                        Ok(0) => break,
                        Ok(n) => group.write(&buf[..n]).await,
                        Err(e) => {
                            tracing::debug!("Output of container {} failed: {}", id, e);
                            break;
                        }
                    },
                    _ = async { let _ = closed.wait_for(|closed| *closed).await; } => break,
                }
            }
            drop(source);
            group.close().await;
        })
    }
}

impl Drop for ContainerIo {
    fn drop(&mut self) {
        self.closed.send_replace(true);
    }
}

/// Closes a [`ContainerIo`] when dropped, unless disarmed.
pub struct IoGuard {
    io: Option<Arc<ContainerIo>>,
}

impl IoGuard {
    pub fn new(io: Arc<ContainerIo>) -> Self {
        Self { io: Some(io) }
    }

    /// Keep the I/O open and hand it back.
    pub fn disarm(mut self) -> Option<Arc<ContainerIo>> {
        self.io.take()
    }
}

impl Drop for IoGuard {
    fn drop(&mut self) {
        if let Some(io) = self.io.take() {
            io.close();
        }
    }
}

/// What happens when a session's stdin ends.
struct StdinEnd {
    id: ContainerId,
    key: String,
    stdin_once: bool,
    close_stdin: Option<CloseStdinFn>,
    stdout: Arc<WriterGroup>,
    stderr: Arc<WriterGroup>,
}

async fn copy_stdin<R>(
    mut source: R,
    target: Arc<tokio::sync::Mutex<Option<DuplexStream>>>,
    end: StdinEnd,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 32 * 1024];
    loop {
        let n = match source.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("Stdin of session {} failed: {}", end.key, e);
                break;
            }
        };
        let mut stdin = target.lock().await;
        let Some(writer) = stdin.as_mut() else {
            break;
        };
        if let Err(e) = writer.write_all(&buf[..n]).await {
            tracing::debug!("Failed to forward stdin of container {}: {}", end.id, e);
            break;
        }
    }

    if end.stdin_once {
        if let Some(mut writer) = target.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(close) = end.close_stdin {
            if let Err(e) = close().await {
                tracing::error!("Failed to close stdin of container {}: {}", end.id, e);
            }
        }
    } else {
        end.stdout.remove(&end.key).await;
        end.stderr.remove(&end.key).await;
    }
}

async fn open_log(path: &Path) -> Result<SharedLog, IoError> {
    let open = async {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
    };
    let file = open.await.map_err(|source| IoError::OpenLog {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Arc::new(tokio::sync::Mutex::new(file)))
}
