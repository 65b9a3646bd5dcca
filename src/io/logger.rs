// ABOUTME: Log agent copying a container output stream into its log file.
// ABOUTME: Writes CRI log lines: "<RFC3339Nano> <stdout|stderr> <F|P> <content>".

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};

/// Longest line written as one log entry. Longer lines are split into
/// partial entries.
pub const MAX_LOG_LINE: usize = 16 * 1024;

/// Log file shared by the agents of one container.
pub type SharedLog = Arc<tokio::sync::Mutex<tokio::fs::File>>;

/// Output stream a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogStream::Stdout => write!(f, "stdout"),
            LogStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// Whether an entry ends a line or continues in the next entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTag {
    Full,
    Partial,
}

impl fmt::Display for LogTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogTag::Full => write!(f, "F"),
            LogTag::Partial => write!(f, "P"),
        }
    }
}

/// A single entry of a container log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub tag: LogTag,
    pub content: String,
}

#[derive(Debug, thiserror::Error)]
#[error("malformed log line {line:?}")]
pub struct LogParseError {
    line: String,
}

impl LogLine {
    /// Encode as one line of the log file, including the trailing newline.
    pub fn encode(&self) -> String {
        format!(
            "{} {} {} {}\n",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.stream,
            self.tag,
            self.content
        )
    }

    pub fn parse(line: &str) -> Result<Self, LogParseError> {
        let malformed = || LogParseError {
            line: line.to_string(),
        };
        let mut parts = line.splitn(4, ' ');
        let timestamp = parts
            .next()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .ok_or_else(malformed)?
            .with_timezone(&Utc);
        let stream = match parts.next() {
            Some("stdout") => LogStream::Stdout,
            Some("stderr") => LogStream::Stderr,
            _ => return Err(malformed()),
        };
        let tag = match parts.next() {
            Some("F") => LogTag::Full,
            Some("P") => LogTag::Partial,
            _ => return Err(malformed()),
        };
        Ok(Self {
            timestamp,
            stream,
            tag,
            content: parts.next().unwrap_or_default().to_string(),
        })
    }
}

/// Parse the contents of a log file.
pub fn parse_log(contents: &str) -> Result<Vec<LogLine>, LogParseError> {
    contents.lines().map(LogLine::parse).collect()
}

/// Copies one output stream of a container into the shared log file.
pub struct ContainerLogger {
    container_id: String,
    stream: LogStream,
    log: SharedLog,
}

impl ContainerLogger {
    pub fn new(container_id: impl Into<String>, stream: LogStream, log: SharedLog) -> Self {
        Self {
            container_id: container_id.into(),
            stream,
            log,
        }
    }

    /// Copy `source` until it closes. Write failures are logged and the
    /// source keeps being drained so the producer never stalls.
    pub async fn run<R: AsyncRead + Unpin>(self, source: R) {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::with_capacity(MAX_LOG_LINE);
        let mut writable = true;
        loop {
            buf.clear();
            let read = (&mut reader)
                .take(MAX_LOG_LINE as u64)
                .read_until(b'\n', &mut buf)
                .await;
            match read {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        "Failed to read {} of container {}: {}",
                        self.stream,
                        self.container_id,
                        e
                    );
                    break;
                }
            }

            let (tag, content) = if buf.last() == Some(&b'\n') {
                (LogTag::Full, &buf[..buf.len() - 1])
            } else if buf.len() >= MAX_LOG_LINE {
                (LogTag::Partial, &buf[..])
            } else {
                // Unterminated tail of the stream.
                (LogTag::Full, &buf[..])
            };
            if !writable {
                continue;
            }
            let line = LogLine {
                timestamp: Utc::now(),
                stream: self.stream,
                tag,
                content: String::from_utf8_lossy(content).into_owned(),
            };
            if let Err(e) = self.write(&line).await {
                tracing::error!(
                    "Failed to write {} log of container {}: {}",
                    self.stream,
                    self.container_id,
                    e
                );
                writable = false;
            }
        }
        tracing::debug!(
            "Finished logging {} of container {}",
            self.stream,
            self.container_id
        );
    }

    async fn write(&self, line: &LogLine) -> std::io::Result<()> {
        let mut log = self.log.lock().await;
        log.write_all(line.encode().as_bytes()).await?;
        log.flush().await
    }
}
