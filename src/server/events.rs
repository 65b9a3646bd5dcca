// ABOUTME: Event monitor applying engine task events to container status.
// ABOUTME: Exits are recorded through the same transaction as start and remove.

use super::RuntimeService;
use super::error::{RuntimeSnafu, ServiceError};
use crate::runtime::{TaskDeleteOpts, TaskEvent, TaskExit};
use crate::store::{REASON_OOM_KILLED, Status};
use crate::types::ContainerId;
use snafu::ResultExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

/// Background task consuming the engine's event stream.
pub struct EventMonitor {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl EventMonitor {
    /// Subscribe to the engine and apply every event to `service`.
    pub fn start(service: RuntimeService) -> Self {
        let events = service.engine().subscribe();
        let (stop, stopped) = oneshot::channel();
        let handle = tokio::spawn(monitor(service, events, stopped));
        Self {
            stop: Some(stop),
            handle,
        }
    }

    /// Stop the monitor and wait for it to finish the event in hand.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.handle).await;
    }
}

impl Drop for EventMonitor {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn monitor(
    service: RuntimeService,
    mut events: broadcast::Receiver<TaskEvent>,
    mut stopped: oneshot::Receiver<()>,
) {
    tracing::debug!("Event monitor started");
    loop {
        let event = tokio::select! {
            _ = &mut stopped => break,
            event = events.recv() => match event {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Event monitor missed {} task events", missed);
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };
        if let Err(e) = service.handle_event(event).await {
            tracing::error!("Failed to handle task event: {}", e);
        }
    }
    tracing::debug!("Event monitor stopped");
}

impl RuntimeService {
    /// Apply one task event. Events for unknown containers are ignored.
    pub async fn handle_event(&self, event: TaskEvent) -> Result<(), ServiceError> {
        let id = ContainerId::new(event.container_id());
        let Ok(container) = self.containers.get(&id) else {
            tracing::debug!("Ignoring event for unknown container {}", id);
            return Ok(());
        };

        match event {
            TaskEvent::Oom { .. } => {
                tracing::info!("Container {} ran out of memory", id);
                container
                    .status
                    .update(|mut status| {
                        status.reason = REASON_OOM_KILLED.to_string();
                        (status, Ok(()))
                    })
                    .await
            }
            TaskEvent::Exit(exit) => {
                // Waits out a start still recording the pid.
                if exit.pid != container.status.get_sync().await.pid {
                    // Exit of another process in the container.
                    return Ok(());
                }
                match container.handle().task().await {
                    Ok(task) => {
                        if let Err(e) = task.delete(TaskDeleteOpts::default()).await
                            && !e.is_not_found()
                        {
                            return Err(e).context(RuntimeSnafu {
                                id: id.as_str(),
                                op: "delete exited task of",
                            });
                        }
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        return Err(e).context(RuntimeSnafu {
                            id: id.as_str(),
                            op: "load exited task of",
                        });
                    }
                }
                container
                    .status
                    .update(|status| {
                        (record_exit(status, &exit), Ok::<_, ServiceError>(()))
                    })
                    .await?;
                tracing::info!("Container {} exited with code {}", id, exit.exit_status);
                Ok(())
            }
        }
    }
}

fn record_exit(mut status: Status, exit: &TaskExit) -> Status {
    // The start that created this task may have failed and recorded it already.
    if exit.pid != status.pid || status.finished_at != 0 {
        return status;
    }
    status.pid = 0;
    status.finished_at = exit.exited_at.timestamp_nanos_opt().unwrap_or(i64::MAX);
    status.exit_code = exit.exit_status;
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn exit_of_recorded_pid_finishes_container() {
        let status = Status {
            pid: 42,
            created_at: 1,
            started_at: 2,
            reason: REASON_OOM_KILLED.to_string(),
            ..Default::default()
        };
        let exit = TaskExit {
            container_id: "c1".to_string(),
            pid: 42,
            exit_status: 137,
            exited_at: Utc::now(),
        };
        let status = record_exit(status, &exit);
        assert_eq!(status.pid, 0);
        assert_eq!(status.exit_code, 137);
        assert!(status.finished_at > 0);
        assert_eq!(status.reason, REASON_OOM_KILLED);
    }

    #[test]
    fn stale_exit_is_ignored() {
        let status = Status {
            pid: 0,
            created_at: 1,
            finished_at: 3,
            exit_code: 128,
            ..Default::default()
        };
        let exit = TaskExit {
            container_id: "c1".to_string(),
            pid: 1000,
            exit_status: 137,
            exited_at: Utc::now(),
        };
        assert_eq!(record_exit(status.clone(), &exit), status);
    }
}
