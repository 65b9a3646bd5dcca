// ABOUTME: Tests for engine trait definitions.
// ABOUTME: Verifies the traits work as bounds and as trait objects, using the mock engine.

use crishim::runtime::*;
use std::sync::Arc;

fn null_io() -> TaskIo {
    TaskIo {
        stdin: None,
        stdout: Box::new(tokio::io::sink()),
        stderr: Box::new(tokio::io::sink()),
        terminal: false,
    }
}

fn spec(id: &str) -> ContainerSpec {
    ContainerSpec {
        id: id.to_string(),
        command: vec!["true".to_string()],
        ..Default::default()
    }
}

/// Verify that function signatures work with trait bounds.
mod trait_bounds {
    use super::*;

    /// Function requiring only EngineOps.
    async fn run_task(engine: &impl EngineOps, id: &str) -> Result<u32, RuntimeError> {
        let container = engine.create_container(&spec(id)).await?;
        let task = container.new_task(null_io()).await?;
        task.start().await?;
        Ok(task.pid())
    }

    /// Function requiring only TaskOps.
    async fn is_running(task: &dyn TaskOps) -> Result<bool, RuntimeError> {
        Ok(task.status().await? == TaskStatus::Running)
    }

    #[tokio::test]
    async fn engine_bound_function_runs_a_task() {
        let engine = MockEngine::new();
        let pid = run_task(&engine, "c1").await.unwrap();
        assert!(pid > 0);

        let task = engine.load_container("c1").await.unwrap().task().await.unwrap();
        assert!(is_running(task.as_ref()).await.unwrap());
    }
}

mod trait_objects {
    use super::*;

    #[tokio::test]
    async fn engine_is_usable_behind_arc_dyn() {
        let engine: Arc<dyn EngineOps> = Arc::new(MockEngine::new());
        assert_eq!(engine.name(), "mock");

        let container = engine.create_container(&spec("c1")).await.unwrap();
        assert_eq!(container.id(), "c1");
        assert!(matches!(container.task().await, Err(e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn duplicate_container_is_rejected() {
        let engine: Arc<dyn EngineOps> = Arc::new(MockEngine::new());
        engine.create_container(&spec("c1")).await.unwrap();
        assert!(matches!(
            engine.create_container(&spec("c1")).await,
            Err(RuntimeError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn running_task_needs_kill_to_delete() {
        let engine = MockEngine::new();
        let container = engine.create_container(&spec("c1")).await.unwrap();
        let task = container.new_task(null_io()).await.unwrap();
        task.start().await.unwrap();

        let err = task.delete(TaskDeleteOpts::default()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::FailedPrecondition(_)));

        let exit = task.delete(TaskDeleteOpts { kill: true }).await.unwrap();
        assert_eq!(exit.code, 137);
        container.delete(DeleteOpts::default()).await.unwrap();
    }

    #[tokio::test]
    async fn exit_events_reach_subscribers() {
        let engine = MockEngine::new();
        let mut events = engine.subscribe();
        let container = engine.create_container(&spec("c1")).await.unwrap();
        let task = container.new_task(null_io()).await.unwrap();
        task.start().await.unwrap();

        engine.exit("c1", 2).await.unwrap();

        match events.recv().await.unwrap() {
            TaskEvent::Exit(exit) => {
                assert_eq!(exit.container_id, "c1");
                assert_eq!(exit.pid, task.pid());
                assert_eq!(exit.exit_status, 2);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}

mod filters {
    use super::*;

    #[test]
    fn empty_metrics_filter_matches_everything() {
        assert!(MetricsFilter::default().matches("anything"));
    }

    #[test]
    fn id_filter_matches_only_that_id() {
        let filter = MetricsFilter::id("c1");
        assert!(filter.matches("c1"));
        assert!(!filter.matches("c2"));
    }
}
