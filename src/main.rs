// ABOUTME: Entry point for the crishim CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use crishim::config::{self, CONFIG_FILENAME, Config};
use crishim::error::{Error, Result};
use crishim::io::{LogStream, LogTag, parse_log};
use crishim::runtime::{ProcessEngine, ProcessEngineConfig};
use crishim::server::{ContainerConfig, ContainerFilter, EventMonitor, RuntimeService};
use crishim::store::{ContainerState, SandboxConfig};
use crishim::stream::TokenStreamServer;
use crishim::types::{ContainerId, ContainerMetadata, SandboxMetadata};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };
    std::process::exit(code);
}

fn init_tracing(verbose: bool, log_level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<i32> {
    let cwd = env::current_dir()?;

    if let Commands::Init { force } = cli.command {
        init_tracing(cli.verbose, "warn");
        config::init_config(&cwd, force)?;
        println!("Created {}", CONFIG_FILENAME);
        return Ok(0);
    }

    let config = Config::resolve(&cwd)?;
    init_tracing(cli.verbose, &config.log_level);
    let shim = Shim::open(&config).await?;

    let result = dispatch(&shim, &config, cli.command).await;
    shim.close().await;
    result
}

async fn dispatch(shim: &Shim, config: &Config, command: Commands) -> Result<i32> {
    match command {
        Commands::Init { .. } => Ok(0),
        Commands::Run {
            name,
            rm,
            env,
            workdir,
            command,
        } => {
            let container = ContainerConfig {
                metadata: ContainerMetadata { name, attempt: 0 },
                image: command.first().cloned().unwrap_or_default(),
                command,
                env: parse_env(&env)?,
                working_dir: workdir,
                log_path: Some(PathBuf::from("container.log")),
                ..Default::default()
            };
            run_container(&shim.service, config, container, rm).await
        }
        Commands::Ps => {
            print_containers(&shim.service);
            Ok(0)
        }
        Commands::Rm { ids } => {
            for id in ids {
                let id = resolve_id(&shim.service, &id)?;
                shim.service.remove_container(&id).await?;
                println!("{}", id);
            }
            Ok(0)
        }
        Commands::Stats { id } => {
            let id = resolve_id(&shim.service, &id)?;
            let stats = shim.service.container_stats(&id).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(0)
        }
    }
}

/// Runtime service with recovered state and a running event monitor.
struct Shim {
    service: RuntimeService,
    monitor: EventMonitor,
}

impl Shim {
    async fn open(config: &Config) -> Result<Self> {
        let engine = ProcessEngine::new(ProcessEngineConfig::from(&config.engine));
        let streams = TokenStreamServer::new(config.stream.address.clone(), config.stream.token_ttl);
        let service = RuntimeService::new(
            config.service_config(),
            Arc::new(engine),
            Arc::new(streams),
        );
        let report = service.recover().await?;
        for path in &report.skipped {
            eprintln!("Warning: skipped checkpoint {}", path.display());
        }
        let monitor = EventMonitor::start(service.clone());
        Ok(Self { service, monitor })
    }

    async fn close(self) {
        self.monitor.stop().await;
    }
}

async fn run_container(
    service: &RuntimeService,
    config: &Config,
    container: ContainerConfig,
    rm: bool,
) -> Result<i32> {
    let uid = uuid::Uuid::new_v4().to_string();
    let log_dir = config.root_dir.join("logs").join(&uid);
    let sandbox_id = service
        .run_sandbox(SandboxConfig {
            metadata: SandboxMetadata {
                name: "run".to_string(),
                namespace: "default".to_string(),
                uid,
                attempt: 0,
            },
            log_directory: Some(log_dir.clone()),
            labels: HashMap::new(),
        })
        .await?;

    let outcome = async {
        let id = service.create_container(&sandbox_id, container).await?;
        if let Err(e) = service.start_container(&id).await {
            if rm {
                remove_quietly(service, &id).await;
            }
            return Err(Error::from(e));
        }
        let code = wait_for_exit(service, &id).await?;
        if let Some(log_path) = service.container_status(&id)?.log_path {
            replay_log(&log_path).await?;
        }
        if rm {
            service.remove_container(&id).await?;
        } else {
            eprintln!("{}", id);
        }
        Ok(code)
    }
    .await;

    if let Err(e) = service.remove_sandbox(&sandbox_id).await {
        tracing::warn!("Failed to remove sandbox {}: {}", sandbox_id, e);
    }
    if rm && let Err(e) = tokio::fs::remove_dir_all(&log_dir).await {
        tracing::debug!("Failed to remove log directory {}: {}", log_dir.display(), e);
    }
    outcome
}

async fn remove_quietly(service: &RuntimeService, id: &ContainerId) {
    if let Err(e) = service.remove_container(id).await {
        tracing::warn!("Failed to remove container {}: {}", id, e);
    }
}

/// Wait until the container has exited and its output has been logged.
async fn wait_for_exit(service: &RuntimeService, id: &ContainerId) -> Result<i32> {
    let mut interval = tokio::time::interval(EXIT_POLL_INTERVAL);
    let code = loop {
        interval.tick().await;
        let status = service.container_status(id)?;
        if status.state == ContainerState::Exited {
            break status.exit_code;
        }
    };
    if let Some(io) = service.containers().get(id).ok().and_then(|c| c.io()) {
        io.wait().await;
    }
    Ok(code)
}

async fn replay_log(path: &std::path::Path) -> Result<()> {
    let contents = tokio::fs::read_to_string(path).await?;
    let lines = parse_log(&contents).map_err(|e| Error::InvalidArgument(e.to_string()))?;
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    for line in lines {
        let mut bytes = line.content.into_bytes();
        if line.tag == LogTag::Full {
            bytes.push(b'\n');
        }
        match line.stream {
            LogStream::Stdout => stdout.write_all(&bytes).await?,
            LogStream::Stderr => stderr.write_all(&bytes).await?,
        }
    }
    stdout.flush().await?;
    stderr.flush().await?;
    Ok(())
}

fn print_containers(service: &RuntimeService) {
    println!(
        "{:<14} {:<40} {:<8} {:>5}  {}",
        "CONTAINER ID", "NAME", "STATE", "EXIT", "REASON"
    );
    for view in service.list_containers(&ContainerFilter::default()) {
        let name = service
            .containers()
            .get(&view.id)
            .map(|c| c.name().to_string())
            .unwrap_or_default();
        println!(
            "{:<14} {:<40} {:<8} {:>5}  {}",
            short_id(view.id.as_str()),
            name,
            view.state.to_string(),
            view.exit_code,
            view.reason
        );
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Expand a unique ID prefix. Anything else is taken as a full ID.
fn resolve_id(service: &RuntimeService, prefix: &str) -> Result<ContainerId> {
    let matches: Vec<_> = service
        .containers()
        .list()
        .into_iter()
        .filter(|c| c.id().as_str().starts_with(prefix))
        .map(|c| c.id().clone())
        .collect();
    match matches.as_slice() {
        [] => Ok(ContainerId::new(prefix)),
        [id] => Ok(id.clone()),
        _ => Err(Error::InvalidArgument(format!(
            "container ID prefix {} is ambiguous",
            prefix
        ))),
    }
}

fn parse_env(vars: &[String]) -> Result<HashMap<String, String>> {
    vars.iter()
        .map(|var| match var.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(Error::InvalidArgument(format!(
                "environment variable {} is not KEY=VALUE",
                var
            ))),
        })
        .collect()
}
