use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use script_inspector::config::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_TITLE};
use script_inspector::engine::EngineHandle;
use script_inspector::{DebugAgent, EchoBackend, InspectorConfig, SocketServer, TargetRegistry, TaskRunner};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "script_inspector")]
#[command(about = "Remote debugging transport for embedded script engines", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the inspector server with an echoing demo target
    Serve {
        /// Interface to listen on
        #[arg(long, env = "INSPECTOR_HOST", default_value = DEFAULT_HOST)]
        host: String,

        /// Port to listen on (0 picks a free one)
        #[arg(short, long, env = "INSPECTOR_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Title prefix shown in the target list
        #[arg(long, default_value = DEFAULT_TITLE)]
        title: String,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,

        /// Set log level (trace, debug, info, warn, error)
        #[arg(long, default_value = "info")]
        log_level: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            title,
            verbose,
            log_level,
        } => {
            let level = if verbose { "debug" } else { &log_level };
            let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();

            let config = InspectorConfig::default()
                .with_host(host)
                .with_port(port)
                .with_title(title);
            serve(config).await?;
        }
    }

    Ok(())
}

async fn serve(config: InspectorConfig) -> anyhow::Result<()> {
    let mut runner = TaskRunner::new();
    let engine = runner.handle();
    let engine_thread = std::thread::Builder::new()
        .name("engine".to_string())
        .spawn(move || runner.run())
        .context("Failed to spawn engine thread")?;

    let agent = DebugAgent::new(
        Arc::new(EchoBackend::new()),
        Arc::new(engine.clone()),
        config.title.clone(),
    );
    let registry = Arc::new(TargetRegistry::new());
    let target_id = registry.add_target(agent.clone());

    let host = config.host.clone();
    let server = SocketServer::new(config, registry);
    let port = server.start().await.context("Failed to start inspector server")?;
    agent.start()?;
    info!("🔌 Debugger target ready at ws://{}:{}/{}", host, port, target_id);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down inspector");

    server.stop();
    server.terminate_connections();
    server.wait_stopped().await;

    let stopping = agent.clone();
    engine.post_task(Box::new(move || stopping.stop()));
    engine.quit();
    engine_thread
        .join()
        .map_err(|_| anyhow!("Engine thread panicked"))?;

    info!("Inspector stopped ({:?})", agent.state());
    Ok(())
}
