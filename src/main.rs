use clap::Parser;
use rdbms_engine::config::CliArgs;
use rdbms_engine::{Config, Server, ServerState};
use std::future::Future;
use std::io;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    run(CliArgs::parse())
}

/// Exit status follows the result: `Ok` exits 0, any error exits 1.
fn run(cli: CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_args(cli)?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Initializing DB Engine...");
    info!(
        host = %config.host,
        port = config.port,
        backlog = config.backlog,
        max_connections = config.max_connections,
        workers = ?config.workers,
        "Starting rdbms-engine server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = config.workers.filter(|&n| n > 0) {
        builder.worker_threads(workers);
    }
    let runtime = builder.build()?;

    runtime.block_on(serve(config, tokio::signal::ctrl_c()))
}

/// Run the server until it returns on its own or `interrupt` completes.
///
/// An interrupt stops the server gracefully and ends with `Ok`. A bind
/// failure is logged by the server and also ends with `Ok`.
async fn serve<F>(config: Config, interrupt: F) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = io::Result<()>>,
{
    // No executor yet: echo mode
    let server = Arc::new(Server::new(&config));

    let mut serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.start().await })
    };

    let interrupted = tokio::select! {
        res = &mut serving => {
            res??;
            false
        }
        res = interrupt => {
            res?;
            true
        }
    };

    if interrupted {
        info!("Shutdown signal received. Stopping server...");
        server.stop();
        serving.await??;
    } else if server.state() == ServerState::BindFailed {
        warn!("Server never started listening");
    }

    Ok(())
}
