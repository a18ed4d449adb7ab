//! stratusd — the Stratus daemon.
//!
//! Single binary that assembles the scheduler subsystems:
//! - Capacity scheduler (queue tree + cluster tracker)
//! - Application-master launcher (bounded worker pool)
//! - HTTP API for application masters and node heartbeats
//!
//! # Usage
//!
//! ```text
//! stratusd run --config stratus.toml --port 8030
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use stratus_core::{SchedulerConfig, ServiceStack};
use stratus_launcher::{LaunchCallback, MasterCommand, MasterLauncher};
use stratus_scheduler::CapacityScheduler;

#[derive(Parser)]
#[command(name = "stratusd", about = "Stratus capacity scheduler daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler control plane.
    Run {
        /// Path to the queue/allocation configuration.
        #[arg(long, default_value = "stratus.toml")]
        config: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8030")]
        port: u16,

        /// Concurrent master-launch slots.
        #[arg(long, default_value = "4")]
        launcher_workers: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stratusd=debug,stratus=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            port,
            launcher_workers,
        } => run(config, port, launcher_workers).await,
    }
}

async fn run(config_path: PathBuf, port: u16, launcher_workers: usize) -> anyhow::Result<()> {
    info!("stratus daemon starting");

    let config = SchedulerConfig::from_file(&config_path)?;
    let scheduler = Arc::new(CapacityScheduler::new(&config)?);
    info!(
        minimum_allocation = %scheduler.minimum_allocation(),
        "scheduler initialized"
    );

    // Master launches are deployment-specific; the daemon records them and
    // leaves process startup to the node side.
    let callback: LaunchCallback = Arc::new(|command: MasterCommand| {
        Box::pin(async move {
            match &command {
                MasterCommand::Launch { app_id, user, queue } => {
                    info!(%app_id, user, queue, "master launch requested");
                }
                MasterCommand::Cleanup { app_id } => {
                    info!(%app_id, "master cleanup requested");
                }
            }
            Ok(())
        })
    });
    let launcher = MasterLauncher::new(launcher_workers, callback);
    let launcher_handle = launcher.handle();

    // Ordered lifecycle: start in registration order, stop in reverse on
    // every exit path.
    let mut services = ServiceStack::new();
    services.push(Box::new(launcher));
    services.start_all().await?;

    let router = stratus_api::build_router(scheduler, Some(launcher_handle));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            services.stop_all().await;
            return Err(e.into());
        }
    };

    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
    });

    let result = server.await;
    services.stop_all().await;
    info!("stratus daemon stopped");
    result.map_err(Into::into)
}
