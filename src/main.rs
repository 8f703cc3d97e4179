//! gesture-dockd: drive a container's lifecycle with hand gestures
//!
//! This daemon provides:
//! - Landmark intake from an external pose estimator (stdin or child process)
//! - Finger counting, rolling stabilization and a cooldown-gated dispatcher
//! - A FIFO worker running `docker` commands off the frame path
//! - IPC server for status, history, camera toggling and manual commands
//!
//! Camera capture and hand detection stay outside this process.

mod config;
mod events;
mod executor;
mod gesture;
mod history;
mod ipc;
mod landmarks;
mod lifecycle;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::events::DispatchEvent;
use crate::executor::{CommandExecutor, CommandWorker, DockerExecutor};
use crate::gesture::{GesturePipeline, PipelineSettings};
use crate::ipc::{Server, ServerLinks};
use crate::landmarks::LandmarkListener;
use crate::lifecycle::ShutdownSignal;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "gesture-dockd starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        container = %config.container.name,
        image = %config.container.image,
        "configuration loaded"
    );

    // Docker must answer before any gesture can mean anything
    let docker = DockerExecutor::new(config.container.clone(), config.command_timeout);
    docker
        .check_available()
        .await
        .context("docker is unavailable")?;
    let executor: Arc<dyn CommandExecutor> = Arc::new(docker);

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    // Create channels for inter-component communication
    // Landmark listener -> gesture pipeline
    let (frame_tx, frame_rx) = mpsc::channel(64);
    // IPC server -> gesture pipeline (camera session toggling)
    let (control_tx, control_rx) = mpsc::channel(8);
    // Gesture pipeline and IPC server -> command worker
    let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
    // Pipeline and worker -> IPC server
    let (event_tx, _event_rx) = broadcast::channel::<DispatchEvent>(64);

    // Subscribe before anything can emit, so the IPC view starts complete
    let mut ipc_event_rx = event_tx.subscribe();

    let mut pipeline = GesturePipeline::new(
        PipelineSettings::from(&config),
        queue_tx.clone(),
        event_tx.clone(),
    );
    let worker = CommandWorker::new(Arc::clone(&executor), event_tx.clone());

    // The pose estimator is a precondition of the frame loop
    let listener = LandmarkListener::new(config.landmark_source.clone(), frame_tx);
    listener
        .start()
        .context("pose estimator is unavailable")?;
    info!(source = ?config.landmark_source, "landmark listener started");

    let server = Server::new(
        &config.socket_path,
        ServerLinks {
            queue_tx,
            control_tx,
            executor,
            event_tx: event_tx.clone(),
        },
        config.history_limit,
    )?;
    let server_for_events = &server;

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the gesture pipeline (processes landmark frames)
        _ = pipeline.run(frame_rx, control_rx) => {
            info!("gesture pipeline exited");
        }

        // Run the command worker (drains the dispatch queue)
        _ = worker.run(queue_rx) => {
            warn!("command worker exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Mirror dispatch events into the IPC server's status and history
        _ = async {
            loop {
                match ipc_event_rx.recv().await {
                    Ok(event) => {
                        info!(%event, "dispatch event");
                        server_for_events.apply_event(&event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "dispatch event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("dispatch event handler exited");
        }

        // Wait for shutdown signal
        result = shutdown.wait() => {
            match result {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(?e, "failed to install signal handlers"),
            }
        }
    }

    // Cleanup
    info!("shutting down...");

    listener.stop();
    server.shutdown().await;

    info!("gesture-dockd stopped");

    Ok(())
}
