//! Wires the assembly engine, HTTP server and background reaper together.

use chunkyard_assembly::AssemblyEngine;
use chunkyard_upload_server::{UploadServer, spawn_reaper};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Runs the server until Ctrl-C or a server failure.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let engine = AssemblyEngine::new(config.engine_config())?;
    let cancel = CancellationToken::new();

    // Clear leftovers from a previous run before accepting traffic.
    let startup = engine.clone();
    match tokio::task::spawn_blocking(move || startup.reap()).await? {
        Ok(report) => tracing::info!(
            parts = report.parts,
            chunks = report.chunks,
            claims = report.claims,
            "startup reap finished"
        ),
        Err(e) => tracing::warn!("startup reap failed: {e}"),
    }

    let reaper = spawn_reaper(engine.clone(), config.reap_interval(), cancel.clone());

    let listener = TcpListener::bind(&config.bind_addr).await?;
    let server = UploadServer::new(config.server_config(), engine);

    let server_cancel = cancel.clone();
    let mut server_task = tokio::spawn(async move { server.run(listener, server_cancel).await });

    tracing::info!("server ready");

    let result = tokio::select! {
        res = &mut server_task => {
            tracing::error!("upload server stopped unexpectedly");
            Some(res)
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
            None
        }
    };

    cancel.cancel();
    let result = match result {
        Some(res) => res,
        None => server_task.await,
    };
    if let Err(e) = reaper.await {
        tracing::warn!("reaper task failed: {e}");
    }

    result??;
    Ok(())
}
