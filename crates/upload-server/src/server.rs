//! Upload server.
//!
//! Serves the upload routes on a caller-provided listener until the
//! cancellation token fires.

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use chunkyard_assembly::AssemblyEngine;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::handler::{artifact_hash, upload_chunk};
use crate::validation::normalize_extensions;
use crate::{DEFAULT_ALLOWED_EXTENSIONS, DEFAULT_MAX_CHUNK_BYTES, ServerError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// File extensions accepted for uploads (e.g. `.png`).
    pub allowed_extensions: Vec<String>,
    /// Maximum request body size in bytes.
    pub max_chunk_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
        }
    }
}

/// State shared by the handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) engine: AssemblyEngine,
    pub(crate) allowed_extensions: Arc<Vec<String>>,
}

/// HTTP server for chunked uploads.
pub struct UploadServer {
    state: AppState,
    max_chunk_bytes: usize,
}

impl UploadServer {
    pub fn new(config: ServerConfig, engine: AssemblyEngine) -> Self {
        Self {
            state: AppState {
                engine,
                allowed_extensions: Arc::new(normalize_extensions(&config.allowed_extensions)),
            },
            max_chunk_bytes: config.max_chunk_bytes,
        }
    }

    /// Builds the router with all upload routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/upload", post(upload_chunk))
            .route("/api/upload/hash", get(artifact_hash))
            .layer(DefaultBodyLimit::max(self.max_chunk_bytes))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serves requests on `listener` until `cancel` is triggered.
    pub async fn run(
        &self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        tracing::info!("upload server listening on {local_addr}");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        tracing::info!("upload server shut down");
        Ok(())
    }
}
