pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};

pub use handlers::AppState;

/// Create the file-transfer API router
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // Files
        .route("/api/files", post(handlers::upload_file).get(handlers::list_files))
        .route(
            "/api/files/:id",
            get(handlers::download_file).delete(handlers::delete_file),
        )
        .route("/api/files/:id/visibility", patch(handlers::set_visibility))
        // Public share links
        .route("/share/:share_id", get(handlers::share_download))
        // Ledger-less retrieval straight off channel history
        .route("/api/channels/:channel/scan/:filename", get(handlers::scan_download))
        // Batches
        .route("/api/batch/upload", post(handlers::batch_upload))
        .route("/api/batch/download", post(handlers::batch_download))
        .route("/api/batch/:id", get(handlers::batch_status))
        // Admin settings
        .route("/api/config", get(handlers::get_config).put(handlers::put_config))
        // Health check
        .route("/health", get(handlers::health))
}
