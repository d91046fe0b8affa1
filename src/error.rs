use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Error taxonomy shared by the upload and download paths.
///
/// The remote client is the only place raw transport failures are translated
/// into these variants; everything above it (orchestrator, batch runner,
/// handlers) only ever sees these kinds.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Credential rejected by the remote platform")]
    Auth,

    #[error("Credential lacks access to the destination channel")]
    Permission,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Remote platform is rate limiting requests")]
    RateLimit,

    #[error("Remote platform error: {0}")]
    Remote(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Db(#[from] sea_orm::DbErr),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransferError>;

impl IntoResponse for TransferError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            TransferError::Auth => (StatusCode::UNAUTHORIZED, self.to_string()),
            TransferError::Permission => (StatusCode::FORBIDDEN, self.to_string()),
            TransferError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            TransferError::RateLimit => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            TransferError::Remote(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            TransferError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            TransferError::Db(_) | TransferError::Io(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        (status, Json(serde_json::json!({ "message": message }))).into_response()
    }
}
