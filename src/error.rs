use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the wallet engine.
///
/// Domain variants display their message verbatim; callers match on the
/// literal text, so keep messages stable.
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Credential(String),

    #[error("{0}")]
    ChainSync(String),

    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Bitcoin error: {0}")]
    Bitcoin(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WalletError {
    /// Taxonomy name reported to API callers.
    pub fn kind(&self) -> &'static str {
        match self {
            WalletError::NotFound(_) => "NotFoundError",
            WalletError::Validation(_) => "ValidationError",
            WalletError::Credential(_) => "CredentialError",
            WalletError::ChainSync(_) => "ChainSyncError",
            WalletError::KeyDerivation(_) => "KeyDerivationError",
            WalletError::Storage(_) => "PersistenceError",
            WalletError::Bitcoin(_) => "ValidationError",
            WalletError::Internal(_) => "InternalError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            WalletError::NotFound(_)
            | WalletError::Validation(_)
            | WalletError::ChainSync(_)
            | WalletError::KeyDerivation(_)
            | WalletError::Bitcoin(_) => StatusCode::BAD_REQUEST,
            WalletError::Credential(_) => StatusCode::UNAUTHORIZED,
            WalletError::Storage(_) | WalletError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Wallet directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

impl IntoResponse for WalletError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("{}", self);
        }

        let body = Json(json!({
            "status": status.as_u16(),
            "kind": self.kind(),
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
