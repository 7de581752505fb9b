//! # taskroute demo server
//!
//! A small HTTP service with near-duplicate endpoints. Each one reads an
//! uploaded file and pairs the read with a calculation or a batch of outbound
//! requests, placed on a different execution context through
//! [`taskroute::Dispatcher`]. The `took` field of every response shows what
//! the placement costs.
//!
//! ## Endpoints
//! - `GET /`: greeting
//! - `GET /stats`: dispatcher statistics
//! - `POST /read_file+process_block`: blocking calculation on the scheduler
//! - `POST /read_file+process_block_sync`: read and calculation on a pool thread
//! - `POST /read_file+process_in_background`: calculation as a background task
//! - `POST /read_file+separate_process`: calculation in a worker process
//! - `POST /read_file+requests_no_block`: concurrent async fan-out
//! - `POST /read_file+requests_sync`: sequential blocking fan-out on a pool thread
//! - `POST /read_file_sync`: blocking read on a pool thread
//! - `POST /read_file_pseudo_async`: blocking read inline on the scheduler
//!
//! Uploads are the raw request body; the file name comes from `?filename=`.

pub mod config;
pub mod cors;
pub mod handlers;
pub mod server;
pub mod upload;
pub mod workload;

pub use config::{DEFAULT_FANOUT_URLS, ServerConfig};
pub use cors::CorsLayer;
pub use handlers::{AppState, FileReport};
pub use server::{DemoServer, DemoServerBuilder};
pub use upload::Upload;

use hyper::StatusCode;
use taskroute::DispatchError;

/// Result type for demo server operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// Demo server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Outbound request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
}

impl ServerError {
    /// HTTP status reported to the client for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::Dispatch(DispatchError::ResourceExhausted { .. })
            | ServerError::Dispatch(DispatchError::ShutDown) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServerError::InvalidRequest("missing filename".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::Dispatch(DispatchError::ResourceExhausted {
                pool: "thread",
                capacity: 2
            })
            .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServerError::Dispatch(DispatchError::ShutDown).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServerError::Dispatch(DispatchError::task_failure("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServerError::BodyTooLarge { limit: 10 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }
}
