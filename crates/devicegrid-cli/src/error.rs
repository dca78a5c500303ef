//! Error types for the CLI client.

use reqwest::StatusCode;
use thiserror::Error;

use devicegrid_core::wire::ErrorResponse;

/// Errors that can occur when talking to the coordinator.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The coordinator rejected the request.
    #[error("{message} ({code}, HTTP {status})")]
    Api {
        status: StatusCode,
        code: String,
        message: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ClientError {
    /// Build an API error from a non-success response body.
    pub fn from_body(status: StatusCode, body: &str) -> Self {
        match serde_json::from_str::<ErrorResponse>(body) {
            Ok(err) => Self::Api {
                status,
                code: err.code,
                message: err.error,
            },
            Err(_) => Self::Api {
                status,
                code: "unknown".to_string(),
                message: body.trim().to_string(),
            },
        }
    }
}
