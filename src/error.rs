//! Error types for spotdrain
//!
//! Every variant is fatal to the daemon. The one expected "absence" (no
//! interruption notice yet) is not an error and never reaches this type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration, detected before any remote call
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Transport-level failure talking to a collaborator
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// A collaborator answered with a non-success status
    #[error("{operation} failed with HTTP {status}: {body}")]
    Api {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// A collaborator answered with a payload we could not understand
    #[error("{operation} returned a malformed response: {message}")]
    ParseError {
        operation: &'static str,
        message: String,
    },

    /// More than one scheduler node carries the local instance name
    #[error("Node name {name} matches multiple scheduler nodes: {}", .ids.join(", "))]
    DuplicateNode { name: String, ids: Vec<String> },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Builds an [`Error::Api`] from a failed response, draining its body for context
    pub(crate) async fn from_response(operation: &'static str, response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
        Error::Api {
            operation,
            status,
            body,
        }
    }
}
