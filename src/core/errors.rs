// src/core/errors.rs

//! Defines the primary error type for the gateway.

use crate::core::session::ConnectionId;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use thiserror::Error;

/// Every failure the gateway can surface, either to an HTTP caller or to the log.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// The engine or the process configuration cannot produce a working session.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A request reached the query endpoint without a connection identity attached.
    #[error("no connection ID assigned for request")]
    IdentityMissing,

    /// A session could not be created or is no longer available for this identity.
    #[error("session unavailable: {0}")]
    SessionAcquisition(String),

    /// The engine rejected or failed the query.
    #[error("{0}")]
    QueryExecution(String),

    /// A row could not be scanned or written to the response stream.
    #[error("{0}")]
    Encoding(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Not Found")]
    NotFound,

    /// Teardown was requested for a connection the registry does not know.
    #[error("no ID for connection {0}")]
    ConnectionNotFound(ConnectionId),

    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// The HTTP status this error is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// A short, stable label used for the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Configuration(_) => "configuration",
            GatewayError::IdentityMissing => "identity_missing",
            GatewayError::SessionAcquisition(_) => "session_acquisition",
            GatewayError::QueryExecution(_) => "query_execution",
            GatewayError::Encoding(_) => "encoding",
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::NotFound => "not_found",
            GatewayError::ConnectionNotFound(_) => "connection_not_found",
            GatewayError::Io(_) => "io",
            GatewayError::Internal(_) => "internal",
        }
    }

    /// The body text written back to the client.
    fn response_message(&self) -> String {
        match self {
            GatewayError::IdentityMissing
            | GatewayError::SessionAcquisition(_)
            | GatewayError::Configuration(_) => format!("No associated session: {self}\r\n"),
            GatewayError::QueryExecution(msg) => format!("Query failed: {msg}\r\n"),
            GatewayError::Encoding(msg) => format!("Serialization error: {msg}\r\n"),
            other => format!("{other}\r\n"),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.response_message(),
        )
            .into_response()
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::Io(Arc::new(e))
    }
}

impl From<tokio::task::JoinError> for GatewayError {
    fn from(e: tokio::task::JoinError) -> Self {
        GatewayError::Internal(format!("blocking task failed: {e}"))
    }
}
