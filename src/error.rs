// Copyright (c) 2025 pynickle. This is a fork of Original Crate. Original copyright: Copyright (c) 2025 NameOfShadow

use thiserror::Error;

/// The single failure outcome of every [`MojangApi`](crate::MojangApi) operation.
///
/// Transport, decode and shape failures all surface through this type and
/// carry the underlying cause; nothing is retried.
#[derive(Error, Debug)]
pub enum MojangError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Response is missing field `{field}`")]
    MissingField { field: &'static str },

    #[error("Unexpected response shape: {0}")]
    UnexpectedShape(String),

    #[error("Profile has no properties")]
    EmptyProperties,

    #[error("Invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("Base64 decoding error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Display name must not be empty, `.` or `..`")]
    InvalidName,

    #[error("Invalid endpoint base URL: {0}")]
    InvalidEndpoint(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl MojangError {
    /// True when the transport cause was a connect timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, MojangError::Http(e) if e.is_timeout())
    }

    /// HTTP status of a non-2xx response, if that is what failed.
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            MojangError::Http(e) => e.status(),
            _ => None,
        }
    }
}
