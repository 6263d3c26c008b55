//! Error types for the `html_rehost` crate.

use crate::site::ExternalService;

/// All errors that can occur while fetching, rewriting, or packaging product
/// descriptions.
#[derive(Debug, thiserror::Error)]
pub enum RehostError {
    /// The builder configuration is invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// The requested operation is not available for this service.
    #[error("Service {0} is not supported for this operation")]
    UnsupportedService(ExternalService),

    /// A required environment variable is not set.
    #[error("Environment variable {0} is not set")]
    MissingEnv(String),

    /// A URL could not be parsed or resolved.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A retrieval collaborator reported a failure.
    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    /// The external media tool failed to start or exited with a non-zero code.
    #[error("Media conversion failed: {0}")]
    Conversion(String),

    /// The image extension is not one of the supported output formats.
    #[error("Invalid image extension: {0}")]
    InvalidExtension(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A type alias for `Result<T, RehostError>`.
pub type Result<T> = std::result::Result<T, RehostError>;
