//! Error types for the glucobridge_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for glucobridge_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A collaborator rejected our credentials or session
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// A collaborator call failed in transit
    #[error("Transport error: {0}")]
    Transport(String),

    /// The sink profile has no config stored under the target name
    #[error("Profile '{0}' not found in sink profile store")]
    ProfileNotFound(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the error is a startup configuration problem rather than a
    /// per-cycle failure.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}
