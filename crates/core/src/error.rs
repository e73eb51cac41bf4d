//! Error types for the application layer.

use thiserror::Error;

/// Application-level error type.
///
/// Device and backend failures are reported by `prism_rhi::RhiError`; this
/// type covers everything around them (windowing, configuration, IO).
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// Graphics backend errors surfaced to the application
    #[error("Backend error: {0}")]
    Backend(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration values are out of range
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias using the application Error type.
pub type Result<T> = std::result::Result<T, Error>;
