//! Error types for doorbell.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DoorbellError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Pipeline lifecycle errors
    #[error("Pipeline construction failed: {message}")]
    PipelineConstruction { message: String },

    #[error("Pipeline activation failed: {message}")]
    Activation { message: String },

    #[error("Pipeline runtime fault: {detail}")]
    RuntimeFault { detail: String },

    #[error("Shutdown timed out after {waited_ms}ms: {message}")]
    ShutdownTimeout { waited_ms: u64, message: String },

    // Media engine errors
    #[error("Media engine unavailable: {message}")]
    EngineUnavailable { message: String },

    // Audio (intercom) errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio stream error: {message}")]
    AudioStream { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl DoorbellError {
    /// Shorthand for an invalid configuration value.
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigInvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// True for errors caused by configuration rather than the runtime.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::ConfigFileNotFound { .. }
                | Self::ConfigParse { .. }
                | Self::ConfigInvalidValue { .. }
                | Self::Config(_)
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, DoorbellError>;
