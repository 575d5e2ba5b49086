//! doorbell - Smart video doorbell service
//!
//! Streams a camera (and optional microphone) to an RTSP endpoint and keeps
//! the pipeline supervised: start, stop, fault detection and bounded
//! teardown.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod intercom;
pub mod logging;
pub mod service;
pub mod stream;
pub mod worker;

// Error handling
pub use error::{DoorbellError, Result};

// Config
pub use config::Config;

// Streaming (config → graph → engine → supervisor)
pub use stream::{
    MediaEngine, PipelineEvent, PipelineRuntime, StreamConfig, StreamState, StreamStats,
    StreamSupervisor,
};

// Service
pub use service::{RunOutcome, ServiceCoordinator, ServiceState, ServiceStatus, Subsystem};

// Intercom
pub use intercom::{AudioManager, CaptureDevice, PlaybackDevice};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
