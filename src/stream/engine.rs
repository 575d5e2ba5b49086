//! Media engine seam.
//!
//! The runtime only ever talks to these traits. [`crate::stream::gst`] wires
//! them to GStreamer, [`crate::stream::mock`] to an in-process fake.

use crate::error::Result;
use crate::stream::graph::PipelineGraph;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Engine-level pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    VoidPending,
    Null,
    Ready,
    Paused,
    Playing,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::VoidPending => "void-pending",
            Self::Null => "null",
            Self::Ready => "ready",
            Self::Paused => "paused",
            Self::Playing => "playing",
        };
        f.write_str(name)
    }
}

/// A message popped from a pipeline's bus.
///
/// `source` is the name of the object that posted the message, so the runtime
/// can tell the top-level pipeline apart from nested elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    Error {
        source: String,
        message: String,
        debug: Option<String>,
    },
    Warning {
        source: String,
        message: String,
        debug: Option<String>,
    },
    EndOfStream,
    StateChanged {
        source: String,
        old: EngineState,
        new: EngineState,
    },
    /// Anything the runtime does not forward (tags, QoS, latency, ...).
    Other,
}

/// Read side of a pipeline's message bus.
///
/// Handed to the notification thread, which never owns the pipeline itself.
pub trait PipelineBus: Send {
    /// Waits up to `timeout` for the next message.
    fn pop(&self, timeout: Duration) -> Option<BusMessage>;
}

/// One constructed, engine-owned pipeline.
pub trait EnginePipeline: Send {
    /// Name of the top-level pipeline object as it appears on the bus.
    fn name(&self) -> String;

    /// Requests the playing state; errors mean activation failed.
    fn set_playing(&mut self) -> Result<()>;

    /// Forces the null state and releases engine resources.
    fn set_null(&mut self) -> Result<()>;

    /// Returns the bus this pipeline posts messages on.
    fn bus(&self) -> Result<Box<dyn PipelineBus>>;
}

/// Process-wide media engine.
///
/// `initialize` and `release` are paired by the service coordinator; the
/// engine is never initialized implicitly.
pub trait MediaEngine: Send + Sync {
    /// Human-readable engine name for logs and status.
    fn name(&self) -> &'static str;

    /// One-time engine setup.
    fn initialize(&self) -> Result<()>;

    /// Counterpart of [`MediaEngine::initialize`], called at service shutdown.
    fn release(&self);

    /// Realizes `graph` as an engine pipeline in the null state.
    fn construct(&self, graph: &PipelineGraph) -> Result<Box<dyn EnginePipeline>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_state_display_is_lowercase() {
        assert_eq!(EngineState::Playing.to_string(), "playing");
        assert_eq!(EngineState::VoidPending.to_string(), "void-pending");
    }

    #[test]
    fn test_engine_traits_are_object_safe() {
        fn accepts(_: Option<Box<dyn MediaEngine>>, _: Option<Box<dyn EnginePipeline>>) {}
        accepts(None, None);
    }
}
