//! Camera streaming: configuration → graph → engine pipeline → supervisor.
//!
//! The builder is pure, the runtime owns the engine pipeline and its bus
//! thread, and the supervisor sequences the two behind start/stop.

pub mod builder;
pub mod config;
pub mod engine;
pub mod graph;
#[cfg(feature = "gst")]
pub mod gst;
pub mod mock;
pub mod runtime;
pub mod supervisor;

pub use builder::{Degradation, PipelineDescription, build};
pub use config::{AudioSource, EncoderPreference, SinkAddress, StreamConfig, VideoSource};
pub use engine::{BusMessage, EnginePipeline, EngineState, MediaEngine, PipelineBus};
pub use graph::{PipelineGraph, PropertyValue, Stage, StageKind};
#[cfg(feature = "gst")]
pub use gst::GstEngine;
pub use mock::MockEngine;
pub use runtime::{EventObserver, PipelineEvent, PipelineRuntime, RuntimeConfig, RuntimeHandle};
pub use supervisor::{StreamState, StreamStats, StreamSupervisor};
