//! Per-stream lifecycle facade.
//!
//! All transitions take `&mut self`: one caller drives a supervisor at a
//! time. Asynchronous faults are picked up whenever the supervisor is polled
//! (`is_streaming`, `get_stats`, `poll`).

use crate::error::{DoorbellError, Result};
use crate::stream::builder::{self, Degradation};
use crate::stream::config::StreamConfig;
use crate::stream::runtime::{PipelineEvent, PipelineRuntime, RuntimeHandle};
use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Lifecycle state of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Idle,
    Starting,
    Running,
    StopRequested,
    Stopped,
    Failed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::StopRequested => "stop_requested",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Snapshot of the live stream. All fields are empty when nothing is live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sink_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framerate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_bitrate: Option<u32>,
    /// Audio is never part of the stream session yet.
    pub audio_enabled: bool,
}

impl StreamStats {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

struct ActiveStream {
    config: StreamConfig,
    handle: RuntimeHandle,
}

/// Owns at most one live pipeline and its lifecycle state.
pub struct StreamSupervisor {
    runtime: PipelineRuntime,
    state: StreamState,
    active: Option<ActiveStream>,
    last_fault: Option<String>,
    degraded: Option<Degradation>,
}

impl StreamSupervisor {
    pub fn new(runtime: PipelineRuntime) -> Self {
        Self {
            runtime,
            state: StreamState::Idle,
            active: None,
            last_fault: None,
            degraded: None,
        }
    }

    /// Last observed state, without polling for new events.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Detail of the most recent start failure or runtime fault.
    pub fn last_fault(&self) -> Option<&str> {
        self.last_fault.as_deref()
    }

    /// Degraded-mode signal of the current stream, if any.
    pub fn degraded(&self) -> Option<Degradation> {
        self.degraded
    }

    /// Launch description of the live pipeline.
    pub fn launch_description(&self) -> Option<&str> {
        self.active
            .as_ref()
            .map(|active| active.handle.launch_description())
    }

    /// Builds and activates a pipeline for `config`.
    ///
    /// A no-op with a warning while already running. On failure nothing is
    /// left live, the state is [`StreamState::Failed`] and the error is
    /// returned.
    pub fn start(&mut self, config: StreamConfig) -> Result<()> {
        self.poll();
        if self.state == StreamState::Running {
            warn!("Stream already running");
            return Ok(());
        }

        if let Some(leftover) = self.active.take() {
            Self::teardown(leftover);
        }

        self.state = StreamState::Starting;
        self.last_fault = None;
        self.degraded = None;
        info!(
            source = %config.video_source,
            resolution = %config.resolution(),
            framerate = config.framerate,
            sink = %config.sink,
            "Starting stream"
        );

        match self.launch(&config) {
            Ok(handle) => {
                info!(launch = %handle.launch_description(), "Stream started");
                self.active = Some(ActiveStream { config, handle });
                self.state = StreamState::Running;
                Ok(())
            }
            Err(e) => {
                error!("Failed to start stream: {e}");
                self.state = StreamState::Failed;
                self.last_fault = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn launch(&mut self, config: &StreamConfig) -> Result<RuntimeHandle> {
        let description = builder::build(config)?;
        if let Some(degraded) = description.degraded {
            warn!("{degraded}");
            self.degraded = Some(degraded);
        }
        self.runtime.activate(&description.graph)
    }

    /// Tears the live pipeline down. Repeatable; a no-op when nothing was
    /// ever started or the stream is already stopped.
    pub fn stop(&mut self) {
        match (self.state, self.active.is_some()) {
            (StreamState::Idle | StreamState::Stopped, _) | (StreamState::Failed, false) => {
                debug!(state = %self.state, "Stop ignored");
                return;
            }
            _ => {}
        }

        self.state = StreamState::StopRequested;
        info!("Stopping stream");
        if let Some(active) = self.active.take() {
            Self::teardown(active);
        }
        self.state = StreamState::Stopped;
        info!("Stream stopped");
    }

    /// Drains pending pipeline events and applies any fault.
    pub fn poll(&mut self) -> StreamState {
        if self.state != StreamState::Running {
            return self.state;
        }
        let Some(active) = self.active.as_ref() else {
            return self.state;
        };

        let mut fault = None;
        loop {
            match active.handle.try_next_event() {
                Ok(Some(PipelineEvent::Error(detail))) => {
                    fault = Some(detail);
                    break;
                }
                Ok(Some(PipelineEvent::EndOfStream)) => {
                    fault = Some("end of stream".to_string());
                    break;
                }
                Ok(Some(event)) => debug!(?event, "Pipeline event"),
                Ok(None) => break,
                Err(()) => {
                    fault = Some("pipeline notification loop ended".to_string());
                    break;
                }
            }
        }

        if let Some(detail) = fault {
            let err = DoorbellError::RuntimeFault {
                detail: detail.clone(),
            };
            error!("{err}");
            self.state = StreamState::Failed;
            self.last_fault = Some(detail);
            if let Some(active) = self.active.take() {
                Self::teardown(active);
            }
        }
        self.state
    }

    pub fn is_streaming(&mut self) -> bool {
        self.poll() == StreamState::Running
    }

    /// Stream statistics; the empty snapshot when nothing is live.
    pub fn get_stats(&mut self) -> StreamStats {
        let running = self.is_streaming();
        match &self.active {
            Some(active) => StreamStats {
                running,
                sink_url: Some(active.config.sink.url()),
                resolution: Some(active.config.resolution()),
                framerate: Some(active.config.framerate),
                video_bitrate: Some(active.config.video_bitrate),
                audio_enabled: false,
            },
            None => StreamStats::default(),
        }
    }

    fn teardown(active: ActiveStream) {
        match active.handle.deactivate() {
            Ok(()) => {}
            Err(e @ DoorbellError::ShutdownTimeout { .. }) => warn!("{e}"),
            Err(e) => warn!("Teardown error: {e}"),
        }
    }
}

impl Drop for StreamSupervisor {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            Self::teardown(active);
        }
    }
}
