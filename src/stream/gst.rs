//! GStreamer media engine.
//!
//! Graphs are realized through the launch syntax produced by
//! [`PipelineGraph::to_launch`], so what `doorbell pipeline` prints is exactly
//! what runs.

use crate::error::{DoorbellError, Result};
use crate::stream::engine::{BusMessage, EnginePipeline, EngineState, MediaEngine, PipelineBus};
use crate::stream::graph::PipelineGraph;
use gstreamer as gst;
use gstreamer::prelude::*;
use std::time::Duration;
use tracing::{debug, info};

/// GStreamer-backed [`MediaEngine`].
#[derive(Debug, Default, Clone, Copy)]
pub struct GstEngine;

impl GstEngine {
    pub fn new() -> Self {
        Self
    }
}

impl MediaEngine for GstEngine {
    fn name(&self) -> &'static str {
        "GStreamer"
    }

    fn initialize(&self) -> Result<()> {
        gst::init().map_err(|e| DoorbellError::EngineUnavailable {
            message: e.to_string(),
        })?;
        let (major, minor, micro, _) = gst::version();
        info!("GStreamer {major}.{minor}.{micro} initialized");
        Ok(())
    }

    fn release(&self) {
        // gst::deinit is unsafe while any object may still be alive; the
        // library is torn down with the process instead.
        debug!("GStreamer released");
    }

    fn construct(&self, graph: &PipelineGraph) -> Result<Box<dyn EnginePipeline>> {
        let launch = graph.to_launch();
        let element =
            gst::parse::launch(&launch).map_err(|e| DoorbellError::PipelineConstruction {
                message: e.to_string(),
            })?;
        Ok(Box::new(GstPipeline { element }))
    }
}

struct GstPipeline {
    element: gst::Element,
}

impl EnginePipeline for GstPipeline {
    fn name(&self) -> String {
        self.element.name().to_string()
    }

    fn set_playing(&mut self) -> Result<()> {
        self.element
            .set_state(gst::State::Playing)
            .map(|_| ())
            .map_err(|e| DoorbellError::Activation {
                message: format!("unable to set pipeline to playing: {e}"),
            })
    }

    fn set_null(&mut self) -> Result<()> {
        self.element
            .set_state(gst::State::Null)
            .map(|_| ())
            .map_err(|e| DoorbellError::Other(format!("unable to set pipeline to null: {e}")))
    }

    fn bus(&self) -> Result<Box<dyn PipelineBus>> {
        let bus = self.element.bus().ok_or_else(|| DoorbellError::Activation {
            message: "pipeline has no bus".to_string(),
        })?;
        Ok(Box::new(GstBus { bus }))
    }
}

struct GstBus {
    bus: gst::Bus,
}

impl PipelineBus for GstBus {
    fn pop(&self, timeout: Duration) -> Option<BusMessage> {
        let timeout = gst::ClockTime::from_mseconds(timeout.as_millis() as u64);
        self.bus.timed_pop(timeout).map(|msg| to_bus_message(&msg))
    }
}

fn to_bus_message(msg: &gst::Message) -> BusMessage {
    let source = msg
        .src()
        .map(|src| src.name().to_string())
        .unwrap_or_default();

    match msg.view() {
        gst::MessageView::Error(err) => BusMessage::Error {
            source,
            message: err.error().to_string(),
            debug: err.debug().map(|d| d.to_string()),
        },
        gst::MessageView::Warning(warning) => BusMessage::Warning {
            source,
            message: warning.error().to_string(),
            debug: warning.debug().map(|d| d.to_string()),
        },
        gst::MessageView::Eos(_) => BusMessage::EndOfStream,
        gst::MessageView::StateChanged(change) => BusMessage::StateChanged {
            source,
            old: to_engine_state(change.old()),
            new: to_engine_state(change.current()),
        },
        _ => BusMessage::Other,
    }
}

fn to_engine_state(state: gst::State) -> EngineState {
    match state {
        gst::State::Null => EngineState::Null,
        gst::State::Ready => EngineState::Ready,
        gst::State::Paused => EngineState::Paused,
        gst::State::Playing => EngineState::Playing,
        _ => EngineState::VoidPending,
    }
}
