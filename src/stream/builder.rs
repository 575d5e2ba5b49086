//! Pipeline description builder: [`StreamConfig`] → [`PipelineGraph`].
//!
//! Pure and deterministic. The resulting graph always reads
//! source → caps → convert → encoder → parser → sink.

use crate::defaults;
use crate::error::Result;
use crate::stream::config::{AudioSource, EncoderPreference, StreamConfig, VideoSource};
use crate::stream::graph::{PipelineGraph, Stage};
use std::fmt;

/// A capability that was requested but dropped so video can still stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degradation {
    /// Audio in the RTSP session is not supported yet; the stream is video-only.
    AudioUnsupported(AudioSource),
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AudioUnsupported(source) => write!(
                f,
                "audio source '{source}' is not supported in the stream session, streaming video only"
            ),
        }
    }
}

/// Output of [`build`]: the graph plus any degraded-mode signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDescription {
    pub graph: PipelineGraph,
    pub degraded: Option<Degradation>,
}

/// Builds the streaming graph for `config`.
///
/// Fails with a configuration error when `config` does not validate. Audio
/// never fails the build: any audio source other than `none` is reported as
/// [`Degradation::AudioUnsupported`] and left out of the graph.
pub fn build(config: &StreamConfig) -> Result<PipelineDescription> {
    config.validate()?;

    let stages = vec![
        source_stage(config),
        Stage::RawVideoCaps {
            width: config.width,
            height: config.height,
            framerate: config.framerate,
        },
        Stage::VideoConvert {
            format: "I420".to_string(),
        },
        encoder_stage(config),
        Stage::H264Parse {
            config_interval: -1,
        },
        Stage::RtspClientSink {
            location: config.sink.url(),
            protocols: "tcp".to_string(),
            latency_ms: defaults::SINK_LATENCY_MS,
        },
    ];

    let degraded = match config.audio_source {
        AudioSource::None => None,
        other => Some(Degradation::AudioUnsupported(other)),
    };

    let graph = PipelineGraph::new(stages);
    debug_assert!(graph.validate().is_ok(), "builder produced a malformed graph");

    Ok(PipelineDescription { graph, degraded })
}

fn source_stage(config: &StreamConfig) -> Stage {
    match config.video_source {
        VideoSource::TestPattern => Stage::TestPatternSource { live: true },
        VideoSource::V4l2 => Stage::V4l2Source {
            device: config.video_device.clone(),
        },
        VideoSource::Libcamera => Stage::LibcameraSource,
    }
}

fn encoder_stage(config: &StreamConfig) -> Stage {
    match config.encoder {
        EncoderPreference::HardwareFirst => Stage::HardwareH264 {
            bitrate: config.video_bitrate,
            profile: "baseline".to_string(),
            level: defaults::HARDWARE_H264_LEVEL.to_string(),
        },
        EncoderPreference::SoftwareOnly => Stage::SoftwareH264 {
            bitrate_kbps: config.video_bitrate / 1000,
            key_int_max: config.framerate * defaults::KEYFRAME_INTERVAL_SECS,
            bframes: 0,
            speed_preset: "ultrafast".to_string(),
            tune: "zerolatency".to_string(),
            profile: "baseline".to_string(),
        },
    }
}
