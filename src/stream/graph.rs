//! Typed pipeline graph and its launch-syntax serialization.
//!
//! The graph is a plain ordered list of [`Stage`] values. Nothing here talks
//! to the media engine: [`PipelineGraph::to_launch`] is the only place that
//! produces the textual form the engine parses, and it quotes every value that
//! could otherwise be read as syntax.

use crate::error::{DoorbellError, Result};
use std::fmt;

/// Role a stage plays in the linear graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Source,
    RawCaps,
    Convert,
    Encoder,
    Parser,
    Sink,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Source => "source",
            Self::RawCaps => "caps",
            Self::Convert => "convert",
            Self::Encoder => "encoder",
            Self::Parser => "parser",
            Self::Sink => "sink",
        };
        f.write_str(name)
    }
}

/// Value of a single element property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Str(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(v) => Some(*v),
            Self::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(&quote_if_needed(s)),
        }
    }
}

/// Characters that never need quoting in launch syntax.
fn is_bare_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '/')
}

fn quote_if_needed(value: &str) -> String {
    if !value.is_empty() && value.chars().all(is_bare_char) {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// One processing step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// `videotestsrc`; `live` paces output in real time.
    TestPatternSource { live: bool },
    /// `v4l2src` reading a device node.
    V4l2Source { device: String },
    /// `libcamerasrc`.
    LibcameraSource,
    /// Raw video caps pinning size and rate.
    RawVideoCaps {
        width: u32,
        height: u32,
        framerate: u32,
    },
    /// `videoconvert` followed by a pixel-format caps filter.
    VideoConvert { format: String },
    /// `v4l2h264enc` with bitrate passed as a runtime control.
    HardwareH264 {
        bitrate: u32,
        profile: String,
        level: String,
    },
    /// `x264enc` tuned for latency.
    SoftwareH264 {
        bitrate_kbps: u32,
        key_int_max: u32,
        bframes: u32,
        speed_preset: String,
        tune: String,
        profile: String,
    },
    /// `h264parse`; `-1` re-sends SPS/PPS with every keyframe.
    H264Parse { config_interval: i32 },
    /// `rtspclientsink`.
    RtspClientSink {
        location: String,
        protocols: String,
        latency_ms: u32,
    },
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::TestPatternSource { .. } | Self::V4l2Source { .. } | Self::LibcameraSource => {
                StageKind::Source
            }
            Self::RawVideoCaps { .. } => StageKind::RawCaps,
            Self::VideoConvert { .. } => StageKind::Convert,
            Self::HardwareH264 { .. } | Self::SoftwareH264 { .. } => StageKind::Encoder,
            Self::H264Parse { .. } => StageKind::Parser,
            Self::RtspClientSink { .. } => StageKind::Sink,
        }
    }

    /// Engine element factory name; caps-only stages have none.
    pub fn element(&self) -> Option<&'static str> {
        match self {
            Self::TestPatternSource { .. } => Some("videotestsrc"),
            Self::V4l2Source { .. } => Some("v4l2src"),
            Self::LibcameraSource => Some("libcamerasrc"),
            Self::RawVideoCaps { .. } => None,
            Self::VideoConvert { .. } => Some("videoconvert"),
            Self::HardwareH264 { .. } => Some("v4l2h264enc"),
            Self::SoftwareH264 { .. } => Some("x264enc"),
            Self::H264Parse { .. } => Some("h264parse"),
            Self::RtspClientSink { .. } => Some("rtspclientsink"),
        }
    }

    /// Ordered element properties (caps fields for caps-only stages).
    pub fn properties(&self) -> Vec<(&'static str, PropertyValue)> {
        use PropertyValue::{Bool, Int, Str, UInt};
        match self {
            Self::TestPatternSource { live } => vec![("is-live", Bool(*live))],
            Self::V4l2Source { device } => vec![("device", Str(device.clone()))],
            Self::LibcameraSource => Vec::new(),
            Self::RawVideoCaps {
                width,
                height,
                framerate,
            } => vec![
                ("width", UInt(u64::from(*width))),
                ("height", UInt(u64::from(*height))),
                ("framerate", Str(format!("{framerate}/1"))),
            ],
            Self::VideoConvert { .. } => Vec::new(),
            Self::HardwareH264 { bitrate, .. } => vec![(
                "extra-controls",
                Str(format!("controls,video_bitrate={bitrate}")),
            )],
            Self::SoftwareH264 {
                bitrate_kbps,
                key_int_max,
                bframes,
                speed_preset,
                tune,
                ..
            } => vec![
                ("bitrate", UInt(u64::from(*bitrate_kbps))),
                ("speed-preset", Str(speed_preset.clone())),
                ("tune", Str(tune.clone())),
                ("key-int-max", UInt(u64::from(*key_int_max))),
                ("bframes", UInt(u64::from(*bframes))),
            ],
            Self::H264Parse { config_interval } => {
                vec![("config-interval", Int(i64::from(*config_interval)))]
            }
            Self::RtspClientSink {
                location,
                protocols,
                latency_ms,
            } => vec![
                ("location", Str(location.clone())),
                ("protocols", Str(protocols.clone())),
                ("latency", UInt(u64::from(*latency_ms))),
            ],
        }
    }

    /// Looks up a single property by name.
    pub fn property(&self, name: &str) -> Option<PropertyValue> {
        self.properties()
            .into_iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    /// Caps filter the stage pins on its output, if any.
    pub fn output_caps(&self) -> Option<String> {
        match self {
            Self::VideoConvert { format } => Some(format!("video/x-raw,format={format}")),
            Self::HardwareH264 { profile, level, .. } => Some(format!(
                "video/x-h264,profile={profile},level=(string){level}"
            )),
            Self::SoftwareH264 { profile, .. } => Some(format!("video/x-h264,profile={profile}")),
            _ => None,
        }
    }

    fn to_launch(&self) -> String {
        let body = match self.element() {
            Some(element) => {
                let mut out = element.to_string();
                for (key, value) in self.properties() {
                    out.push(' ');
                    out.push_str(key);
                    out.push('=');
                    out.push_str(&value.to_string());
                }
                out
            }
            None => {
                let fields: Vec<String> = self
                    .properties()
                    .into_iter()
                    .map(|(key, value)| format!("{key}={value}"))
                    .collect();
                format!("video/x-raw,{}", fields.join(","))
            }
        };

        match self.output_caps() {
            Some(caps) => format!("{body} ! {caps}"),
            None => body,
        }
    }
}

/// Ordered, immutable sequence of stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineGraph {
    stages: Vec<Stage>,
}

impl PipelineGraph {
    /// Wraps stages without checking them; see [`PipelineGraph::validate`].
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(Stage::kind).collect()
    }

    pub fn source(&self) -> Option<&Stage> {
        self.stages.first().filter(|s| s.kind() == StageKind::Source)
    }

    pub fn sink(&self) -> Option<&Stage> {
        self.stages.last().filter(|s| s.kind() == StageKind::Sink)
    }

    pub fn encoder(&self) -> Option<&Stage> {
        self.stages.iter().find(|s| s.kind() == StageKind::Encoder)
    }

    /// Checks the structural invariants of a linear streaming graph.
    ///
    /// Exactly one source (first), exactly one sink (last), and exactly one
    /// encoder sitting between a convert stage and a parser stage.
    pub fn validate(&self) -> Result<()> {
        let malformed = |message: String| DoorbellError::PipelineConstruction { message };

        let kinds = self.kinds();
        let (Some(first), Some(last)) = (kinds.first(), kinds.last()) else {
            return Err(malformed("graph has no stages".to_string()));
        };
        if *first != StageKind::Source {
            return Err(malformed(format!("first stage is {first}, not a source")));
        }
        if *last != StageKind::Sink {
            return Err(malformed(format!("last stage is {last}, not a sink")));
        }

        for (index, pair) in kinds.windows(2).enumerate() {
            if pair[0] == StageKind::Source && pair[1] == StageKind::Source {
                return Err(malformed(format!(
                    "consecutive source stages at positions {index} and {}",
                    index + 1
                )));
            }
        }

        let count = |kind: StageKind| kinds.iter().filter(|k| **k == kind).count();
        for kind in [StageKind::Source, StageKind::Sink, StageKind::Encoder] {
            let n = count(kind);
            if n != 1 {
                return Err(malformed(format!("expected exactly one {kind} stage, found {n}")));
            }
        }

        let encoder_at = kinds
            .iter()
            .position(|k| *k == StageKind::Encoder)
            .unwrap_or_default();
        let before = encoder_at.checked_sub(1).and_then(|i| kinds.get(i));
        let after = kinds.get(encoder_at + 1);
        if before != Some(&StageKind::Convert) || after != Some(&StageKind::Parser) {
            return Err(malformed(
                "encoder must sit between a convert stage and a parser stage".to_string(),
            ));
        }

        Ok(())
    }

    /// Serializes the graph into engine launch syntax.
    pub fn to_launch(&self) -> String {
        self.stages
            .iter()
            .map(Stage::to_launch)
            .collect::<Vec<_>>()
            .join(" ! ")
    }
}

impl fmt::Display for PipelineGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_launch())
    }
}
