//! Typed stream configuration.
//!
//! Every selector that the configuration file spells as a string is a closed
//! enum here, so the builder never has to deal with an unknown kind.

use crate::defaults;
use crate::error::{DoorbellError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where video frames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoSource {
    /// Synthetic test pattern, paced in real time.
    #[serde(rename = "test")]
    TestPattern,
    /// Local V4L2 video device.
    #[serde(rename = "v4l2")]
    V4l2,
    /// Platform camera stack (libcamera on the Pi).
    #[serde(rename = "libcamera")]
    Libcamera,
}

impl VideoSource {
    pub const ALL: [VideoSource; 3] = [Self::TestPattern, Self::V4l2, Self::Libcamera];

    /// Name used in configuration files and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TestPattern => "test",
            Self::V4l2 => "v4l2",
            Self::Libcamera => "libcamera",
        }
    }
}

impl fmt::Display for VideoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoSource {
    type Err = DoorbellError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|source| source.as_str() == s.trim())
            .ok_or_else(|| {
                DoorbellError::invalid(
                    "video.source",
                    format!("unknown source '{s}' (expected test, v4l2 or libcamera)"),
                )
            })
    }
}

/// Where audio samples come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioSource {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "test")]
    TestTone,
    #[serde(rename = "alsa")]
    Alsa,
    #[serde(rename = "pulse")]
    Pulse,
}

impl AudioSource {
    pub const ALL: [AudioSource; 4] = [Self::None, Self::TestTone, Self::Alsa, Self::Pulse];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::TestTone => "test",
            Self::Alsa => "alsa",
            Self::Pulse => "pulse",
        }
    }
}

impl fmt::Display for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioSource {
    type Err = DoorbellError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|source| source.as_str() == s.trim())
            .ok_or_else(|| {
                DoorbellError::invalid(
                    "audio.source",
                    format!("unknown source '{s}' (expected none, test, alsa or pulse)"),
                )
            })
    }
}

/// Which H.264 encoder the builder should pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncoderPreference {
    /// V4L2 hardware encoder: low CPU, needs GPU memory.
    HardwareFirst,
    /// x264 software encoder: portable, CPU bound.
    SoftwareOnly,
}

impl EncoderPreference {
    pub fn from_hardware_flag(use_hardware: bool) -> Self {
        if use_hardware {
            Self::HardwareFirst
        } else {
            Self::SoftwareOnly
        }
    }
}

/// RTSP server the stream is published to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkAddress {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl SinkAddress {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
        }
    }

    /// Full `rtsp://host:port/path` location.
    pub fn url(&self) -> String {
        format!(
            "{}://{}:{}/{}",
            defaults::SINK_SCHEME,
            self.host,
            self.port,
            self.path
        )
    }

    /// Checks host, port and path are usable verbatim in a URL.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(DoorbellError::invalid("rtsp.host", "must not be empty"));
        }
        if self
            .host
            .chars()
            .any(|c| c.is_whitespace() || c == '/' || c == '"')
        {
            return Err(DoorbellError::invalid(
                "rtsp.host",
                format!("'{}' is not a valid host", self.host),
            ));
        }
        if self.port == 0 {
            return Err(DoorbellError::invalid("rtsp.port", "must be non-zero"));
        }
        validate_path_token(&self.path)
    }
}

impl Default for SinkAddress {
    fn default() -> Self {
        Self::new(
            defaults::RTSP_HOST,
            defaults::RTSP_PORT,
            defaults::STREAM_NAME,
        )
    }
}

impl fmt::Display for SinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// A path is one or more `/`-separated segments of non-whitespace characters.
fn validate_path_token(path: &str) -> Result<()> {
    let reason = if path.is_empty() {
        Some("must not be empty")
    } else if path.starts_with('/') || path.ends_with('/') {
        Some("must not start or end with '/'")
    } else if path.split('/').any(str::is_empty) {
        Some("must not contain empty segments")
    } else if path
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '"' | '\\' | '!'))
    {
        Some("must not contain whitespace, quotes, backslashes or '!'")
    } else {
        None
    };

    match reason {
        Some(message) => Err(DoorbellError::invalid(
            "rtsp.stream_name",
            format!("'{path}' {message}"),
        )),
        None => Ok(()),
    }
}

/// Immutable description of one camera stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub video_source: VideoSource,
    /// Device path, only used by [`VideoSource::V4l2`].
    pub video_device: String,
    pub audio_source: AudioSource,
    pub audio_device: Option<String>,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    /// Bits per second.
    pub video_bitrate: u32,
    /// Bits per second.
    pub audio_bitrate: u32,
    pub sink: SinkAddress,
    pub encoder: EncoderPreference,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            video_source: VideoSource::TestPattern,
            video_device: defaults::VIDEO_DEVICE.to_string(),
            audio_source: AudioSource::None,
            audio_device: None,
            width: defaults::WIDTH,
            height: defaults::HEIGHT,
            framerate: defaults::FRAMERATE,
            video_bitrate: defaults::VIDEO_BITRATE,
            audio_bitrate: defaults::AUDIO_BITRATE,
            sink: SinkAddress::default(),
            encoder: EncoderPreference::SoftwareOnly,
        }
    }
}

impl StreamConfig {
    /// Rejects values the pipeline cannot be built from.
    pub fn validate(&self) -> Result<()> {
        for (key, value, max) in [
            ("video.width", self.width, defaults::MAX_DIMENSION),
            ("video.height", self.height, defaults::MAX_DIMENSION),
            ("video.framerate", self.framerate, defaults::MAX_FRAMERATE),
        ] {
            if value == 0 {
                return Err(DoorbellError::invalid(key, "must be positive"));
            }
            if value > max {
                return Err(DoorbellError::invalid(
                    key,
                    format!("{value} exceeds the maximum of {max}"),
                ));
            }
        }

        if self.video_bitrate < defaults::MIN_VIDEO_BITRATE {
            return Err(DoorbellError::invalid(
                "video.bitrate",
                format!(
                    "{} is below the minimum of {} bits per second",
                    self.video_bitrate,
                    defaults::MIN_VIDEO_BITRATE
                ),
            ));
        }

        if self.video_source == VideoSource::V4l2 {
            let device = self.video_device.trim();
            if device.is_empty() || device.chars().any(char::is_whitespace) {
                return Err(DoorbellError::invalid(
                    "video.device",
                    format!("'{}' is not a device path", self.video_device),
                ));
            }
        }

        self.sink.validate()
    }

    /// `"1920x1080"`.
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}
