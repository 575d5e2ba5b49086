//! Default configuration constants for doorbell.
//!
//! Shared by the configuration loader, the pipeline builder and the runtime so
//! the same numbers are never spelled twice.

use std::time::Duration;

/// Default capture width in pixels.
pub const WIDTH: u32 = 1920;

/// Default capture height in pixels.
pub const HEIGHT: u32 = 1080;

/// Default capture framerate (frames per second).
pub const FRAMERATE: u32 = 30;

/// Default H.264 bitrate in bits per second (2 Mbps).
pub const VIDEO_BITRATE: u32 = 2_000_000;

/// Largest accepted capture width or height in pixels.
pub const MAX_DIMENSION: u32 = 8192;

/// Largest accepted capture framerate.
pub const MAX_FRAMERATE: u32 = 240;

/// Smallest accepted video bitrate; x264enc takes whole kbit/s.
pub const MIN_VIDEO_BITRATE: u32 = 1000;

/// Default audio bitrate in bits per second (64 Kbps).
pub const AUDIO_BITRATE: u32 = 64_000;

/// Default V4L2 capture device.
pub const VIDEO_DEVICE: &str = "/dev/video0";

/// Default RTSP server host (local MediaMTX).
pub const RTSP_HOST: &str = "127.0.0.1";

/// Default RTSP server port.
pub const RTSP_PORT: u16 = 8554;

/// Default RTSP stream path.
pub const STREAM_NAME: &str = "doorbell";

/// URL scheme of the streaming server.
pub const SINK_SCHEME: &str = "rtsp";

/// Sink buffering latency in milliseconds.
///
/// Absorbs network jitter without letting the buffer grow unbounded.
pub const SINK_LATENCY_MS: u32 = 200;

/// Keyframe interval expressed in seconds of video.
///
/// Bounds recovery time after packet loss or a mid-stream reconnect.
pub const KEYFRAME_INTERVAL_SECS: u32 = 2;

/// H.264 level used by the hardware encoder.
pub const HARDWARE_H264_LEVEL: &str = "3.1";

/// Upper bound on every teardown join.
pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long the bus worker blocks on a single bus pop.
pub const BUS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Capacity of the bus → supervisor event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Wake interval of the coordinator's supervisory loop.
pub const SUPERVISOR_TICK: Duration = Duration::from_secs(1);

/// Intercom sample rate in Hz (voice quality).
pub const AUDIO_SAMPLE_RATE: u32 = 16_000;

/// Intercom samples per chunk.
pub const AUDIO_CHUNK_SIZE: usize = 1024;

/// Capacity of each intercom queue, in chunks.
pub const AUDIO_QUEUE_CAPACITY: usize = 100;

/// Default GPIO pin for the doorbell button.
pub const BUTTON_GPIO_PIN: u8 = 17;

/// Default button debounce window in milliseconds.
pub const BUTTON_DEBOUNCE_MS: u32 = 200;

/// Report the media engine compiled into this build.
pub fn media_engine() -> &'static str {
    if cfg!(feature = "gst") {
        "GStreamer"
    } else {
        "none"
    }
}
