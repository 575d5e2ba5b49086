use crate::defaults;
use crate::error::{DoorbellError, Result};
use crate::service::EnabledFeatures;
use crate::stream::config::{
    AudioSource, EncoderPreference, SinkAddress, StreamConfig, VideoSource,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub video: VideoConfig,
    pub audio: AudioConfig,
    pub rtsp: RtspConfig,
    pub button: ButtonConfig,
    pub matter: MatterConfig,
    pub substream: SubstreamConfig,
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    pub source: VideoSource,
    /// V4L2 device path, only read for `source = "v4l2"`
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    /// Bits per second
    pub bitrate: u32,
    pub hardware_encoding: bool,
}

/// Stream audio configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub enabled: bool,
    pub source: AudioSource,
    /// e.g. "hw:1,0"
    pub device: Option<String>,
    pub bitrate: u32,
}

/// RTSP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RtspConfig {
    pub host: String,
    pub port: u16,
    pub stream_name: String,
}

/// Doorbell button (GPIO) configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ButtonConfig {
    pub enabled: bool,
    pub gpio_pin: u8,
    pub debounce_ms: u32,
}

/// Matter device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatterConfig {
    pub enabled: bool,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Low-resolution secondary stream (for NVR detection)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SubstreamConfig {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            source: VideoSource::TestPattern,
            device: defaults::VIDEO_DEVICE.to_string(),
            width: defaults::WIDTH,
            height: defaults::HEIGHT,
            framerate: defaults::FRAMERATE,
            bitrate: defaults::VIDEO_BITRATE,
            hardware_encoding: false,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            source: AudioSource::None,
            device: None,
            bitrate: defaults::AUDIO_BITRATE,
        }
    }
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            host: defaults::RTSP_HOST.to_string(),
            port: defaults::RTSP_PORT,
            stream_name: defaults::STREAM_NAME.to_string(),
        }
    }
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            gpio_pin: defaults::BUTTON_GPIO_PIN,
            debounce_ms: defaults::BUTTON_DEBOUNCE_MS,
        }
    }
}

impl Default for MatterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            vendor_id: 0xFFF1,
            product_id: 0x8001,
        }
    }
}

impl Default for SubstreamConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            width: 640,
            height: 480,
            framerate: 10,
            bitrate: 500_000,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields and blocks use default values; unknown keys are ignored.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DoorbellError::ConfigFileNotFound {
                path: path.display().to_string(),
            },
            _ => DoorbellError::Io(e),
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Malformed files are still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(DoorbellError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - DOORBELL_VIDEO_SOURCE → video.source
    /// - DOORBELL_RTSP_HOST → rtsp.host
    /// - DOORBELL_RTSP_PORT → rtsp.port
    /// - DOORBELL_STREAM_NAME → rtsp.stream_name
    /// - DOORBELL_HARDWARE_ENCODING → video.hardware_encoding
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(source) = env_value("DOORBELL_VIDEO_SOURCE") {
            self.video.source = source.parse()?;
        }

        if let Some(host) = env_value("DOORBELL_RTSP_HOST") {
            self.rtsp.host = host;
        }

        if let Some(port) = env_value("DOORBELL_RTSP_PORT") {
            self.rtsp.port = port.trim().parse().map_err(|_| {
                DoorbellError::invalid("rtsp.port", format!("'{port}' is not a port number"))
            })?;
        }

        if let Some(name) = env_value("DOORBELL_STREAM_NAME") {
            self.rtsp.stream_name = name;
        }

        if let Some(flag) = env_value("DOORBELL_HARDWARE_ENCODING") {
            self.video.hardware_encoding = parse_flag(&flag).ok_or_else(|| {
                DoorbellError::invalid(
                    "video.hardware_encoding",
                    format!("'{flag}' is not a boolean"),
                )
            })?;
        }

        Ok(self)
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/doorbell/config.toml on Linux, `None` when there is
    /// no configuration directory (no HOME).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("doorbell").join("config.toml"))
    }

    /// Default configuration rendered as TOML.
    pub fn dump_template() -> Result<String> {
        Self::default().to_toml()
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| DoorbellError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// The validated stream configuration for the camera.
    pub fn stream_config(&self) -> Result<StreamConfig> {
        let config = StreamConfig {
            video_source: self.video.source,
            video_device: self.video.device.clone(),
            audio_source: self.audio.source,
            audio_device: self.audio.device.clone(),
            width: self.video.width,
            height: self.video.height,
            framerate: self.video.framerate,
            video_bitrate: self.video.bitrate,
            audio_bitrate: self.audio.bitrate,
            sink: SinkAddress::new(
                self.rtsp.host.clone(),
                self.rtsp.port,
                self.rtsp.stream_name.clone(),
            ),
            encoder: EncoderPreference::from_hardware_flag(self.video.hardware_encoding),
        };
        config.validate()?;
        Ok(config)
    }

    /// Optional subsystems as reported in status.
    pub fn features(&self) -> EnabledFeatures {
        EnabledFeatures {
            audio: self.audio.enabled,
            button: self.button.enabled,
            matter: self.matter.enabled,
            substream: self.substream.enabled,
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_doorbell_env() {
        remove_env("DOORBELL_VIDEO_SOURCE");
        remove_env("DOORBELL_RTSP_HOST");
        remove_env("DOORBELL_RTSP_PORT");
        remove_env("DOORBELL_STREAM_NAME");
        remove_env("DOORBELL_HARDWARE_ENCODING");
    }

    fn write_config(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.video.source, VideoSource::TestPattern);
        assert_eq!(config.video.width, 1920);
        assert_eq!(config.video.height, 1080);
        assert_eq!(config.video.framerate, 30);
        assert_eq!(config.video.bitrate, 2_000_000);
        assert!(!config.video.hardware_encoding);

        assert!(!config.audio.enabled);
        assert_eq!(config.audio.source, AudioSource::None);
        assert_eq!(config.audio.bitrate, 64_000);

        assert_eq!(config.rtsp.host, "127.0.0.1");
        assert_eq!(config.rtsp.port, 8554);
        assert_eq!(config.rtsp.stream_name, "doorbell");

        assert_eq!(config.button.gpio_pin, 17);
        assert_eq!(config.button.debounce_ms, 200);
        assert_eq!(config.matter.vendor_id, 0xFFF1);
        assert_eq!(config.matter.product_id, 0x8001);
        assert_eq!(config.substream.width, 640);
        assert_eq!(config.substream.bitrate, 500_000);
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_config(
            r#"
            [video]
            source = "v4l2"
            device = "/dev/video2"
            width = 1280
            height = 720
            framerate = 25
            bitrate = 1500000
            hardware_encoding = true

            [audio]
            enabled = true
            source = "alsa"
            device = "hw:1,0"

            [rtsp]
            host = "10.0.0.5"
            port = 8555
            stream_name = "front/door"

            [button]
            enabled = true
            gpio_pin = 27
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.video.source, VideoSource::V4l2);
        assert_eq!(config.video.device, "/dev/video2");
        assert_eq!(config.video.width, 1280);
        assert!(config.video.hardware_encoding);
        assert_eq!(config.audio.source, AudioSource::Alsa);
        assert_eq!(config.audio.device, Some("hw:1,0".to_string()));
        assert_eq!(config.rtsp.port, 8555);
        assert_eq!(config.button.gpio_pin, 27);
        assert_eq!(config.button.debounce_ms, 200);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_config(
            r#"
            [rtsp]
            stream_name = "porch"
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.rtsp.stream_name, "porch");
        assert_eq!(config.rtsp.host, "127.0.0.1");
        assert_eq!(config.video, VideoConfig::default());
        assert_eq!(config.audio, AudioConfig::default());
    }

    #[test]
    fn test_unknown_blocks_and_keys_are_ignored() {
        let temp_file = write_config(
            r#"
            [video]
            source = "libcamera"
            exposure = "auto"

            [notifications]
            webhook = "http://example.invalid"
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.video.source, VideoSource::Libcamera);
    }

    #[test]
    fn test_unknown_video_source_is_config_error() {
        let temp_file = write_config(
            r#"
            [video]
            source = "webcam"
        "#,
        );

        let err = Config::load(temp_file.path()).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_config(
            r#"
            [video
            source = "broken
        "#,
        );

        let result = Config::load(temp_file.path());

        assert!(matches!(result, Err(DoorbellError::Config(_))));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let missing = Path::new("/tmp/nonexistent_doorbell_config_12345.toml");
        assert!(matches!(
            Config::load(missing),
            Err(DoorbellError::ConfigFileNotFound { .. })
        ));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing = Path::new("/tmp/nonexistent_doorbell_config_12345.toml");
        let config = Config::load_or_default(missing).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_errors_on_invalid_toml() {
        let temp_file = write_config("[video\nsource = ");

        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_env_override_video_source() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_doorbell_env();

        set_env("DOORBELL_VIDEO_SOURCE", "libcamera");
        let config = Config::default().with_env_overrides().unwrap();

        assert_eq!(config.video.source, VideoSource::Libcamera);
        assert_eq!(config.rtsp.host, "127.0.0.1"); // Not overridden

        clear_doorbell_env();
    }

    #[test]
    fn test_env_override_rtsp() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_doorbell_env();

        set_env("DOORBELL_RTSP_HOST", "mediamtx.local");
        set_env("DOORBELL_RTSP_PORT", "9554");
        set_env("DOORBELL_STREAM_NAME", "gate");
        set_env("DOORBELL_HARDWARE_ENCODING", "yes");

        let config = Config::default().with_env_overrides().unwrap();

        assert_eq!(config.rtsp.host, "mediamtx.local");
        assert_eq!(config.rtsp.port, 9554);
        assert_eq!(config.rtsp.stream_name, "gate");
        assert!(config.video.hardware_encoding);

        clear_doorbell_env();
    }

    #[test]
    fn test_env_override_invalid_port_is_error() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_doorbell_env();

        set_env("DOORBELL_RTSP_PORT", "eighty");
        let result = Config::default().with_env_overrides();

        assert!(result.unwrap_err().is_config());

        clear_doorbell_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_doorbell_env();

        set_env("DOORBELL_RTSP_HOST", "");
        let config = Config::default().with_env_overrides().unwrap();

        assert_eq!(config.rtsp.host, "127.0.0.1");

        clear_doorbell_env();
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        if let Some(path) = Config::default_path() {
            let path_str = path.to_string_lossy();
            assert!(path_str.contains("doorbell"));
            assert!(path_str.ends_with("config.toml"));
        }
    }

    #[test]
    fn test_dump_template_round_trips() {
        let template = Config::dump_template().unwrap();
        assert!(template.contains("[video]"));
        assert!(template.contains("[rtsp]"));

        let parsed: Config = toml::from_str(&template).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_stream_config_maps_blocks() {
        let mut config = Config::default();
        config.video.hardware_encoding = true;
        config.rtsp.stream_name = "front".to_string();

        let stream = config.stream_config().unwrap();

        assert_eq!(stream.encoder, EncoderPreference::HardwareFirst);
        assert_eq!(stream.sink.url(), "rtsp://127.0.0.1:8554/front");
        assert_eq!(stream.resolution(), "1920x1080");
    }

    #[test]
    fn test_stream_config_rejects_bad_values() {
        let mut config = Config::default();
        config.rtsp.stream_name = "front door".to_string();

        assert!(config.stream_config().unwrap_err().is_config());
    }

    #[test]
    fn test_features_follow_enabled_flags() {
        let mut config = Config::default();
        config.button.enabled = true;
        config.substream.enabled = true;

        let features = config.features();

        assert!(features.button);
        assert!(features.substream);
        assert!(!features.audio);
        assert!(!features.matter);
    }
}
