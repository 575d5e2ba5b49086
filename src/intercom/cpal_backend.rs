//! Intercom devices backed by cpal (ALSA/PipeWire/PulseAudio).

use crate::defaults;
use crate::error::{DoorbellError, Result};
use crate::intercom::device::{AudioChunk, CaptureDevice, PlaybackDevice};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Wrapper for cpal::Stream to make it Send.
///
/// The stream is created, played and dropped by the thread that owns the
/// device; it is only moved between threads while idle.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

const READ_POLL: Duration = Duration::from_millis(5);

/// Most samples the speaker buffer holds before the oldest are discarded.
const PLAYBACK_BUFFER_LIMIT: usize = defaults::AUDIO_QUEUE_CAPACITY * defaults::AUDIO_CHUNK_SIZE;

fn stream_config() -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: 1,
        sample_rate: defaults::AUDIO_SAMPLE_RATE,
        buffer_size: cpal::BufferSize::Default,
    }
}

fn stream_error(context: &str, e: impl std::fmt::Display) -> DoorbellError {
    DoorbellError::AudioStream {
        message: format!("{context}: {e}"),
    }
}

fn find_device(name: Option<&str>, input: bool) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let wanted = name.unwrap_or("default");

    let device = match name {
        Some(name) => {
            let devices = if input {
                host.input_devices()
            } else {
                host.output_devices()
            }
            .map_err(|e| stream_error("failed to enumerate audio devices", e))?;
            devices
                .into_iter()
                .find(|dev| dev.name().map(|n| n == name).unwrap_or(false))
        }
        None if input => host.default_input_device(),
        None => host.default_output_device(),
    };

    device.ok_or_else(|| DoorbellError::AudioDeviceNotFound {
        device: wanted.to_string(),
    })
}

/// Microphone capture at 16 kHz mono, cut into fixed-size chunks.
pub struct CpalCapture {
    device_name: Option<String>,
    stream: Option<SendableStream>,
    buffer: Arc<Mutex<Vec<i16>>>,
}

impl CpalCapture {
    /// `None` selects the host's default input device.
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            stream: None,
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn build_stream(&self, device: &cpal::Device) -> Result<cpal::Stream> {
        let config = stream_config();
        let err_callback = |err| tracing::error!("Audio input error: {err}");

        let buffer = Arc::clone(&self.buffer);
        if let Ok(stream) = device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        // Float-only devices.
        let buffer = Arc::clone(&self.buffer);
        device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend(
                            data.iter()
                                .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
                        );
                    }
                },
                err_callback,
                None,
            )
            .map_err(|e| stream_error("failed to open input stream", e))
    }

    fn take_chunk(&self) -> Option<AudioChunk> {
        let mut buf = self.buffer.lock().ok()?;
        if buf.len() < defaults::AUDIO_CHUNK_SIZE {
            return None;
        }
        Some(buf.drain(..defaults::AUDIO_CHUNK_SIZE).collect())
    }
}

impl CaptureDevice for CpalCapture {
    fn open(&mut self) -> Result<()> {
        let device = find_device(self.device_name.as_deref(), true)?;
        let stream = self.build_stream(&device)?;
        stream
            .play()
            .map_err(|e| stream_error("failed to start input stream", e))?;
        self.stream = Some(SendableStream(stream));
        tracing::info!(
            "Microphone: {}",
            self.device_name.as_deref().unwrap_or("default")
        );
        Ok(())
    }

    fn read_chunk(&mut self, timeout: Duration) -> Result<Option<AudioChunk>> {
        if self.stream.is_none() {
            return Err(stream_error("read from closed device", "capture"));
        }
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(chunk) = self.take_chunk() {
                return Ok(Some(chunk));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(READ_POLL);
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(SendableStream(stream)) = self.stream.take() {
            stream
                .pause()
                .map_err(|e| stream_error("failed to stop input stream", e))?;
        }
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
        Ok(())
    }
}

/// Speaker playback at 16 kHz mono. Underruns play silence.
pub struct CpalPlayback {
    device_name: Option<String>,
    stream: Option<SendableStream>,
    buffer: Arc<Mutex<VecDeque<i16>>>,
}

impl CpalPlayback {
    /// `None` selects the host's default output device.
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            stream: None,
            buffer: Arc::new(Mutex::new(VecDeque::new())),
        }
    }
}

impl PlaybackDevice for CpalPlayback {
    fn open(&mut self) -> Result<()> {
        let device = find_device(self.device_name.as_deref(), false)?;

        let buffer = Arc::clone(&self.buffer);
        let stream = device
            .build_output_stream(
                &stream_config(),
                move |output: &mut [i16], _: &cpal::OutputCallbackInfo| match buffer.lock() {
                    Ok(mut buf) => {
                        for sample in output.iter_mut() {
                            *sample = buf.pop_front().unwrap_or(0);
                        }
                    }
                    Err(_) => output.fill(0),
                },
                |err| tracing::error!("Audio output error: {err}"),
                None,
            )
            .map_err(|e| stream_error("failed to open output stream", e))?;
        stream
            .play()
            .map_err(|e| stream_error("failed to start output stream", e))?;

        self.stream = Some(SendableStream(stream));
        tracing::info!(
            "Speaker: {}",
            self.device_name.as_deref().unwrap_or("default")
        );
        Ok(())
    }

    fn write_chunk(&mut self, samples: &[i16]) -> Result<()> {
        if self.stream.is_none() {
            return Err(stream_error("write to closed device", "playback"));
        }
        let mut buf = self
            .buffer
            .lock()
            .map_err(|e| stream_error("playback buffer poisoned", e))?;
        buf.extend(samples.iter().copied());
        if buf.len() > PLAYBACK_BUFFER_LIMIT {
            let excess = buf.len() - PLAYBACK_BUFFER_LIMIT;
            buf.drain(..excess);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(SendableStream(stream)) = self.stream.take() {
            stream
                .pause()
                .map_err(|e| stream_error("failed to stop output stream", e))?;
        }
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
        Ok(())
    }
}
