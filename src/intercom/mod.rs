//! Two-way audio for the doorbell intercom.
//!
//! Captured microphone chunks land in a bounded queue (or go straight to a
//! callback); chunks queued for the speaker are drained by a playback
//! worker. Both queues drop on overflow instead of blocking the producer.

pub mod device;

#[cfg(feature = "cpal-audio")]
pub mod cpal_backend;

pub use device::{
    AudioChunk, CaptureDevice, MockCaptureDevice, MockPlaybackDevice, PlaybackDevice,
};

#[cfg(feature = "cpal-audio")]
pub use cpal_backend::{CpalCapture, CpalPlayback};

use crate::defaults;
use crate::error::{DoorbellError, Result};
use crate::worker;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long a worker blocks on its device or queue before rechecking the
/// running flag.
const WORKER_POLL: Duration = Duration::from_millis(100);

/// Back-off after a device error inside a worker loop.
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Receives every captured chunk on the capture thread.
pub type AudioCallback = Box<dyn FnMut(AudioChunk) + Send>;

/// A running worker. The thread hands its device back when it exits.
struct Worker<D> {
    running: Arc<AtomicBool>,
    handle: JoinHandle<Option<D>>,
}

impl<D> Worker<D> {
    fn stop(self, timeout: Duration, what: &str) -> Option<D> {
        self.running.store(false, Ordering::SeqCst);
        match worker::join_bounded(self.handle, timeout, what) {
            Ok(device) => device.flatten(),
            Err(e) => {
                warn!("{e}");
                None
            }
        }
    }
}

/// Spawns `run` on a named thread that owns `device` until it returns.
///
/// If the thread cannot be created the device comes back with the error.
fn spawn_worker<D, F>(
    name: &str,
    stack_size: Option<usize>,
    device: D,
    run: F,
) -> std::result::Result<Worker<D>, (Option<D>, io::Error)>
where
    D: Send + 'static,
    F: FnOnce(D, &AtomicBool) -> D + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(true));
    let slot = Arc::new(Mutex::new(Some(device)));

    let flag = running.clone();
    let handed = slot.clone();
    let mut builder = thread::Builder::new().name(name.to_string());
    if let Some(size) = stack_size {
        builder = builder.stack_size(size);
    }

    let spawned = builder.spawn(move || {
        let device = handed.lock().unwrap_or_else(PoisonError::into_inner).take()?;
        Some(run(device, &flag))
    });

    match spawned {
        Ok(handle) => Ok(Worker { running, handle }),
        Err(e) => {
            let device = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            Err((device, e))
        }
    }
}

/// Microphone capture and speaker playback queues.
pub struct AudioManager {
    capture_device: Option<Box<dyn CaptureDevice>>,
    playback_device: Option<Box<dyn PlaybackDevice>>,
    capture: Option<Worker<Box<dyn CaptureDevice>>>,
    playback: Option<Worker<Box<dyn PlaybackDevice>>>,
    captured_tx: Sender<AudioChunk>,
    captured_rx: Receiver<AudioChunk>,
    playback_tx: Sender<AudioChunk>,
    playback_rx: Receiver<AudioChunk>,
    join_timeout: Duration,
    worker_stack_size: Option<usize>,
}

impl AudioManager {
    pub fn new(capture: Box<dyn CaptureDevice>, playback: Box<dyn PlaybackDevice>) -> Self {
        let (captured_tx, captured_rx) = bounded(defaults::AUDIO_QUEUE_CAPACITY);
        let (playback_tx, playback_rx) = bounded(defaults::AUDIO_QUEUE_CAPACITY);
        info!("Audio manager initialized");
        Self {
            capture_device: Some(capture),
            playback_device: Some(playback),
            capture: None,
            playback: None,
            captured_tx,
            captured_rx,
            playback_tx,
            playback_rx,
            join_timeout: defaults::TEARDOWN_TIMEOUT,
            worker_stack_size: None,
        }
    }

    /// Default cpal microphone and speaker.
    #[cfg(feature = "cpal-audio")]
    pub fn with_default_devices() -> Self {
        Self::new(
            Box::new(CpalCapture::new(None)),
            Box::new(CpalPlayback::new(None)),
        )
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_some()
    }

    /// Starts capturing into the queue read by [`get_audio`](Self::get_audio).
    pub fn start_capture(&mut self) -> Result<()> {
        self.spawn_capture(None)
    }

    /// Starts capturing, handing each chunk to `callback` instead of the queue.
    pub fn start_capture_with_callback(&mut self, callback: AudioCallback) -> Result<()> {
        self.spawn_capture(Some(callback))
    }

    fn spawn_capture(&mut self, callback: Option<AudioCallback>) -> Result<()> {
        if self.capture.is_some() {
            warn!("Already capturing audio");
            return Ok(());
        }

        let mut device = self.capture_device.take().ok_or_else(|| DoorbellError::AudioStream {
            message: "capture device lost after a stuck worker".to_string(),
        })?;

        if let Err(e) = device.open() {
            error!("Failed to start audio capture: {e}");
            self.capture_device = Some(device);
            return Err(e);
        }

        let queue = self.captured_tx.clone();
        let spawned = spawn_worker(
            "doorbell-audio-capture",
            self.worker_stack_size,
            device,
            move |device, running| capture_loop(device, running, &queue, callback),
        );

        match spawned {
            Ok(worker) => {
                self.capture = Some(worker);
                info!("Audio capture started");
                Ok(())
            }
            Err((device, e)) => {
                error!("Failed to spawn capture thread: {e}");
                self.capture_device = device.map(|mut device| {
                    if let Err(e) = device.close() {
                        warn!("Failed to close capture device: {e}");
                    }
                    device
                });
                Err(DoorbellError::AudioStream {
                    message: format!("failed to spawn capture thread: {e}"),
                })
            }
        }
    }

    pub fn stop_capture(&mut self) {
        let Some(capture) = self.capture.take() else {
            return;
        };
        info!("Stopping audio capture...");
        self.capture_device = capture.stop(self.join_timeout, "Audio capture worker");
        info!("Audio capture stopped");
    }

    pub fn start_playback(&mut self) -> Result<()> {
        if self.playback.is_some() {
            warn!("Already playing audio");
            return Ok(());
        }

        let mut device = self.playback_device.take().ok_or_else(|| DoorbellError::AudioStream {
            message: "playback device lost after a stuck worker".to_string(),
        })?;

        if let Err(e) = device.open() {
            error!("Failed to start audio playback: {e}");
            self.playback_device = Some(device);
            return Err(e);
        }

        let queue = self.playback_rx.clone();
        let spawned = spawn_worker(
            "doorbell-audio-playback",
            self.worker_stack_size,
            device,
            move |device, running| playback_loop(device, running, &queue),
        );

        match spawned {
            Ok(worker) => {
                self.playback = Some(worker);
                info!("Audio playback started");
                Ok(())
            }
            Err((device, e)) => {
                error!("Failed to spawn playback thread: {e}");
                self.playback_device = device.map(|mut device| {
                    if let Err(e) = device.close() {
                        warn!("Failed to close playback device: {e}");
                    }
                    device
                });
                Err(DoorbellError::AudioStream {
                    message: format!("failed to spawn playback thread: {e}"),
                })
            }
        }
    }

    pub fn stop_playback(&mut self) {
        let Some(playback) = self.playback.take() else {
            return;
        };
        info!("Stopping audio playback...");
        self.playback_device = playback.stop(self.join_timeout, "Audio playback worker");
        info!("Audio playback stopped");
    }

    /// Queues a chunk for the speaker. Returns false if the queue was full
    /// and the chunk was dropped.
    pub fn queue_audio(&self, chunk: AudioChunk) -> bool {
        match self.playback_tx.try_send(chunk) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Playback queue full, dropping audio");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Next captured chunk, waiting at most `timeout`.
    pub fn get_audio(&self, timeout: Duration) -> Option<AudioChunk> {
        self.captured_rx.recv_timeout(timeout).ok()
    }

    /// Stops both directions.
    pub fn cleanup(&mut self) {
        if self.capture.is_none() && self.playback.is_none() {
            return;
        }
        info!("Cleaning up audio manager...");
        self.stop_capture();
        self.stop_playback();
        info!("Audio manager cleaned up");
    }
}

impl Drop for AudioManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn capture_loop(
    mut device: Box<dyn CaptureDevice>,
    running: &AtomicBool,
    queue: &Sender<AudioChunk>,
    mut callback: Option<AudioCallback>,
) -> Box<dyn CaptureDevice> {
    debug!("Capture loop started");

    while running.load(Ordering::SeqCst) {
        match device.read_chunk(WORKER_POLL) {
            Ok(Some(chunk)) => match callback.as_mut() {
                Some(callback) => callback(chunk),
                None => {
                    if let Err(TrySendError::Full(_)) = queue.try_send(chunk) {
                        warn!("Audio queue full, dropping frame");
                    }
                }
            },
            Ok(None) => {}
            Err(e) => {
                error!("Error in capture loop: {e}");
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    if let Err(e) = device.close() {
        warn!("Failed to close capture device: {e}");
    }
    debug!("Capture loop stopped");
    device
}

fn playback_loop(
    mut device: Box<dyn PlaybackDevice>,
    running: &AtomicBool,
    queue: &Receiver<AudioChunk>,
) -> Box<dyn PlaybackDevice> {
    debug!("Playback loop started");

    while running.load(Ordering::SeqCst) {
        match queue.recv_timeout(WORKER_POLL) {
            Ok(chunk) => {
                if let Err(e) = device.write_chunk(&chunk) {
                    error!("Error in playback loop: {e}");
                    thread::sleep(ERROR_BACKOFF);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if let Err(e) = device.close() {
        warn!("Failed to close playback device: {e}");
    }
    debug!("Playback loop stopped");
    device
}
