//! Audio device seams for the intercom.
//!
//! Devices are opened and driven from a single worker thread, so they only
//! need to be `Send`.

use crate::error::{DoorbellError, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// One chunk of 16 kHz mono PCM.
pub type AudioChunk = Vec<i16>;

/// Microphone side.
pub trait CaptureDevice: Send {
    fn open(&mut self) -> Result<()>;

    /// Next chunk, or `None` if nothing arrived within `timeout`.
    fn read_chunk(&mut self, timeout: Duration) -> Result<Option<AudioChunk>>;

    fn close(&mut self) -> Result<()>;
}

/// Speaker side.
pub trait PlaybackDevice: Send {
    fn open(&mut self) -> Result<()>;

    fn write_chunk(&mut self, samples: &[i16]) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scripted capture device for tests.
///
/// Hands out the configured chunks in order, then either repeats the last
/// one (`with_repeat`) or reports silence until closed.
#[derive(Debug, Clone, Default)]
pub struct MockCaptureDevice {
    chunks: Arc<Mutex<VecDeque<AudioChunk>>>,
    repeat: Option<AudioChunk>,
    fail_open: bool,
    chunk_delay: Duration,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl MockCaptureDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunks(self, chunks: Vec<AudioChunk>) -> Self {
        *lock(&self.chunks) = chunks.into();
        self
    }

    /// Produce `chunk` forever once the scripted chunks run out.
    pub fn with_repeat(mut self, chunk: AudioChunk) -> Self {
        self.repeat = Some(chunk);
        self
    }

    /// Sleep this long before each produced chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn with_open_failure(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl CaptureDevice for MockCaptureDevice {
    fn open(&mut self) -> Result<()> {
        if self.fail_open {
            return Err(DoorbellError::AudioDeviceNotFound {
                device: "mock capture".to_string(),
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_chunk(&mut self, timeout: Duration) -> Result<Option<AudioChunk>> {
        let next = lock(&self.chunks).pop_front().or_else(|| self.repeat.clone());
        match next {
            Some(chunk) => {
                if !self.chunk_delay.is_zero() {
                    thread::sleep(self.chunk_delay);
                }
                Ok(Some(chunk))
            }
            None => {
                thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Recording playback device for tests. Clones share the written log.
#[derive(Debug, Clone, Default)]
pub struct MockPlaybackDevice {
    written: Arc<Mutex<Vec<AudioChunk>>>,
    fail_open: bool,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl MockPlaybackDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_open_failure(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Every chunk written so far, in order.
    pub fn written(&self) -> Vec<AudioChunk> {
        lock(&self.written).clone()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl PlaybackDevice for MockPlaybackDevice {
    fn open(&mut self) -> Result<()> {
        if self.fail_open {
            return Err(DoorbellError::AudioDeviceNotFound {
                device: "mock playback".to_string(),
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write_chunk(&mut self, samples: &[i16]) -> Result<()> {
        lock(&self.written).push(samples.to_vec());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
