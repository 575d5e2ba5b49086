//! Process-termination signals mapped to a shutdown flag.

use crate::error::{DoorbellError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Flag that the process-wide handler currently signals.
static SIGNAL_TARGET: Mutex<Option<ShutdownFlag>> = Mutex::new(None);

/// Set once our handler owns SIGINT/SIGTERM.
static HANDLER_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Shared graceful-shutdown request flag.
///
/// Set once; later requests are reported but change nothing.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Returns true only for the first request.
    pub fn request(&self) -> bool {
        !self.requested.swap(true, Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Routes SIGINT and SIGTERM to [`ShutdownFlag::request`] on this flag.
    ///
    /// The handler is installed once per process. Later calls point it at
    /// the calling flag instead and return `Ok(false)`. If some other code
    /// already owns the signals nothing is routed and a warning is logged.
    pub fn install_signal_handlers(&self) -> Result<bool> {
        *SIGNAL_TARGET.lock().unwrap_or_else(PoisonError::into_inner) = Some(self.clone());

        match ctrlc::set_handler(forward_signal) {
            Ok(()) => {
                HANDLER_INSTALLED.store(true, Ordering::SeqCst);
                Ok(true)
            }
            Err(ctrlc::Error::MultipleHandlers) => {
                if HANDLER_INSTALLED.load(Ordering::SeqCst) {
                    debug!("Signal handler retargeted to new shutdown flag");
                } else {
                    warn!("Another signal handler is installed, Ctrl+C will not stop the service");
                }
                Ok(false)
            }
            Err(e) => Err(DoorbellError::Other(format!(
                "failed to install signal handler: {e}"
            ))),
        }
    }
}

fn forward_signal() {
    let target = SIGNAL_TARGET
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    match target {
        Some(flag) if flag.request() => info!("Shutdown signal received"),
        Some(_) => debug!("Shutdown already in progress"),
        None => debug!("Signal received with no shutdown flag registered"),
    }
}
