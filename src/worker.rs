//! Bounded joins for background worker threads.

use crate::error::{DoorbellError, Result};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::warn;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Waits for `worker` until `timeout`, then detaches it.
///
/// Returns the thread's value, `Ok(None)` if it panicked (logged), or
/// [`DoorbellError::ShutdownTimeout`] once the deadline passes. A detached
/// thread dies with the process.
pub fn join_bounded<T>(worker: JoinHandle<T>, timeout: Duration, what: &str) -> Result<Option<T>> {
    let started = Instant::now();
    let deadline = started + timeout;

    loop {
        if worker.is_finished() {
            return match worker.join() {
                Ok(value) => Ok(Some(value)),
                Err(panic_info) => {
                    let msg = panic_info
                        .downcast_ref::<&str>()
                        .copied()
                        .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
                        .unwrap_or("unknown panic");
                    warn!("{what} panicked: {msg}");
                    Ok(None)
                }
            };
        }

        if Instant::now() >= deadline {
            return Err(DoorbellError::ShutdownTimeout {
                waited_ms: started.elapsed().as_millis() as u64,
                message: format!("{what} still running, detached"),
            });
        }

        thread::sleep(JOIN_POLL_INTERVAL);
    }
}

/// True when called on `worker`'s own thread, where a join would deadlock.
pub fn is_current<T>(worker: &JoinHandle<T>) -> bool {
    worker.thread().id() == thread::current().id()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_join_returns_value() {
        let worker = thread::spawn(|| 42);
        let value = join_bounded(worker, Duration::from_secs(1), "worker").unwrap();
        assert_eq!(value, Some(42));
    }

    #[test]
    fn test_join_reports_panic_as_none() {
        let worker = thread::spawn(|| -> u8 { panic!("boom") });
        let value = join_bounded(worker, Duration::from_secs(1), "worker").unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn test_stuck_thread_times_out() {
        let release = Arc::new(AtomicBool::new(false));
        let flag = release.clone();
        let worker = thread::spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
        });

        let started = Instant::now();
        let err = join_bounded(worker, Duration::from_millis(100), "stuck worker").unwrap_err();

        assert!(matches!(err, DoorbellError::ShutdownTimeout { .. }));
        assert!(err.to_string().contains("stuck worker"));
        assert!(started.elapsed() < Duration::from_secs(1));
        release.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_is_current_detects_own_thread() {
        let worker = thread::spawn(|| thread::sleep(Duration::from_millis(20)));
        assert!(!is_current(&worker));
        let _ = worker.join();
    }
}
