//! Pipeline runtime: activates a graph on the media engine and pumps its bus.
//!
//! One notification thread per active pipeline. It owns only the bus, a stop
//! flag and the sending halves of two channels: a bounded one for ordinary
//! events, which drops on overflow, and a single-slot one for the terminal
//! event, which never competes with them. The pipeline itself stays with the
//! [`RuntimeHandle`].

use crate::defaults;
use crate::error::{DoorbellError, Result};
use crate::stream::engine::{BusMessage, EnginePipeline, EngineState, MediaEngine, PipelineBus};
use crate::stream::graph::PipelineGraph;
use crate::worker;
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Sleep between checks in [`RuntimeHandle::next_event_timeout`].
const EVENT_WAIT_POLL: Duration = Duration::from_millis(5);

/// Bus worker thread name.
pub const BUS_THREAD_NAME: &str = "doorbell-bus";

/// Asynchronous notification forwarded from the engine bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Engine error; carries the engine's message unchanged.
    Error(String),
    Warning(String),
    EndOfStream,
    /// Top-level pipeline state transition. Nested element transitions are
    /// never forwarded.
    StateChanged { old: EngineState, new: EngineState },
}

impl PipelineEvent {
    /// Error and end-of-stream end the notification loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::EndOfStream)
    }
}

/// Callback invoked on the bus thread for every forwarded event.
///
/// Must not block and must not call back into the runtime.
pub type EventObserver = Arc<dyn Fn(&PipelineEvent) + Send + Sync>;

/// Runtime tuning.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Single bus pop timeout; bounds how quickly the worker sees a stop.
    pub poll_interval: Duration,
    /// Upper bound on joining the bus worker.
    pub teardown_timeout: Duration,
    pub event_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: defaults::BUS_POLL_INTERVAL,
            teardown_timeout: defaults::TEARDOWN_TIMEOUT,
            event_capacity: defaults::EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Turns graphs into running engine pipelines.
pub struct PipelineRuntime {
    engine: Arc<dyn MediaEngine>,
    config: RuntimeConfig,
    observer: Option<EventObserver>,
}

impl PipelineRuntime {
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self {
            engine,
            config: RuntimeConfig::default(),
            observer: None,
        }
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a callback that sees every event as it leaves the bus.
    pub fn with_observer(mut self, observer: EventObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn engine(&self) -> &Arc<dyn MediaEngine> {
        &self.engine
    }

    /// Realizes `graph`, requests playing and starts the notification loop.
    ///
    /// On any failure after construction the partially built pipeline is
    /// forced to null before the error is returned, so nothing leaks.
    pub fn activate(&self, graph: &PipelineGraph) -> Result<RuntimeHandle> {
        graph.validate()?;
        let launch = graph.to_launch();
        debug!(launch = %launch, "Constructing pipeline");

        let mut pipeline = self.engine.construct(graph)?;
        let name = pipeline.name();

        if let Err(e) = pipeline.set_playing() {
            release(pipeline.as_mut(), &name);
            return Err(as_activation(e));
        }

        let bus = match pipeline.bus() {
            Ok(bus) => bus,
            Err(e) => {
                release(pipeline.as_mut(), &name);
                return Err(as_activation(e));
            }
        };

        let (event_tx, event_rx) = bounded(self.config.event_capacity);
        let (terminal_tx, terminal_rx) = bounded(1);
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let stop = stop.clone();
            let observer = self.observer.clone();
            let poll_interval = self.config.poll_interval;
            let pipeline_name = name.clone();
            thread::Builder::new()
                .name(BUS_THREAD_NAME.to_string())
                .spawn(move || {
                    run_notification_loop(
                        bus,
                        &pipeline_name,
                        &stop,
                        &event_tx,
                        &terminal_tx,
                        observer.as_deref(),
                        poll_interval,
                    )
                })
        };

        let worker = match worker {
            Ok(worker) => worker,
            Err(e) => {
                release(pipeline.as_mut(), &name);
                return Err(DoorbellError::Activation {
                    message: format!("failed to spawn bus thread: {e}"),
                });
            }
        };

        info!(pipeline = %name, "Pipeline playing");
        Ok(RuntimeHandle {
            pipeline: Some(pipeline),
            name,
            launch,
            stop,
            worker: Some(worker),
            events: event_rx,
            terminal: terminal_rx,
            teardown_timeout: self.config.teardown_timeout,
        })
    }

    /// Tears down `handle`. See [`RuntimeHandle::deactivate`].
    pub fn deactivate(&self, handle: RuntimeHandle) -> Result<()> {
        handle.deactivate()
    }
}

fn as_activation(error: DoorbellError) -> DoorbellError {
    match error {
        DoorbellError::Activation { .. } => error,
        other => DoorbellError::Activation {
            message: other.to_string(),
        },
    }
}

fn release(pipeline: &mut dyn EnginePipeline, name: &str) {
    if let Err(e) = pipeline.set_null() {
        warn!(pipeline = %name, error = %e, "Failed to force pipeline to null");
    }
}

fn run_notification_loop(
    bus: Box<dyn PipelineBus>,
    pipeline_name: &str,
    stop: &AtomicBool,
    events: &Sender<PipelineEvent>,
    terminal: &Sender<PipelineEvent>,
    observer: Option<&(dyn Fn(&PipelineEvent) + Send + Sync)>,
    poll_interval: Duration,
) {
    debug!(pipeline = %pipeline_name, "Bus worker started");

    while !stop.load(Ordering::SeqCst) {
        let Some(message) = bus.pop(poll_interval) else {
            continue;
        };

        let event = match message {
            BusMessage::Error {
                source,
                message,
                debug: detail,
            } => {
                error!(source = %source, debug = detail.as_deref().unwrap_or(""), "{message}");
                PipelineEvent::Error(message)
            }
            BusMessage::Warning {
                source,
                message,
                debug: detail,
            } => {
                warn!(source = %source, debug = detail.as_deref().unwrap_or(""), "{message}");
                PipelineEvent::Warning(message)
            }
            BusMessage::EndOfStream => {
                info!(pipeline = %pipeline_name, "End of stream");
                PipelineEvent::EndOfStream
            }
            BusMessage::StateChanged { source, old, new } if source == pipeline_name => {
                debug!(pipeline = %pipeline_name, "State changed: {old} -> {new}");
                PipelineEvent::StateChanged { old, new }
            }
            BusMessage::StateChanged { .. } | BusMessage::Other => continue,
        };

        let is_terminal = event.is_terminal();
        if let Some(observer) = observer {
            observer(&event);
        }

        if is_terminal {
            stop.store(true, Ordering::SeqCst);
            // The slot is only ever filled once.
            if terminal.try_send(event).is_err() {
                warn!(pipeline = %pipeline_name, "Terminal event not delivered");
            }
            break;
        }

        match events.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(dropped)) => {
                debug!(pipeline = %pipeline_name, ?dropped, "Event channel full, dropping");
            }
        }
    }

    debug!(pipeline = %pipeline_name, "Bus worker exiting");
}

/// Exclusive handle to one active pipeline.
///
/// Dropping the handle tears the pipeline down; prefer
/// [`RuntimeHandle::deactivate`] to observe the outcome.
pub struct RuntimeHandle {
    pipeline: Option<Box<dyn EnginePipeline>>,
    name: String,
    launch: String,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    events: Receiver<PipelineEvent>,
    terminal: Receiver<PipelineEvent>,
    teardown_timeout: Duration,
}

impl RuntimeHandle {
    pub fn pipeline_name(&self) -> &str {
        &self.name
    }

    /// Launch description the pipeline was built from.
    pub fn launch_description(&self) -> &str {
        &self.launch
    }

    /// Next pending event, if any.
    ///
    /// Ordinary events come first, in bus order; the terminal event follows
    /// once they are drained. It is delivered even when ordinary events were
    /// dropped on overflow. Returns `Err(())` once the bus worker has exited
    /// and every event it sent has been consumed.
    #[allow(clippy::result_unit_err)]
    pub fn try_next_event(&self) -> std::result::Result<Option<PipelineEvent>, ()> {
        let ordinary = match self.events.try_recv() {
            Ok(event) => return Ok(Some(event)),
            Err(e) => e,
        };
        match self.terminal.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Disconnected) if ordinary == TryRecvError::Disconnected => Err(()),
            Err(_) => Ok(None),
        }
    }

    /// Waits up to `timeout` for the next event.
    pub fn next_event_timeout(&self, timeout: Duration) -> Option<PipelineEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.try_next_event() {
                Ok(Some(event)) => return Some(event),
                Err(()) => return None,
                Ok(None) if Instant::now() >= deadline => return None,
                Ok(None) => thread::sleep(EVENT_WAIT_POLL),
            }
        }
    }

    /// True once the notification loop has stopped or been asked to.
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Forces the pipeline to null, stops the notification loop and waits
    /// for it up to the teardown timeout.
    ///
    /// The pipeline is released in every case. When the worker misses the
    /// deadline it is detached and [`DoorbellError::ShutdownTimeout`] is
    /// returned; callers treat that as a warning.
    pub fn deactivate(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        let mut pipeline = self.pipeline.take();
        if let Some(pipeline) = pipeline.as_mut() {
            release(pipeline.as_mut(), &self.name);
        }
        self.stop.store(true, Ordering::SeqCst);

        let joined = match self.worker.take() {
            Some(handle) if worker::is_current(&handle) => {
                debug!(pipeline = %self.name, "Teardown from bus worker, skipping join");
                Ok(())
            }
            Some(handle) => {
                worker::join_bounded(handle, self.teardown_timeout, "Bus worker").map(|_| ())
            }
            None => Ok(()),
        };

        drop(pipeline);
        debug!(pipeline = %self.name, "Pipeline released");
        joined
    }
}

impl Drop for RuntimeHandle {
    fn drop(&mut self) {
        if (self.pipeline.is_some() || self.worker.is_some())
            && let Err(e) = self.teardown()
        {
            warn!("{e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::builder;
    use crate::stream::config::StreamConfig;
    use crate::stream::mock::MockEngine;
    use std::sync::Mutex;

    fn graph() -> PipelineGraph {
        builder::build(&StreamConfig::default()).unwrap().graph
    }

    fn fast_config() -> RuntimeConfig {
        RuntimeConfig {
            poll_interval: Duration::from_millis(10),
            teardown_timeout: Duration::from_millis(500),
            event_capacity: 8,
        }
    }

    #[test]
    fn test_activate_plays_and_deactivate_releases() {
        let engine = Arc::new(MockEngine::new());
        let runtime = PipelineRuntime::new(engine.clone()).with_config(fast_config());

        let handle = runtime.activate(&graph()).unwrap();
        assert_eq!(engine.activations(), 1);
        assert_eq!(engine.last_launch().as_deref(), Some(graph().to_launch().as_str()));

        runtime.deactivate(handle).unwrap();
        assert_eq!(engine.releases(), 1);
    }

    #[test]
    fn test_only_top_level_state_changes_are_forwarded() {
        let engine = Arc::new(MockEngine::new());
        let runtime = PipelineRuntime::new(engine.clone()).with_config(fast_config());
        let handle = runtime.activate(&graph()).unwrap();

        let event = handle.next_event_timeout(Duration::from_secs(1));
        assert_eq!(
            event,
            Some(PipelineEvent::StateChanged {
                old: EngineState::Paused,
                new: EngineState::Playing,
            })
        );
        // The nested element transition the mock also posts never shows up.
        assert_eq!(handle.next_event_timeout(Duration::from_millis(100)), None);

        handle.deactivate().unwrap();
    }

    #[test]
    fn test_error_event_carries_engine_message_and_stops_loop() {
        let engine = Arc::new(MockEngine::new());
        let runtime = PipelineRuntime::new(engine.clone()).with_config(fast_config());
        let handle = runtime.activate(&graph()).unwrap();

        engine.post(BusMessage::Error {
            source: "src".to_string(),
            message: "Could not open resource for reading".to_string(),
            debug: None,
        });

        let mut seen = None;
        for _ in 0..10 {
            match handle.next_event_timeout(Duration::from_millis(200)) {
                Some(PipelineEvent::Error(message)) => {
                    seen = Some(message);
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        assert_eq!(seen.as_deref(), Some("Could not open resource for reading"));
        assert!(handle.stop_requested());
        handle.deactivate().unwrap();
    }

    #[test]
    fn test_error_survives_warning_flood() {
        let engine = Arc::new(MockEngine::new());
        let runtime = PipelineRuntime::new(engine.clone()).with_config(fast_config());
        let handle = runtime.activate(&graph()).unwrap();

        for i in 0..80 {
            engine.post(BusMessage::Warning {
                source: "x264enc0".to_string(),
                message: format!("encoder is late ({i})"),
                debug: None,
            });
        }
        engine.post_error("Could not connect to server");

        // Drain until the worker is gone; the error must be the last event.
        let mut last = None;
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            match handle.try_next_event() {
                Ok(Some(event)) => last = Some(event),
                Ok(None) => thread::sleep(Duration::from_millis(5)),
                Err(()) => break,
            }
        }

        assert!(handle.stop_requested());
        assert_eq!(
            last,
            Some(PipelineEvent::Error("Could not connect to server".to_string()))
        );
        handle.deactivate().unwrap();
    }

    #[test]
    fn test_disconnect_reported_after_terminal_event_consumed() {
        let engine = Arc::new(MockEngine::new());
        let runtime = PipelineRuntime::new(engine.clone()).with_config(fast_config());
        let handle = runtime.activate(&graph()).unwrap();

        engine.post(BusMessage::EndOfStream);
        let mut saw_eos = false;
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            match handle.try_next_event() {
                Ok(Some(PipelineEvent::EndOfStream)) => saw_eos = true,
                Ok(_) => thread::sleep(Duration::from_millis(5)),
                Err(()) => break,
            }
        }

        assert!(saw_eos);
        assert_eq!(handle.try_next_event(), Err(()));
        handle.deactivate().unwrap();
    }

    #[test]
    fn test_activation_failure_releases_pipeline() {
        let engine = Arc::new(MockEngine::new().with_activation_failure("no route to host"));
        let runtime = PipelineRuntime::new(engine.clone()).with_config(fast_config());

        let err = runtime.activate(&graph()).err().unwrap();
        assert!(matches!(err, DoorbellError::Activation { .. }));
        assert!(err.to_string().contains("no route to host"));
        assert_eq!(engine.releases(), 1);
    }

    #[test]
    fn test_construction_failure_is_reported() {
        let engine = Arc::new(MockEngine::new().with_construction_failure("no element x264enc"));
        let runtime = PipelineRuntime::new(engine.clone());

        let err = runtime.activate(&graph()).err().unwrap();
        assert!(matches!(err, DoorbellError::PipelineConstruction { .. }));
        assert_eq!(engine.activations(), 0);
    }

    #[test]
    fn test_malformed_graph_is_rejected_before_engine() {
        let engine = Arc::new(MockEngine::new());
        let runtime = PipelineRuntime::new(engine.clone());

        let err = runtime.activate(&PipelineGraph::new(Vec::new())).err().unwrap();
        assert!(matches!(err, DoorbellError::PipelineConstruction { .. }));
        assert_eq!(engine.constructions(), 0);
    }

    #[test]
    fn test_stuck_bus_worker_is_detached_after_deadline() {
        let engine = Arc::new(MockEngine::new().with_stuck_bus(Duration::from_secs(3)));
        let runtime = PipelineRuntime::new(engine.clone()).with_config(RuntimeConfig {
            teardown_timeout: Duration::from_millis(200),
            ..fast_config()
        });
        let handle = runtime.activate(&graph()).unwrap();
        // Give the worker time to enter the blocking pop.
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        let err = runtime.deactivate(handle).unwrap_err();
        assert!(matches!(err, DoorbellError::ShutdownTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(engine.releases(), 1);
    }

    #[test]
    fn test_observer_sees_forwarded_events() {
        let seen: Arc<Mutex<Vec<PipelineEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let engine = Arc::new(MockEngine::new());
        let runtime = PipelineRuntime::new(engine.clone())
            .with_config(fast_config())
            .with_observer(Arc::new(move |event| {
                sink.lock().unwrap().push(event.clone());
            }));

        let handle = runtime.activate(&graph()).unwrap();
        engine.post(BusMessage::EndOfStream);
        let _ = handle.next_event_timeout(Duration::from_secs(1));
        let _ = handle.next_event_timeout(Duration::from_secs(1));
        handle.deactivate().unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.contains(&PipelineEvent::EndOfStream));
    }

    #[test]
    fn test_dropping_handle_releases_pipeline() {
        let engine = Arc::new(MockEngine::new());
        let runtime = PipelineRuntime::new(engine.clone()).with_config(fast_config());
        let handle = runtime.activate(&graph()).unwrap();
        drop(handle);
        assert_eq!(engine.releases(), 1);
    }

    #[test]
    fn test_terminal_events_are_terminal() {
        assert!(PipelineEvent::Error("x".to_string()).is_terminal());
        assert!(PipelineEvent::EndOfStream.is_terminal());
        assert!(!PipelineEvent::Warning("x".to_string()).is_terminal());
    }
}
