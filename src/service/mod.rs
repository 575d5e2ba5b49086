//! Service coordinator: sequences subsystems, owns the media engine
//! lifetime and runs the supervisory loop until shutdown.

pub mod signals;
pub mod status;

pub use signals::ShutdownFlag;
pub use status::{ServiceState, ServiceStatus, SubsystemStatus};

use crate::defaults;
use crate::error::{DoorbellError, Result};
use crate::stream::config::StreamConfig;
use crate::stream::engine::MediaEngine;
use crate::stream::runtime::PipelineRuntime;
use crate::stream::supervisor::{StreamState, StreamSupervisor};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{Level, debug, error, info, warn};

/// A unit the coordinator starts, watches and stops.
pub trait Subsystem: Send {
    fn name(&self) -> &'static str;

    fn start(&mut self) -> Result<()>;

    /// Must be safe to call repeatedly and after a failed start.
    fn stop(&mut self);

    /// Returns [`DoorbellError::RuntimeFault`] once the subsystem has faulted.
    fn check(&mut self) -> Result<()>;

    fn status(&mut self) -> SubsystemStatus;
}

/// The camera stream as a coordinator subsystem.
pub struct StreamSubsystem {
    supervisor: StreamSupervisor,
    config: StreamConfig,
}

impl StreamSubsystem {
    pub const NAME: &'static str = "camera";

    pub fn new(supervisor: StreamSupervisor, config: StreamConfig) -> Self {
        Self { supervisor, config }
    }

    pub fn supervisor(&self) -> &StreamSupervisor {
        &self.supervisor
    }
}

impl Subsystem for StreamSubsystem {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn start(&mut self) -> Result<()> {
        self.supervisor.start(self.config.clone())
    }

    fn stop(&mut self) {
        self.supervisor.stop();
    }

    fn check(&mut self) -> Result<()> {
        match self.supervisor.poll() {
            StreamState::Failed => Err(DoorbellError::RuntimeFault {
                detail: self
                    .supervisor
                    .last_fault()
                    .unwrap_or("stream failed")
                    .to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn status(&mut self) -> SubsystemStatus {
        let stats = self.supervisor.get_stats();
        SubsystemStatus {
            name: Self::NAME.to_string(),
            state: self.supervisor.state().to_string(),
            running: stats.running,
            fault: self.supervisor.last_fault().map(str::to_string),
            details: serde_json::to_value(&stats).unwrap_or_default(),
        }
    }
}

/// Optional subsystems as configured; reported in status only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnabledFeatures {
    pub audio: bool,
    pub button: bool,
    pub matter: bool,
    pub substream: bool,
}

/// Why [`ServiceCoordinator::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// A signal or [`ShutdownFlag::request`] asked for shutdown.
    ShutdownRequested,
    /// A subsystem faulted after startup.
    SubsystemFailed { subsystem: String, detail: String },
}

pub struct ServiceCoordinator {
    engine: Arc<dyn MediaEngine>,
    engine_initialized: bool,
    subsystems: Vec<Box<dyn Subsystem>>,
    state: ServiceState,
    started_at: Option<Instant>,
    features: EnabledFeatures,
    shutdown: ShutdownFlag,
    poll_interval: Duration,
    install_signal_handlers: bool,
}

impl ServiceCoordinator {
    /// A coordinator with no subsystems.
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self {
            engine,
            engine_initialized: false,
            subsystems: Vec::new(),
            state: ServiceState::Stopped,
            started_at: None,
            features: EnabledFeatures::default(),
            shutdown: ShutdownFlag::new(),
            poll_interval: defaults::SUPERVISOR_TICK,
            install_signal_handlers: true,
        }
    }

    /// The doorbell service: one camera stream on `engine`.
    pub fn for_stream(engine: Arc<dyn MediaEngine>, config: StreamConfig) -> Self {
        let supervisor = StreamSupervisor::new(PipelineRuntime::new(engine.clone()));
        Self::new(engine).with_subsystem(Box::new(StreamSubsystem::new(supervisor, config)))
    }

    /// Appends a subsystem; subsystems start in insertion order.
    pub fn with_subsystem(mut self, subsystem: Box<dyn Subsystem>) -> Self {
        self.subsystems.push(subsystem);
        self
    }

    pub fn with_features(mut self, features: EnabledFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Whether [`ServiceCoordinator::run`] installs SIGINT/SIGTERM handlers.
    pub fn with_signal_handlers(mut self, install: bool) -> Self {
        self.install_signal_handlers = install;
        self
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// Handle for requesting shutdown from another thread.
    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Initializes the engine and starts every subsystem in order.
    ///
    /// On the first failure everything is stopped in reverse order, the state
    /// is left at [`ServiceState::Error`] and that failure is returned.
    pub fn start(&mut self) -> Result<()> {
        if self.state == ServiceState::Running {
            warn!("Doorbell already running");
            return Ok(());
        }

        info!("Starting doorbell");
        self.state = ServiceState::Starting;

        if !self.engine_initialized {
            if let Err(e) = self.engine.initialize() {
                error!("Failed to initialize {}: {e}", self.engine.name());
                self.state = ServiceState::Error;
                return Err(e);
            }
            self.engine_initialized = true;
        }

        for index in 0..self.subsystems.len() {
            let subsystem = &mut self.subsystems[index];
            info!("Starting {}", subsystem.name());
            if let Err(e) = subsystem.start() {
                error!("Failed to start {}: {e}", subsystem.name());
                self.shutdown_subsystems(index + 1);
                self.release_engine();
                self.started_at = None;
                self.state = ServiceState::Error;
                return Err(e);
            }
        }

        self.started_at = Some(Instant::now());
        self.state = ServiceState::Running;
        info!("Doorbell started");
        Ok(())
    }

    /// Stops every subsystem in reverse start order and releases the engine.
    pub fn stop(&mut self) {
        if self.state == ServiceState::Stopped {
            return;
        }

        info!("Stopping doorbell");
        self.state = ServiceState::Stopping;
        self.shutdown_subsystems(self.subsystems.len());
        self.release_engine();
        self.started_at = None;
        self.state = ServiceState::Stopped;
        info!("Doorbell stopped");
    }

    fn shutdown_subsystems(&mut self, started: usize) {
        for subsystem in self.subsystems[..started].iter_mut().rev() {
            debug!("Stopping {}", subsystem.name());
            subsystem.stop();
        }
    }

    fn release_engine(&mut self) {
        if self.engine_initialized {
            self.engine.release();
            self.engine_initialized = false;
        }
    }

    /// Checks subsystems; on the first fault moves a running service to
    /// [`ServiceState::Error`] and returns which subsystem failed and why.
    fn refresh(&mut self) -> Option<(String, String)> {
        if self.state != ServiceState::Running {
            return None;
        }
        for subsystem in &mut self.subsystems {
            if let Err(e) = subsystem.check() {
                let detail = match e {
                    DoorbellError::RuntimeFault { detail } => detail,
                    other => other.to_string(),
                };
                error!("{} failed: {detail}", subsystem.name());
                self.state = ServiceState::Error;
                return Some((subsystem.name().to_string(), detail));
            }
        }
        None
    }

    /// Installs signal handlers, starts the service and supervises it until
    /// shutdown is requested or a subsystem faults. Always stops on the way
    /// out.
    pub fn run(&mut self) -> Result<RunOutcome> {
        if self.install_signal_handlers {
            self.shutdown.install_signal_handlers()?;
        }

        self.start()?;
        info!("Doorbell service is running, press Ctrl+C to stop");

        let outcome = loop {
            if self.shutdown.is_requested() {
                info!("Shutdown requested");
                break RunOutcome::ShutdownRequested;
            }
            if let Some((subsystem, detail)) = self.refresh() {
                break RunOutcome::SubsystemFailed { subsystem, detail };
            }
            if self.state != ServiceState::Running {
                break RunOutcome::ShutdownRequested;
            }
            if tracing::enabled!(Level::DEBUG) {
                debug!(status = %self.get_status().to_json(), "Status");
            }
            thread::sleep(self.poll_interval);
        };

        self.stop();
        Ok(outcome)
    }

    /// Aggregated snapshot. Never fails; subsystems are polled on the way.
    pub fn get_status(&mut self) -> ServiceStatus {
        self.refresh();
        let uptime_secs = match (self.state, self.started_at) {
            (ServiceState::Running | ServiceState::Error, Some(started)) => {
                started.elapsed().as_secs()
            }
            _ => 0,
        };

        ServiceStatus {
            state: self.state,
            uptime_secs,
            subsystems: self.subsystems.iter_mut().map(|s| s.status()).collect(),
            audio_enabled: self.features.audio,
            button_enabled: self.features.button,
            matter_enabled: self.features.matter,
            substream_enabled: self.features.substream,
        }
    }
}

impl Drop for ServiceCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::mock::MockEngine;
    use crate::stream::runtime::RuntimeConfig;
    use std::sync::Mutex;

    /// Records start/stop order into a shared log.
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_start: bool,
        fault: Option<String>,
    }

    impl Recorder {
        fn boxed(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Box<Self> {
            Box::new(Self {
                name,
                log: log.clone(),
                fail_start: false,
                fault: None,
            })
        }
    }

    impl Subsystem for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn start(&mut self) -> Result<()> {
            self.log.lock().unwrap().push(format!("start {}", self.name));
            if self.fail_start {
                return Err(DoorbellError::Activation {
                    message: format!("{} refused", self.name),
                });
            }
            Ok(())
        }

        fn stop(&mut self) {
            self.log.lock().unwrap().push(format!("stop {}", self.name));
        }

        fn check(&mut self) -> Result<()> {
            match &self.fault {
                Some(detail) => Err(DoorbellError::RuntimeFault {
                    detail: detail.clone(),
                }),
                None => Ok(()),
            }
        }

        fn status(&mut self) -> SubsystemStatus {
            SubsystemStatus {
                name: self.name.to_string(),
                state: "ok".to_string(),
                running: true,
                fault: None,
                details: serde_json::Value::Null,
            }
        }
    }

    fn camera(engine: &Arc<MockEngine>) -> Box<StreamSubsystem> {
        let runtime = PipelineRuntime::new(engine.clone()).with_config(RuntimeConfig {
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        });
        Box::new(StreamSubsystem::new(
            StreamSupervisor::new(runtime),
            StreamConfig::default(),
        ))
    }

    #[test]
    fn test_start_initializes_engine_once() {
        let engine = Arc::new(MockEngine::new());
        let mut coordinator = ServiceCoordinator::new(engine.clone()).with_subsystem(camera(&engine));

        coordinator.start().unwrap();
        coordinator.start().unwrap();

        assert_eq!(coordinator.state(), ServiceState::Running);
        assert_eq!(engine.initializations(), 1);
        assert_eq!(engine.activations(), 1);
    }

    #[test]
    fn test_stop_reverses_start_order_and_releases_engine() {
        let engine = Arc::new(MockEngine::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut coordinator = ServiceCoordinator::new(engine.clone())
            .with_subsystem(Recorder::boxed("a", &log))
            .with_subsystem(Recorder::boxed("b", &log));

        coordinator.start().unwrap();
        coordinator.stop();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["start a", "start b", "stop b", "stop a"]
        );
        assert_eq!(coordinator.state(), ServiceState::Stopped);
        assert_eq!(engine.shutdowns(), 1);
    }

    #[test]
    fn test_start_failure_stops_started_subsystems_and_errors() {
        let engine = Arc::new(MockEngine::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut failing = Recorder::boxed("b", &log);
        failing.fail_start = true;
        let mut coordinator = ServiceCoordinator::new(engine.clone())
            .with_subsystem(Recorder::boxed("a", &log))
            .with_subsystem(failing)
            .with_subsystem(Recorder::boxed("c", &log));

        let err = coordinator.start().unwrap_err();

        assert!(err.to_string().contains("b refused"));
        assert_eq!(coordinator.state(), ServiceState::Error);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start a", "start b", "stop b", "stop a"]
        );
        assert_eq!(engine.shutdowns(), 1);
    }

    #[test]
    fn test_engine_initialize_failure_is_propagated() {
        let engine = Arc::new(MockEngine::new().with_initialize_failure("no plugins"));
        let mut coordinator = ServiceCoordinator::new(engine.clone()).with_subsystem(camera(&engine));

        let err = coordinator.start().unwrap_err();

        assert!(matches!(err, DoorbellError::EngineUnavailable { .. }));
        assert_eq!(coordinator.state(), ServiceState::Error);
        assert_eq!(engine.constructions(), 0);
    }

    #[test]
    fn test_stop_when_stopped_is_noop() {
        let engine = Arc::new(MockEngine::new());
        let mut coordinator = ServiceCoordinator::new(engine.clone());
        coordinator.stop();
        assert_eq!(engine.shutdowns(), 0);
    }

    #[test]
    fn test_status_reports_features_and_camera() {
        let engine = Arc::new(MockEngine::new());
        let mut coordinator = ServiceCoordinator::new(engine.clone())
            .with_subsystem(camera(&engine))
            .with_features(EnabledFeatures {
                button: true,
                ..Default::default()
            });
        coordinator.start().unwrap();

        let status = coordinator.get_status();

        assert_eq!(status.state, ServiceState::Running);
        assert!(status.button_enabled);
        assert!(!status.audio_enabled);
        let camera = status.subsystem(StreamSubsystem::NAME).unwrap();
        assert!(camera.running);
        assert_eq!(camera.details["resolution"], "1920x1080");
    }

    #[test]
    fn test_status_when_stopped_has_zero_uptime() {
        let engine = Arc::new(MockEngine::new());
        let mut coordinator = ServiceCoordinator::new(engine.clone()).with_subsystem(camera(&engine));

        let status = coordinator.get_status();

        assert_eq!(status.state, ServiceState::Stopped);
        assert_eq!(status.uptime_secs, 0);
        assert!(!status.subsystems[0].running);
    }

    #[test]
    fn test_run_returns_on_shutdown_request() {
        let engine = Arc::new(MockEngine::new());
        let mut coordinator = ServiceCoordinator::new(engine.clone())
            .with_subsystem(camera(&engine))
            .with_signal_handlers(false)
            .with_poll_interval(Duration::from_millis(10));
        let flag = coordinator.shutdown_flag();

        let requester = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            flag.request();
        });
        let outcome = coordinator.run().unwrap();
        requester.join().unwrap();

        assert_eq!(outcome, RunOutcome::ShutdownRequested);
        assert_eq!(coordinator.state(), ServiceState::Stopped);
        assert_eq!(engine.releases(), 1);
    }

    #[test]
    fn test_run_exits_on_subsystem_fault() {
        let engine = Arc::new(MockEngine::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut faulty = Recorder::boxed("button", &log);
        faulty.fault = Some("gpio lost".to_string());
        let mut coordinator = ServiceCoordinator::new(engine)
            .with_subsystem(faulty)
            .with_signal_handlers(false)
            .with_poll_interval(Duration::from_millis(10));

        let outcome = coordinator.run().unwrap();

        assert_eq!(
            outcome,
            RunOutcome::SubsystemFailed {
                subsystem: "button".to_string(),
                detail: "gpio lost".to_string(),
            }
        );
        assert_eq!(coordinator.state(), ServiceState::Stopped);
    }

    #[test]
    fn test_run_propagates_start_failure() {
        let engine = Arc::new(MockEngine::new().with_activation_failure("sink refused"));
        let mut coordinator = ServiceCoordinator::new(engine.clone())
            .with_subsystem(camera(&engine))
            .with_signal_handlers(false);

        let err = coordinator.run().unwrap_err();

        assert!(matches!(err, DoorbellError::Activation { .. }));
        assert_eq!(coordinator.state(), ServiceState::Error);
    }
}
