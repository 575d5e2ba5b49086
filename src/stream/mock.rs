//! In-process media engine for tests and engine-less builds.
//!
//! Pipelines never touch real media; bus messages are injected with
//! [`MockEngine::post`].

use crate::error::{DoorbellError, Result};
use crate::stream::engine::{BusMessage, EnginePipeline, EngineState, MediaEngine, PipelineBus};
use crate::stream::graph::PipelineGraph;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Name of the nested element the mock posts state changes for.
pub const MOCK_NESTED_ELEMENT: &str = "videotestsrc0";

#[derive(Default)]
struct Counters {
    initializations: AtomicUsize,
    shutdowns: AtomicUsize,
    constructions: AtomicUsize,
    activations: AtomicUsize,
    releases: AtomicUsize,
    last_launch: Mutex<Option<String>>,
    bus_tx: Mutex<Option<Sender<BusMessage>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock media engine.
#[derive(Clone, Default)]
pub struct MockEngine {
    construction_failure: Option<String>,
    activation_failure: Option<String>,
    initialize_failure: Option<String>,
    stuck_bus: Option<Duration>,
    counters: Arc<Counters>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every `construct` call with `message`.
    pub fn with_construction_failure(mut self, message: &str) -> Self {
        self.construction_failure = Some(message.to_string());
        self
    }

    /// Fail every `set_playing` call with `message`.
    pub fn with_activation_failure(mut self, message: &str) -> Self {
        self.activation_failure = Some(message.to_string());
        self
    }

    /// Fail `initialize` with `message`.
    pub fn with_initialize_failure(mut self, message: &str) -> Self {
        self.initialize_failure = Some(message.to_string());
        self
    }

    /// Make bus pops block for `duration`, ignoring their timeout.
    pub fn with_stuck_bus(mut self, duration: Duration) -> Self {
        self.stuck_bus = Some(duration);
        self
    }

    /// Injects `message` into the bus of the most recently built pipeline.
    ///
    /// Returns false when no pipeline has been built or its bus is gone.
    pub fn post(&self, message: BusMessage) -> bool {
        match lock(&self.counters.bus_tx).as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Injects an engine error with `message`.
    pub fn post_error(&self, message: &str) -> bool {
        self.post(BusMessage::Error {
            source: MOCK_NESTED_ELEMENT.to_string(),
            message: message.to_string(),
            debug: Some("mock engine".to_string()),
        })
    }

    pub fn initializations(&self) -> usize {
        self.counters.initializations.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.counters.shutdowns.load(Ordering::SeqCst)
    }

    pub fn constructions(&self) -> usize {
        self.counters.constructions.load(Ordering::SeqCst)
    }

    /// Number of successful `set_playing` calls.
    pub fn activations(&self) -> usize {
        self.counters.activations.load(Ordering::SeqCst)
    }

    /// Number of `set_null` calls across all pipelines.
    pub fn releases(&self) -> usize {
        self.counters.releases.load(Ordering::SeqCst)
    }

    /// Launch description of the most recently constructed pipeline.
    pub fn last_launch(&self) -> Option<String> {
        lock(&self.counters.last_launch).clone()
    }
}

impl MediaEngine for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn initialize(&self) -> Result<()> {
        if let Some(message) = &self.initialize_failure {
            return Err(DoorbellError::EngineUnavailable {
                message: message.clone(),
            });
        }
        self.counters.initializations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) {
        self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
    }

    fn construct(&self, graph: &PipelineGraph) -> Result<Box<dyn EnginePipeline>> {
        if let Some(message) = &self.construction_failure {
            return Err(DoorbellError::PipelineConstruction {
                message: message.clone(),
            });
        }

        let index = self.counters.constructions.fetch_add(1, Ordering::SeqCst);
        *lock(&self.counters.last_launch) = Some(graph.to_launch());

        let (tx, rx) = unbounded();
        *lock(&self.counters.bus_tx) = Some(tx.clone());

        Ok(Box::new(MockPipeline {
            name: format!("pipeline{index}"),
            bus_tx: tx,
            bus_rx: rx,
            activation_failure: self.activation_failure.clone(),
            stuck_bus: self.stuck_bus,
            counters: self.counters.clone(),
        }))
    }
}

struct MockPipeline {
    name: String,
    bus_tx: Sender<BusMessage>,
    bus_rx: Receiver<BusMessage>,
    activation_failure: Option<String>,
    stuck_bus: Option<Duration>,
    counters: Arc<Counters>,
}

impl EnginePipeline for MockPipeline {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn set_playing(&mut self) -> Result<()> {
        if let Some(message) = &self.activation_failure {
            return Err(DoorbellError::Activation {
                message: message.clone(),
            });
        }
        self.counters.activations.fetch_add(1, Ordering::SeqCst);

        for message in [
            BusMessage::StateChanged {
                source: MOCK_NESTED_ELEMENT.to_string(),
                old: EngineState::Paused,
                new: EngineState::Playing,
            },
            BusMessage::StateChanged {
                source: self.name.clone(),
                old: EngineState::Paused,
                new: EngineState::Playing,
            },
        ] {
            if self.bus_tx.send(message).is_err() {
                break;
            }
        }
        Ok(())
    }

    fn set_null(&mut self) -> Result<()> {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn bus(&self) -> Result<Box<dyn PipelineBus>> {
        Ok(Box::new(MockBus {
            rx: self.bus_rx.clone(),
            stuck: self.stuck_bus,
        }))
    }
}

struct MockBus {
    rx: Receiver<BusMessage>,
    stuck: Option<Duration>,
}

impl PipelineBus for MockBus {
    fn pop(&self, timeout: Duration) -> Option<BusMessage> {
        if let Some(stuck) = self.stuck {
            thread::sleep(stuck);
            return None;
        }
        self.rx.recv_timeout(timeout).ok()
    }
}
