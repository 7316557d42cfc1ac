use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bindery_core::{
    Container, Engine, EngineCaches, EngineConfig, HandlerOptions, HandlerSource, ObjectMap,
    Runtime, RuntimeHandle, RuntimeScheduler, ScriptError, Value,
};

/// Default spacing between delivered frames (60 Hz, rounded).
pub const FRAME_NANOS: u64 = 16_000_000;

const MAX_PUMP_ITERATIONS: usize = 10_000;

/// Scheduler that only counts render requests.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    requests: AtomicUsize,
}

impl RecordingScheduler {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl RuntimeScheduler for RecordingScheduler {
    fn schedule_frame(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

/// Where a spawned handler leaves its result.
#[derive(Clone, Default)]
pub struct HandlerSlot {
    result: Rc<RefCell<Option<Result<Value, ScriptError>>>>,
}

impl HandlerSlot {
    pub fn is_done(&self) -> bool {
        self.result.borrow().is_some()
    }

    pub fn take(&self) -> Option<Result<Value, ScriptError>> {
        self.result.borrow_mut().take()
    }

    fn fill(&self, result: Result<Value, ScriptError>) {
        *self.result.borrow_mut() = Some(result);
    }
}

/// Headless host for exercising an [`Engine`] in tests.
///
/// The rule owns the runtime the engine runs on. Nothing happens until the
/// test drains it: [`EngineTestRule::pump_until_idle`] alternates task
/// draining and frame delivery until no handler is waiting, while
/// [`EngineTestRule::drain`] and [`EngineTestRule::advance_frame`] step
/// through one statement commit at a time.
pub struct EngineTestRule {
    runtime: Runtime,
    scheduler: Arc<RecordingScheduler>,
    engine: Engine,
    frame_time: Cell<u64>,
    frames: Cell<usize>,
}

impl EngineTestRule {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let scheduler = Arc::new(RecordingScheduler::default());
        let runtime = Runtime::new(scheduler.clone());
        let engine = Engine::new(runtime.handle(), Rc::new(EngineCaches::new()), config);
        Self {
            runtime,
            scheduler,
            engine,
            frame_time: Cell::new(0),
            frames: Cell::new(0),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    /// Render requests made so far.
    pub fn frame_requests(&self) -> usize {
        self.scheduler.requests()
    }

    /// Frames delivered so far.
    pub fn frames(&self) -> usize {
        self.frames.get()
    }

    /// Frame time of the last delivered frame.
    pub fn frame_time_nanos(&self) -> u64 {
        self.frame_time.get()
    }

    /// A root container holding `entries`.
    pub fn container<const N: usize>(&self, entries: [(&str, Value); N]) -> Container {
        let initial: ObjectMap = entries
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        Container::new(initial)
    }

    /// Spawns `future` on the engine's runtime without driving it.
    pub fn spawn(
        &self,
        future: impl Future<Output = Result<Value, ScriptError>> + 'static,
    ) -> HandlerSlot {
        let slot = HandlerSlot::default();
        let target = slot.clone();
        let spawned = self.runtime.handle().spawn_ui(async move {
            let result = future.await;
            target.fill(result);
        });
        if spawned.is_none() {
            log::warn!("runtime gone; handler not spawned");
        }
        slot
    }

    /// Spawns a handler invocation without driving it.
    pub fn spawn_handler(
        &self,
        source: impl Into<HandlerSource>,
        container: &Container,
        options: HandlerOptions,
        args: Vec<Value>,
    ) -> HandlerSlot {
        let future = self
            .engine
            .run_handler_async(source.into(), container, options, args);
        self.spawn(future)
    }

    /// Runs a handler to completion.
    pub fn run_handler(
        &self,
        source: impl Into<HandlerSource>,
        container: &Container,
        options: HandlerOptions,
        args: Vec<Value>,
    ) -> Result<Value, ScriptError> {
        let slot = self.spawn_handler(source, container, options, args);
        self.pump_until_idle();
        slot.take().expect("handler did not finish while pumping")
    }

    /// Drives an arbitrary engine future to completion.
    pub fn run(
        &self,
        future: impl Future<Output = Result<Value, ScriptError>> + 'static,
    ) -> Result<Value, ScriptError> {
        let slot = self.spawn(future);
        self.pump_until_idle();
        slot.take().expect("future did not finish while pumping")
    }

    /// Polls every spawned task once and runs queued closures.
    pub fn drain(&self) {
        self.runtime.handle().drain_ui();
    }

    /// Delivers one frame [`FRAME_NANOS`] after the previous one.
    pub fn advance_frame(&self) {
        self.advance_frame_by(FRAME_NANOS);
    }

    pub fn advance_frame_by(&self, nanos: u64) {
        let time = self.frame_time.get() + nanos;
        self.frame_time.set(time);
        self.frames.set(self.frames.get() + 1);
        self.runtime.handle().drain_frame_callbacks(time);
    }

    /// Drains tasks and delivers frames until nothing is pending. Returns the
    /// number of frames delivered on the way.
    pub fn pump_until_idle(&self) -> usize {
        let handle = self.runtime.handle();
        let start = self.frames.get();
        for _ in 0..MAX_PUMP_ITERATIONS {
            handle.drain_ui();
            if !handle.has_pending_ui() && !handle.has_frame_callbacks() {
                return self.frames.get() - start;
            }
            self.advance_frame();
        }
        panic!("pump_until_idle: runtime still busy after {MAX_PUMP_ITERATIONS} iterations");
    }
}

impl Default for EngineTestRule {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience helper for tests that only need temporary access to an
/// `EngineTestRule`.
pub fn run_test_engine<R>(f: impl FnOnce(&EngineTestRule) -> R) -> R {
    let rule = EngineTestRule::new();
    f(&rule)
}

#[cfg(test)]
#[path = "tests/testing_tests.rs"]
mod tests;
