//! In-crate harness: a test runtime plus the host loop that drains tasks and
//! frames until spawned handlers settle.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::{
    Engine, EngineCaches, EngineConfig, ObjectMap, Runtime, RuntimeHandle, RuntimeScheduler,
    ScriptError, Value,
};

/// Counts render requests.
#[derive(Default)]
pub(crate) struct TestScheduler {
    requested: AtomicUsize,
}

impl TestScheduler {
    pub(crate) fn requests(&self) -> usize {
        self.requested.load(Ordering::SeqCst)
    }
}

impl RuntimeScheduler for TestScheduler {
    fn schedule_frame(&self) {
        self.requested.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) type Slot = Rc<RefCell<Option<Result<Value, ScriptError>>>>;

const FRAME_NANOS: u64 = 16_000_000;

pub(crate) struct Harness {
    runtime: Runtime,
    scheduler: Arc<TestScheduler>,
    pub(crate) engine: Engine,
    frame_time: Cell<u64>,
    frames: Cell<usize>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub(crate) fn with_config(config: EngineConfig) -> Self {
        let scheduler = Arc::new(TestScheduler::default());
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

    pub(crate) fn handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    pub(crate) fn schedule_requests(&self) -> usize {
        self.scheduler.requests()
    }

    /// Frames delivered so far.
    pub(crate) fn frames(&self) -> usize {
        self.frames.get()
    }

    pub(crate) fn spawn(
        &self,
        future: impl Future<Output = Result<Value, ScriptError>> + 'static,
    ) -> Slot {
        let slot: Slot = Rc::new(RefCell::new(None));
        let target = slot.clone();
        self.handle()
            .spawn_ui(async move {
                let result = future.await;
                *target.borrow_mut() = Some(result);
            })
            .expect("runtime alive");
        slot
    }

    pub(crate) fn advance_frame(&self) {
        let time = self.frame_time.get() + FRAME_NANOS;
        self.frame_time.set(time);
        self.frames.set(self.frames.get() + 1);
        self.handle().drain_frame_callbacks(time);
    }

    /// Drains tasks, delivering a frame whenever work is left, until nothing
    /// is pending.
    pub(crate) fn pump_until_idle(&self) {
        let handle = self.handle();
        for _ in 0..10_000 {
            handle.drain_ui();
            if !handle.has_pending_ui() && !handle.has_frame_callbacks() {
                return;
            }
            self.advance_frame();
        }
        panic!("runtime did not become idle");
    }

    pub(crate) fn run(
        &self,
        future: impl Future<Output = Result<Value, ScriptError>> + 'static,
    ) -> Result<Value, ScriptError> {
        let slot = self.spawn(future);
        self.pump_until_idle();
        let result = slot.borrow_mut().take();
        result.expect("handler did not finish")
    }
}

pub(crate) fn state<const N: usize>(entries: [(&str, Value); N]) -> ObjectMap {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

pub(crate) fn json(text: &str) -> Value {
    Value::from(serde_json::from_str::<serde_json::Value>(text).expect("valid json"))
}

thread_local! {
    static CAPTURED: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Keeps each test thread's log lines apart.
struct CaptureLogger;

impl log::Log for CaptureLogger {
    fn enabled(&self, _: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        let line = format!("{}: {}", record.level(), record.args());
        CAPTURED.with(|lines| lines.borrow_mut().push(line));
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;

/// Starts recording log lines emitted on the calling thread.
pub(crate) fn capture_logs() {
    // Another test may have installed it already.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(log::LevelFilter::Debug);
    CAPTURED.with(|lines| lines.borrow_mut().clear());
}

pub(crate) fn captured_logs() -> Vec<String> {
    CAPTURED.with(|lines| lines.borrow().clone())
}
