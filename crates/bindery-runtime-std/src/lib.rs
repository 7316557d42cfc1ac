//! Standard runtime services backed by Rust's `std` library.
//!
//! This crate provides concrete implementations of the platform
//! abstraction traits defined in `bindery-core`. A host constructs a
//! [`StdRuntime`], builds an [`Engine`] on top of it and then calls
//! [`StdRuntime::pump`] from its event loop so that spawned handlers make
//! progress and committed state gets acknowledged.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use bindery_core::{
    Clock, Engine, EngineCaches, EngineConfig, Runtime, RuntimeHandle, RuntimeScheduler,
};

type FrameWaker = Arc<dyn Fn() + Send + Sync + 'static>;

/// Scheduler that records frame requests and forwards them to an optional
/// host waker.
pub struct StdScheduler {
    frame_requested: AtomicBool,
    frame_waker: RwLock<Option<FrameWaker>>,
}

impl StdScheduler {
    pub fn new() -> Self {
        Self {
            frame_requested: AtomicBool::new(false),
            frame_waker: RwLock::new(None),
        }
    }

    /// Clears and returns the pending frame request flag.
    pub fn take_frame_request(&self) -> bool {
        self.frame_requested.swap(false, Ordering::SeqCst)
    }

    /// Installs the host's wake-up hook, called on every frame request.
    pub fn set_frame_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        *self
            .frame_waker
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(waker));
    }

    pub fn clear_frame_waker(&self) {
        *self
            .frame_waker
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn wake(&self) {
        let waker = self
            .frame_waker
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(waker) = waker {
            waker();
        }
    }
}

impl Default for StdScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdScheduler")
            .field(
                "frame_requested",
                &self.frame_requested.load(Ordering::SeqCst),
            )
            .finish()
    }
}

impl RuntimeScheduler for StdScheduler {
    fn schedule_frame(&self) {
        self.frame_requested.store(true, Ordering::SeqCst);
        self.wake();
    }
}

/// Wall clock for hosts that measure handler latency.
#[derive(Debug, Default, Clone)]
pub struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    fn elapsed_millis(&self, since: Self::Instant) -> u64 {
        since.elapsed().as_millis() as u64
    }
}

/// Host side of an engine: scheduler, wall clock and the runtime they drive.
#[derive(Clone)]
pub struct StdRuntime {
    scheduler: Arc<StdScheduler>,
    clock: Arc<StdClock>,
    started: Instant,
    runtime: Runtime,
}

impl StdRuntime {
    /// Creates a new standard runtime instance.
    pub fn new() -> Self {
        let scheduler = Arc::new(StdScheduler::default());
        let runtime = Runtime::new(scheduler.clone());
        Self {
            scheduler,
            clock: Arc::new(StdClock),
            started: Instant::now(),
            runtime,
        }
    }

    pub fn runtime(&self) -> Runtime {
        self.runtime.clone()
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    /// Builds an engine whose handlers run on this runtime.
    pub fn engine(&self, config: EngineConfig) -> Engine {
        Engine::new(self.runtime_handle(), Rc::new(EngineCaches::new()), config)
    }

    pub fn scheduler(&self) -> &StdScheduler {
        &self.scheduler
    }

    pub fn take_frame_request(&self) -> bool {
        self.scheduler.take_frame_request()
    }

    pub fn set_frame_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        self.scheduler.set_frame_waker(waker);
    }

    pub fn clear_frame_waker(&self) {
        self.scheduler.clear_frame_waker();
    }

    /// Nanoseconds since this runtime was created; used as frame time.
    pub fn frame_time_nanos(&self) -> u64 {
        let now = self.clock.now();
        now.duration_since(self.started).as_nanos() as u64
    }

    /// One host frame: runs queued tasks, delivers a frame if one was
    /// requested, then runs the tasks that frame woke. Returns whether any
    /// work is still outstanding.
    pub fn pump(&self) -> bool {
        let handle = self.runtime_handle();
        handle.drain_ui();
        let requested = self.take_frame_request();
        if requested || handle.has_frame_callbacks() {
            let time = self.frame_time_nanos();
            log::trace!("delivering frame at {time}ns");
            handle.drain_frame_callbacks(time);
            handle.drain_ui();
        }
        handle.has_pending_ui() || handle.has_frame_callbacks()
    }

    /// Pumps frames at roughly `frame_interval` until nothing is pending or
    /// `max_frames` have been delivered. Returns the number of frames pumped.
    pub fn run_until_idle(&self, frame_interval: Duration, max_frames: usize) -> usize {
        let started = self.clock.now();
        for frame in 1..=max_frames {
            if !self.pump() {
                log::trace!(
                    "idle after {frame} frames ({}ms)",
                    self.clock.elapsed_millis(started)
                );
                return frame;
            }
            std::thread::sleep(frame_interval);
        }
        log::warn!(
            "runtime still busy after {max_frames} frames ({}ms)",
            self.clock.elapsed_millis(started)
        );
        max_frames
    }
}

impl fmt::Debug for StdRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handle = self.runtime.handle();
        f.debug_struct("StdRuntime")
            .field("scheduler", &self.scheduler)
            .field("pending_tasks", &handle.pending_task_count())
            .field("frame_callbacks", &handle.has_frame_callbacks())
            .finish()
    }
}

impl Default for StdRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "tests/std_runtime_tests.rs"]
mod tests;
