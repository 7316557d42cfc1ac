//! Single-threaded host runtime: spawned handler futures plus the frame
//! callback queue that acknowledges commits.
//!
//! The runtime never runs anything on its own. A host calls
//! [`RuntimeHandle::drain_ui`] to poll spawned work and
//! [`RuntimeHandle::drain_frame_callbacks`] once per rendered frame. Wakers
//! only forward to the [`RuntimeScheduler`], asking the host for a frame.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use smallvec::SmallVec;

use crate::frame_clock::FrameClock;
use crate::platform::RuntimeScheduler;
use crate::FrameCallbackId;

type LocalTask = Pin<Box<dyn Future<Output = ()> + 'static>>;
type FrameCallback = Box<dyn FnOnce(u64) + 'static>;

#[derive(Default)]
struct TaskQueue {
    tasks: Vec<(u64, LocalTask)>,
    next_id: u64,
}

#[derive(Default)]
struct FrameQueue {
    callbacks: VecDeque<(FrameCallbackId, FrameCallback)>,
    next_id: FrameCallbackId,
}

struct RuntimeInner {
    scheduler: Arc<dyn RuntimeScheduler>,
    render_requested: Cell<bool>,
    tasks: RefCell<TaskQueue>,
    frames: RefCell<FrameQueue>,
    waker: Waker,
}

impl RuntimeInner {
    fn new(scheduler: Arc<dyn RuntimeScheduler>) -> Self {
        let waker = futures_task::waker(Arc::new(SchedulerWaker {
            scheduler: scheduler.clone(),
        }));
        Self {
            scheduler,
            render_requested: Cell::new(false),
            tasks: RefCell::new(TaskQueue::default()),
            frames: RefCell::new(FrameQueue::default()),
            waker,
        }
    }

    /// Low-priority render request. Repeated requests before the host
    /// renders coalesce into one flag.
    fn request_render(&self) {
        self.render_requested.set(true);
        self.scheduler.schedule_frame();
    }

    fn spawn(&self, task: LocalTask) -> u64 {
        let id = {
            let mut queue = self.tasks.borrow_mut();
            queue.next_id += 1;
            let id = queue.next_id;
            queue.tasks.push((id, task));
            id
        };
        self.request_render();
        id
    }

    fn cancel_task(&self, id: u64) {
        self.tasks.borrow_mut().tasks.retain(|(task, _)| *task != id);
    }

    /// Polls every live task once. Returns whether any of them finished.
    fn poll_tasks(&self) -> bool {
        let batch = std::mem::take(&mut self.tasks.borrow_mut().tasks);
        let mut cx = Context::from_waker(&self.waker);
        let mut still_pending = Vec::with_capacity(batch.len());
        let mut finished = 0usize;
        for (id, mut task) in batch {
            match task.as_mut().poll(&mut cx) {
                Poll::Ready(()) => finished += 1,
                Poll::Pending => still_pending.push((id, task)),
            }
        }
        // Tasks spawned during this pass queue up behind the older ones.
        let mut queue = self.tasks.borrow_mut();
        let spawned = std::mem::replace(&mut queue.tasks, still_pending);
        queue.tasks.extend(spawned);
        finished > 0
    }

    fn drain_ui(&self) {
        while self.poll_tasks() {}
    }

    fn has_tasks(&self) -> bool {
        self.tasks
            .try_borrow()
            .map_or(true, |queue| !queue.tasks.is_empty())
    }

    fn register_frame_callback(&self, callback: FrameCallback) -> FrameCallbackId {
        let id = {
            let mut frames = self.frames.borrow_mut();
            frames.next_id += 1;
            let id = frames.next_id;
            frames.callbacks.push_back((id, callback));
            id
        };
        self.request_render();
        id
    }

    fn cancel_frame_callback(&self, id: FrameCallbackId) {
        self.frames
            .borrow_mut()
            .callbacks
            .retain(|(callback, _)| *callback != id);
        self.settle_render_request();
    }

    fn has_frame_callbacks(&self) -> bool {
        !self.frames.borrow().callbacks.is_empty()
    }

    /// Runs the callbacks registered before this frame. Callbacks registered
    /// while running wait for the next one.
    fn drain_frame_callbacks(&self, frame_time_nanos: u64) {
        let due: SmallVec<[(FrameCallbackId, FrameCallback); 4]> =
            self.frames.borrow_mut().callbacks.drain(..).collect();
        for (_, callback) in due {
            callback(frame_time_nanos);
        }
        self.settle_render_request();
    }

    fn settle_render_request(&self) {
        if !self.has_frame_callbacks() && !self.has_tasks() {
            self.render_requested.set(false);
        }
    }
}

/// Owner of the task list and frame callback queue. Dropping it turns every
/// outstanding [`RuntimeHandle`] into a no-op.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    pub fn new(scheduler: Arc<dyn RuntimeScheduler>) -> Self {
        Self {
            inner: Rc::new(RuntimeInner::new(scheduler)),
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Whether a render was requested and not yet settled by a frame.
    pub fn render_requested(&self) -> bool {
        self.inner.render_requested.get()
    }

    pub fn frame_clock(&self) -> FrameClock {
        FrameClock::new(self.handle())
    }
}

/// Scheduler for hosts that poll the runtime on their own cadence.
#[derive(Default)]
pub struct DefaultScheduler;

impl RuntimeScheduler for DefaultScheduler {
    fn schedule_frame(&self) {}
}

/// Weak handle to a [`Runtime`]; every operation is a no-op once the
/// runtime has been dropped.
#[derive(Clone)]
pub struct RuntimeHandle {
    inner: Weak<RuntimeInner>,
}

impl RuntimeHandle {
    fn with_inner<R>(&self, f: impl FnOnce(&RuntimeInner) -> R) -> Option<R> {
        self.inner.upgrade().map(|inner| f(&inner))
    }

    /// Requests a low-priority render from the host.
    pub fn schedule(&self) {
        self.with_inner(RuntimeInner::request_render);
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    pub fn spawn_ui<F>(&self, fut: F) -> Option<TaskHandle>
    where
        F: Future<Output = ()> + 'static,
    {
        let id = self.with_inner(|inner| inner.spawn(Box::pin(fut)))?;
        Some(TaskHandle {
            id,
            runtime: self.clone(),
        })
    }

    pub fn cancel_task(&self, id: u64) {
        self.with_inner(|inner| inner.cancel_task(id));
    }

    /// Polls spawned tasks until a full pass finishes none of them.
    pub fn drain_ui(&self) {
        self.with_inner(RuntimeInner::drain_ui);
    }

    pub fn has_pending_ui(&self) -> bool {
        self.with_inner(RuntimeInner::has_tasks).unwrap_or(false)
    }

    /// Number of spawned futures that have not completed yet.
    pub fn pending_task_count(&self) -> usize {
        self.with_inner(|inner| inner.tasks.try_borrow().map_or(0, |queue| queue.tasks.len()))
            .unwrap_or(0)
    }

    pub fn render_requested(&self) -> bool {
        self.with_inner(|inner| inner.render_requested.get())
            .unwrap_or(false)
    }

    pub fn register_frame_callback(
        &self,
        callback: impl FnOnce(u64) + 'static,
    ) -> Option<FrameCallbackId> {
        self.with_inner(|inner| inner.register_frame_callback(Box::new(callback)))
    }

    pub fn cancel_frame_callback(&self, id: FrameCallbackId) {
        self.with_inner(|inner| inner.cancel_frame_callback(id));
    }

    /// Runs every registered frame callback with the given frame time. This
    /// is the host's acknowledgement that pending state has been applied.
    pub fn drain_frame_callbacks(&self, frame_time_nanos: u64) {
        self.with_inner(|inner| inner.drain_frame_callbacks(frame_time_nanos));
    }

    pub fn has_frame_callbacks(&self) -> bool {
        self.with_inner(RuntimeInner::has_frame_callbacks)
            .unwrap_or(false)
    }

    pub fn frame_clock(&self) -> FrameClock {
        FrameClock::new(self.clone())
    }
}

/// A spawned task; dropping the handle leaves the task running.
pub struct TaskHandle {
    id: u64,
    runtime: RuntimeHandle,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(self) {
        self.runtime.cancel_task(self.id);
    }
}

// Holds the Send + Sync scheduler rather than the runtime itself so the
// waker can cross threads.
struct SchedulerWaker {
    scheduler: Arc<dyn RuntimeScheduler>,
}

impl futures_task::ArcWake for SchedulerWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.scheduler.schedule_frame();
    }
}
