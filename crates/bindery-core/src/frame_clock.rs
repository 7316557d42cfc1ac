use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::runtime::RuntimeHandle;
use crate::FrameCallbackId;

/// Frame-time source for the engine. Every frame the host drains is also the
/// acknowledgement for commits made before it.
#[derive(Clone)]
pub struct FrameClock {
    runtime: RuntimeHandle,
}

impl FrameClock {
    pub fn new(runtime: RuntimeHandle) -> Self {
        Self { runtime }
    }

    /// Runs `callback` with the next frame's time in nanoseconds. Dropping
    /// the registration before that frame cancels it.
    pub fn with_frame_nanos(
        &self,
        callback: impl FnOnce(u64) + 'static,
    ) -> FrameCallbackRegistration {
        FrameCallbackRegistration {
            id: self.runtime.register_frame_callback(callback),
            runtime: self.runtime.clone(),
        }
    }

    /// Resolves with the time of the next frame the host drains. The engine
    /// awaits this after a commit: the frame is the acknowledgement.
    pub fn next_frame(&self) -> NextFrame {
        NextFrame {
            clock: self.clone(),
            slot: Rc::new(RefCell::new(FrameSlot::Idle)),
            registration: None,
        }
    }

    /// Resolves once at least `millis` of frame time has elapsed, measured
    /// from the first frame observed after the call.
    pub async fn delay_millis(&self, millis: u64) -> u64 {
        let start = self.next_frame().await;
        let target = start.saturating_add(millis.saturating_mul(1_000_000));
        let mut now = start;
        while now < target {
            now = self.next_frame().await;
        }
        now
    }
}

/// A pending frame callback. Cancelled on drop.
pub struct FrameCallbackRegistration {
    runtime: RuntimeHandle,
    id: Option<FrameCallbackId>,
}

impl FrameCallbackRegistration {
    pub fn is_active(&self) -> bool {
        self.id.is_some()
    }

    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(id) = self.id.take() {
            self.runtime.cancel_frame_callback(id);
        }
    }
}

impl Drop for FrameCallbackRegistration {
    fn drop(&mut self) {
        self.release();
    }
}

enum FrameSlot {
    Idle,
    Waiting(Waker),
    Fired(u64),
}

/// Future returned by [`FrameClock::next_frame`]. Registers its frame
/// callback on first poll and unregisters it when dropped early.
pub struct NextFrame {
    clock: FrameClock,
    slot: Rc<RefCell<FrameSlot>>,
    registration: Option<FrameCallbackRegistration>,
}

impl Future for NextFrame {
    type Output = u64;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<u64> {
        let this = self.get_mut();
        if let FrameSlot::Fired(time) = *this.slot.borrow() {
            return Poll::Ready(time);
        }
        this.slot.replace(FrameSlot::Waiting(cx.waker().clone()));
        if this.registration.is_none() {
            let slot = Rc::downgrade(&this.slot);
            this.registration = Some(this.clock.with_frame_nanos(move |time| {
                if let Some(slot) = slot.upgrade() {
                    if let FrameSlot::Waiting(waker) = slot.replace(FrameSlot::Fired(time)) {
                        waker.wake();
                    }
                }
            }));
        }
        Poll::Pending
    }
}
