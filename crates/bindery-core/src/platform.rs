//! Platform abstraction traits for the binding engine.
//!
//! The engine never drives frames itself. It asks the host to schedule one
//! and waits for the host to run the registered frame callbacks, which is how
//! a committed state change gets acknowledged.

/// Schedules work for the engine runtime.
///
/// Implementations trigger frame processing on behalf of the engine. Task
/// wakers call into the scheduler, so it must be safe to use from multiple
/// threads.
pub trait RuntimeScheduler: Send + Sync {
    /// Request that the host schedule a new frame.
    fn schedule_frame(&self);
}

/// Provides timing information for the runtime.
pub trait Clock: Send + Sync {
    /// Instant type produced by this clock implementation.
    type Instant: Copy + Send + Sync;

    /// Returns the current instant.
    fn now(&self) -> Self::Instant;

    /// Returns the number of milliseconds elapsed since `since`.
    fn elapsed_millis(&self, since: Self::Instant) -> u64;
}
