//! Testing utilities for the Bindery engine.
//!
//! [`EngineTestRule`] plays the host: it owns the runtime, counts render
//! requests and delivers frames on demand, so handler tests can step through
//! the commit protocol deterministically. [`ScriptedApiClient`] stands in for
//! the network behind `callApi`.

mod scripted_api;
mod testing;

pub use scripted_api::ScriptedApiClient;
pub use testing::{run_test_engine, EngineTestRule, HandlerSlot, RecordingScheduler};
