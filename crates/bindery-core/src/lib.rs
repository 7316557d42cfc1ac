#![doc = r"Reactive binding and statement-execution engine for declarative UI markup."]

pub mod actions;
pub mod collections;
pub mod config;
pub mod container;
mod context;
mod coordinator;
pub mod dependencies;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod fragment_cache;
pub mod frame_clock;
pub mod hash;
mod interpreter;
pub mod platform;
pub mod runtime;
pub mod tracker;
pub mod value;

pub type FrameCallbackId = u64;

pub use actions::{
    ActionFn, ApiClient, ApiError, ApiRequest, BuiltinAction, HandlerOptions, HandlerSource,
    Navigator, RecordingNavigator,
};
pub use config::EngineConfig;
pub use container::{Container, HandlerLifecycle, ScopeId};
pub use context::{ExecutionThread, ImplicitContext};
pub use dependencies::{collect_dependencies, resolve_dependency, DependencySet};
pub use engine::{CallContext, Engine, EngineCaches, EngineMetrics, ErrorSink, LogErrorSink};
pub use error::{ActionError, ScriptError};
pub use extractor::ValueExtractor;
pub use fragment_cache::{FragmentCache, ParseId, ParsedEventValue, ParsedPropertyValue};
pub use frame_clock::{FrameCallbackRegistration, FrameClock, NextFrame};
pub use platform::{Clock, RuntimeScheduler};
pub use runtime::{DefaultScheduler, Runtime, RuntimeHandle, TaskHandle};
pub use tracker::{ChangeAction, ChangeRecord, MutationTracker, StatePath, TrackedState};
pub use value::{
    format_number, parse_number, Closure, LocalFuture, NativeCall, NativeFunction, NativeResult,
    ObjectMap, Value,
};

pub use bindery_script::ParseError;

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/value_tests.rs"]
mod value_tests;

#[cfg(test)]
#[path = "tests/tracker_tests.rs"]
mod tracker_tests;

#[cfg(test)]
#[path = "tests/container_tests.rs"]
mod container_tests;

#[cfg(test)]
#[path = "tests/extractor_tests.rs"]
mod extractor_tests;

#[cfg(test)]
#[path = "tests/interpreter_tests.rs"]
mod interpreter_tests;

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod coordinator_tests;

#[cfg(test)]
#[path = "tests/actions_tests.rs"]
mod actions_tests;

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod config_tests;
