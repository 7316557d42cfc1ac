use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::{Rc, Weak};

use crate::actions::{
    self, ActionFn, ActionKey, ActionRegistry, ApiClient, BuiltinAction, HandlerOptions,
    HandlerSource, Navigator, PreparedHandler, RecordingNavigator,
};
use crate::collections::map::HashMap;
use crate::config::EngineConfig;
use crate::container::{Container, ScopeId};
use crate::context::EvalContext;
use crate::coordinator;
use crate::dependencies::DependencySet;
use crate::error::{ActionError, ScriptError};
use crate::extractor::{MemoCell, ValueExtractor};
use crate::fragment_cache::{FragmentCache, ParseId, ParsedPropertyValue};
use crate::interpreter::{build_globals, poll_once};
use crate::runtime::{RuntimeHandle, TaskHandle};
use crate::value::{LocalFuture, NativeFunction, NativeResult, ObjectMap, Value};

/// Caches whose lifetime belongs to the host's component tree rather than to
/// one engine: parse results, memoization cells and resolved actions.
///
/// The host creates one, hands it to [`Engine::new`], and calls
/// [`Engine::dispose_scope`] whenever a container unmounts.
#[derive(Default)]
pub struct EngineCaches {
    fragments: FragmentCache,
    pub(crate) memo: RefCell<HashMap<(ScopeId, ParseId), MemoCell>>,
    pub(crate) dependencies: RefCell<HashMap<ParseId, DependencySet>>,
    pub(crate) actions: RefCell<HashMap<ActionKey, ActionFn>>,
}

impl EngineCaches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fragments(&self) -> &FragmentCache {
        &self.fragments
    }

    pub fn memo_len(&self) -> usize {
        self.memo.borrow().len()
    }

    pub fn action_len(&self) -> usize {
        self.actions.borrow().len()
    }

    /// Drops memoization cells and cached actions of one scope.
    pub fn dispose_scope(&self, scope: ScopeId) {
        let mut memo = self.memo.borrow_mut();
        let memo_before = memo.len();
        memo.retain(|(owner, _), _| *owner != scope);
        let mut actions = self.actions.borrow_mut();
        let actions_before = actions.len();
        actions.retain(|key, _| key.scope() != scope);
        log::debug!(
            "disposed scope {scope}: {} memo cells, {} actions",
            memo_before - memo.len(),
            actions_before - actions.len()
        );
    }

    /// Forgets everything, e.g. after the markup document reloads.
    pub fn clear(&self) {
        self.fragments.clear();
        self.memo.borrow_mut().clear();
        self.dependencies.borrow_mut().clear();
        self.actions.borrow_mut().clear();
    }
}

/// Counters for observing the engine from tests and diagnostics.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    statements: Cell<u64>,
    commits: Cell<u64>,
    ack_waits: Cell<u64>,
    forced_yields: Cell<u64>,
    handlers_started: Cell<u64>,
}

fn bump(counter: &Cell<u64>) {
    counter.set(counter.get() + 1);
}

impl EngineMetrics {
    pub fn statements(&self) -> u64 {
        self.statements.get()
    }

    /// Statement boundaries that applied at least one change record.
    pub fn commits(&self) -> u64 {
        self.commits.get()
    }

    pub fn ack_waits(&self) -> u64 {
        self.ack_waits.get()
    }

    pub fn forced_yields(&self) -> u64 {
        self.forced_yields.get()
    }

    pub fn handlers_started(&self) -> u64 {
        self.handlers_started.get()
    }

    pub(crate) fn statement(&self) {
        bump(&self.statements);
    }

    pub(crate) fn commit(&self) {
        bump(&self.commits);
    }

    pub(crate) fn ack_wait(&self) {
        bump(&self.ack_waits);
    }

    pub(crate) fn forced_yield(&self) {
        bump(&self.forced_yields);
    }

    pub(crate) fn handler_started(&self) {
        bump(&self.handlers_started);
    }
}

/// Process-wide destination for handler failures.
pub trait ErrorSink {
    fn signal(&self, error: &ScriptError);
}

/// Default sink: logs at `error` level.
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn signal(&self, error: &ScriptError) {
        log::error!("handler failed: {error}");
    }
}

/// What a host function sees of its caller.
#[derive(Clone)]
pub struct CallContext {
    pub engine: Engine,
    pub container: Option<Container>,
    pub services: Option<Value>,
}

pub(crate) struct EngineInner {
    runtime: RuntimeHandle,
    caches: Rc<EngineCaches>,
    config: EngineConfig,
    globals: ObjectMap,
    registry: RefCell<ActionRegistry>,
    actions_object: RefCell<Option<Value>>,
    api_client: RefCell<Option<Rc<dyn ApiClient>>>,
    navigator: RefCell<Rc<dyn Navigator>>,
    error_sink: RefCell<Rc<dyn ErrorSink>>,
    metrics: EngineMetrics,
}

/// Entry point for bindings and handlers of one markup document.
#[derive(Clone)]
pub struct Engine {
    inner: Rc<EngineInner>,
}

/// Non-owning engine reference held by cached actions.
#[derive(Clone)]
pub(crate) struct WeakEngine {
    inner: Weak<EngineInner>,
}

impl WeakEngine {
    pub(crate) fn upgrade(&self) -> Option<Engine> {
        self.inner.upgrade().map(|inner| Engine { inner })
    }
}

impl Engine {
    pub fn new(runtime: RuntimeHandle, caches: Rc<EngineCaches>, config: EngineConfig) -> Self {
        Self {
            inner: Rc::new(EngineInner {
                runtime,
                caches,
                config,
                globals: build_globals(),
                registry: RefCell::new(ActionRegistry::with_defaults()),
                actions_object: RefCell::new(None),
                api_client: RefCell::new(None),
                navigator: RefCell::new(Rc::new(RecordingNavigator::default())),
                error_sink: RefCell::new(Rc::new(LogErrorSink)),
                metrics: EngineMetrics::default(),
            }),
        }
    }

    pub fn runtime(&self) -> RuntimeHandle {
        self.inner.runtime.clone()
    }

    pub fn caches(&self) -> &Rc<EngineCaches> {
        &self.inner.caches
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.inner.metrics
    }

    pub(crate) fn downgrade(&self) -> WeakEngine {
        WeakEngine {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn set_api_client(&self, client: Rc<dyn ApiClient>) {
        *self.inner.api_client.borrow_mut() = Some(client);
    }

    pub fn api_client(&self) -> Option<Rc<dyn ApiClient>> {
        self.inner.api_client.borrow().clone()
    }

    pub fn set_navigator(&self, navigator: Rc<dyn Navigator>) {
        *self.inner.navigator.borrow_mut() = navigator;
    }

    pub fn navigator(&self) -> Rc<dyn Navigator> {
        self.inner.navigator.borrow().clone()
    }

    pub fn set_error_sink(&self, sink: Rc<dyn ErrorSink>) {
        *self.inner.error_sink.borrow_mut() = sink;
    }

    pub(crate) fn signal_error(&self, error: &ScriptError) {
        let sink = self.inner.error_sink.borrow().clone();
        sink.signal(error);
    }

    // ---------------------------------------------------------------------
    // Built-in actions
    // ---------------------------------------------------------------------

    /// Adds (or replaces) a named action. It becomes reachable from scripts
    /// as `Actions.<name>` and from [`Engine::lookup_action`] by bare name.
    pub fn register_action(
        &self,
        name: impl Into<String>,
        action: impl Fn(CallContext, Vec<Value>) -> NativeResult + 'static,
    ) {
        let action: BuiltinAction = Rc::new(action);
        self.inner.registry.borrow_mut().insert(name.into(), action);
        self.inner.actions_object.borrow_mut().take();
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.inner.registry.borrow().get(name).is_some()
    }

    pub fn call_action(&self, name: &str, cx: CallContext, args: Vec<Value>) -> NativeResult {
        let action = self.inner.registry.borrow().get(name);
        match action {
            Some(action) => action(cx, args),
            None => Box::pin(std::future::ready(Err(ScriptError::Action(
                ActionError::Unknown(name.to_string()),
            )))),
        }
    }

    fn actions_object(&self) -> Value {
        if let Some(object) = self.inner.actions_object.borrow().as_ref() {
            return object.clone();
        }
        let mut map = ObjectMap::new();
        for (name, action) in self.inner.registry.borrow().iter() {
            let action = action.clone();
            let native = NativeFunction::new(format!("Actions.{name}"), move |call| {
                action(call.cx, call.args)
            });
            map.insert(name.clone(), Value::from(native));
        }
        let object = Value::object(map);
        *self.inner.actions_object.borrow_mut() = Some(object.clone());
        object
    }

    pub(crate) fn globals(&self) -> &ObjectMap {
        &self.inner.globals
    }

    pub(crate) fn global(&self, name: &str) -> Option<Value> {
        if name == "Actions" {
            return Some(self.actions_object());
        }
        self.inner.globals.get(name).cloned()
    }

    // ---------------------------------------------------------------------
    // Bindings
    // ---------------------------------------------------------------------

    pub fn parse_property(&self, source: &str) -> Result<Rc<ParsedPropertyValue>, ScriptError> {
        Ok(self.inner.caches.fragments().property(source)?)
    }

    /// A value extractor bound to one scope and state snapshot.
    pub fn extractor(
        &self,
        scope: ScopeId,
        state: Value,
        services: Option<Value>,
    ) -> ValueExtractor {
        ValueExtractor::new(self.clone(), scope, state, services)
    }

    /// Evaluates a property string (`"Hello {name}"`, `"{count}"`) against
    /// `state`, memoized per scope.
    pub fn evaluate(
        &self,
        scope: ScopeId,
        property: &str,
        state: &Value,
        services: Option<&Value>,
    ) -> Result<Value, ScriptError> {
        self.extractor(scope, state.clone(), services.cloned())
            .value(property)
    }

    pub fn evaluate_parsed(
        &self,
        scope: ScopeId,
        parsed: &ParsedPropertyValue,
        state: &Value,
        services: Option<&Value>,
    ) -> Result<Value, ScriptError> {
        self.extractor(scope, state.clone(), services.cloned())
            .value_of(parsed)
    }

    // ---------------------------------------------------------------------
    // Handlers
    // ---------------------------------------------------------------------

    pub(crate) fn prepare(&self, source: &HandlerSource) -> Result<PreparedHandler, ScriptError> {
        match source {
            HandlerSource::Text(text) => Ok(PreparedHandler::Statements(
                self.inner.caches.fragments().event(text)?,
            )),
            HandlerSource::Parsed(parsed) => Ok(PreparedHandler::Statements(parsed.clone())),
            HandlerSource::Closure(function) => Ok(PreparedHandler::Closure(function.clone())),
        }
    }

    /// Runs a handler to completion, committing state after every statement
    /// that changed it. The future must be driven by the runtime the engine
    /// was built with (see [`Engine::spawn_handler`]).
    pub fn run_handler_async(
        &self,
        source: HandlerSource,
        container: &Container,
        options: HandlerOptions,
        args: Vec<Value>,
    ) -> impl Future<Output = Result<Value, ScriptError>> + 'static {
        let engine = self.clone();
        let container = container.clone();
        async move {
            let handler = engine.prepare(&source)?;
            coordinator::run_handler(engine, handler, container, options, args).await
        }
    }

    /// Spawns [`Engine::run_handler_async`] on the runtime and drops the
    /// result; failures still reach the error sink and the lifecycle.
    pub fn spawn_handler(
        &self,
        source: HandlerSource,
        container: &Container,
        options: HandlerOptions,
        args: Vec<Value>,
    ) -> Option<TaskHandle> {
        let future = self.run_handler_async(source, container, options, args);
        self.inner.runtime.spawn_ui(async move {
            if let Err(error) = future.await {
                log::debug!("spawned handler failed: {error}");
            }
        })
    }

    /// Runs a short, non-suspending handler against a throwaway copy of
    /// state and returns its value. Writes are not committed.
    pub fn run_handler_sync(
        &self,
        source: HandlerSource,
        container: &Container,
        args: Vec<Value>,
    ) -> Result<Value, ScriptError> {
        let handler = self.prepare(&source)?;
        let mut cx = EvalContext::new(self.clone(), container.view().deep_clone())
            .with_container(Some(container.clone()))
            .with_args(args);
        poll_once(coordinator::execute(&mut cx, &handler))
    }

    /// Calls a script function from host code. With a container the call is
    /// a full handler invocation (writes are committed); without one it runs
    /// against an empty state.
    pub fn invoke_callback(
        &self,
        function: Value,
        container: Option<Container>,
        args: Vec<Value>,
    ) -> LocalFuture<'static, Result<Value, ScriptError>> {
        let engine = self.clone();
        Box::pin(async move {
            match container {
                Some(container) => {
                    let options = HandlerOptions::default().signal_error(false);
                    coordinator::run_handler(
                        engine,
                        PreparedHandler::Closure(function),
                        container,
                        options,
                        args,
                    )
                    .await
                }
                None => {
                    let mut cx = EvalContext::new(engine, Value::object(ObjectMap::new()))
                        .with_args(args);
                    coordinator::execute(&mut cx, &PreparedHandler::Closure(function)).await
                }
            }
        })
    }

    /// Resolves a handler reference to a callable, reusing a cached one for
    /// the same scope, event and source unless the request is ephemeral or
    /// carries extra context.
    pub fn lookup_action(
        &self,
        source: &HandlerSource,
        container: &Container,
        options: HandlerOptions,
    ) -> Result<Option<ActionFn>, ScriptError> {
        actions::lookup(self, source, container, options)
    }

    pub fn dispose_scope(&self, scope: ScopeId) {
        self.inner.caches.dispose_scope(scope);
    }

    /// Unmounts `container` and drops its cached state.
    pub fn unmount(&self, container: &Container) {
        container.unmount();
        self.dispose_scope(container.id());
    }
}
