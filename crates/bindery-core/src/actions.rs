//! Handler references, the action cache and the built-in action registry.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;
use std::rc::Rc;

use serde::Serialize;
use thiserror::Error;

use crate::container::{Container, ScopeId};
use crate::coordinator;
use crate::engine::{CallContext, Engine, WeakEngine};
use crate::error::{ActionError, ScriptError};
use crate::fragment_cache::{ParseId, ParsedEventValue};
use crate::hash::content_hash;
use crate::runtime::TaskHandle;
use crate::value::{LocalFuture, NativeFunction, NativeResult, ObjectMap, Value};

/// The three shapes a handler reference takes in markup.
#[derive(Clone)]
pub enum HandlerSource {
    /// Script text, parsed on first use through the fragment cache.
    Text(Rc<str>),
    Parsed(Rc<ParsedEventValue>),
    /// A function value, e.g. an arrow produced by a binding.
    Closure(Value),
}

impl From<&str> for HandlerSource {
    fn from(text: &str) -> Self {
        HandlerSource::Text(Rc::from(text))
    }
}

impl From<String> for HandlerSource {
    fn from(text: String) -> Self {
        HandlerSource::Text(Rc::from(text))
    }
}

impl From<Rc<ParsedEventValue>> for HandlerSource {
    fn from(parsed: Rc<ParsedEventValue>) -> Self {
        HandlerSource::Parsed(parsed)
    }
}

impl From<Value> for HandlerSource {
    fn from(function: Value) -> Self {
        HandlerSource::Closure(function)
    }
}

/// A handler reference after parsing.
#[derive(Clone)]
pub(crate) enum PreparedHandler {
    Statements(Rc<ParsedEventValue>),
    Closure(Value),
    Builtin(Rc<str>),
}

/// Per-invocation options for handlers and action lookups.
#[derive(Clone, Default)]
pub struct HandlerOptions {
    /// Component that owns the handler; with `event_name` it keys the
    /// container's lifecycle entry.
    pub owner: Option<String>,
    pub event_name: Option<String>,
    /// `None` follows [`EngineConfig::signal_errors_by_default`](crate::EngineConfig).
    pub signal_error: Option<bool>,
    pub services: Option<Value>,
    /// Bound to `$this`.
    pub this: Value,
    /// Ad hoc names visible to the handler (e.g. `$item` in a list row).
    pub extra_context: ObjectMap,
    /// One-off lookup that must not be cached.
    pub ephemeral: bool,
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn event(mut self, event_name: impl Into<String>) -> Self {
        self.event_name = Some(event_name.into());
        self
    }

    pub fn signal_error(mut self, signal: bool) -> Self {
        self.signal_error = Some(signal);
        self
    }

    pub fn services(mut self, services: Value) -> Self {
        self.services = Some(services);
        self
    }

    pub fn this(mut self, this: Value) -> Self {
        self.this = this;
        self
    }

    pub fn extra(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra_context.insert(name.into(), value);
        self
    }

    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    pub(crate) fn implicit(&self) -> crate::context::ImplicitContext {
        crate::context::ImplicitContext {
            this: self.this.clone(),
            extra: self.extra_context.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Discriminator {
    Text(Rc<str>),
    Parsed(ParseId),
    Closure(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ActionKey {
    scope: ScopeId,
    event: Option<String>,
    discriminator: Discriminator,
}

impl ActionKey {
    fn new(scope: ScopeId, event: Option<String>, source: &HandlerSource) -> Self {
        let discriminator = match source {
            HandlerSource::Text(text) => Discriminator::Text(text.clone()),
            HandlerSource::Parsed(parsed) => Discriminator::Parsed(parsed.id),
            HandlerSource::Closure(function) => Discriminator::Closure(content_hash(&closure_text(function))),
        };
        Self {
            scope,
            event,
            discriminator,
        }
    }

    pub(crate) fn scope(&self) -> ScopeId {
        self.scope
    }
}

fn closure_text(function: &Value) -> String {
    match function {
        Value::Function(closure) => closure.source().to_string(),
        Value::Native(native) => format!("native:{}", native.name()),
        other => other.to_display(),
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|first| first.is_alphabetic() || first == '_' || first == '$')
        && chars.all(|ch| ch.is_alphanumeric() || ch == '_' || ch == '$')
}

struct ActionFnInner {
    engine: WeakEngine,
    container: Container,
    handler: PreparedHandler,
    options: HandlerOptions,
}

/// A resolved handler, ready to be invoked with event arguments.
#[derive(Clone)]
pub struct ActionFn {
    inner: Rc<ActionFnInner>,
}

impl ActionFn {
    /// Runs the handler through the coordinator. Must be driven by the
    /// engine's runtime.
    pub fn call(&self, args: Vec<Value>) -> impl Future<Output = Result<Value, ScriptError>> + 'static {
        let inner = self.inner.clone();
        async move {
            let Some(engine) = inner.engine.upgrade() else {
                return Err(ScriptError::Action(ActionError::EngineDropped));
            };
            coordinator::run_handler(
                engine,
                inner.handler.clone(),
                inner.container.clone(),
                inner.options.clone(),
                args,
            )
            .await
        }
    }

    /// Spawns [`ActionFn::call`] on the engine's runtime.
    pub fn spawn(&self, args: Vec<Value>) -> Option<TaskHandle> {
        let engine = self.inner.engine.upgrade()?;
        let future = self.call(args);
        engine.runtime().spawn_ui(async move {
            if let Err(error) = future.await {
                log::debug!("spawned action failed: {error}");
            }
        })
    }

    pub fn ptr_eq(&self, other: &ActionFn) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The action as a script function value.
    pub fn to_value(&self) -> Value {
        let action = self.clone();
        Value::from(NativeFunction::new("action", move |call| {
            Box::pin(action.call(call.args))
        }))
    }
}

pub(crate) fn lookup(
    engine: &Engine,
    source: &HandlerSource,
    container: &Container,
    options: HandlerOptions,
) -> Result<Option<ActionFn>, ScriptError> {
    match source {
        HandlerSource::Text(text) if text.trim().is_empty() => return Ok(None),
        HandlerSource::Closure(function) if !function.is_callable() => return Ok(None),
        _ => {}
    }

    let cacheable = !options.ephemeral && options.extra_context.is_empty();
    let key = ActionKey::new(container.id(), options.event_name.clone(), source);
    if cacheable {
        if let Some(hit) = engine.caches().actions.borrow().get(&key) {
            return Ok(Some(hit.clone()));
        }
    }

    let handler = match source {
        HandlerSource::Text(text) if is_identifier(text.trim()) && engine.has_action(text.trim()) => {
            PreparedHandler::Builtin(Rc::from(text.trim()))
        }
        other => engine.prepare(other)?,
    };
    let action = ActionFn {
        inner: Rc::new(ActionFnInner {
            engine: engine.downgrade(),
            container: container.clone(),
            handler,
            options,
        }),
    };
    if cacheable {
        engine
            .caches()
            .actions
            .borrow_mut()
            .insert(key, action.clone());
    }
    Ok(Some(action))
}

// -------------------------------------------------------------------------
// Registry
// -------------------------------------------------------------------------

pub type BuiltinAction = Rc<dyn Fn(CallContext, Vec<Value>) -> NativeResult>;

pub(crate) struct ActionRegistry {
    actions: BTreeMap<String, BuiltinAction>,
}

impl ActionRegistry {
    pub(crate) fn with_defaults() -> Self {
        let mut registry = Self {
            actions: BTreeMap::new(),
        };
        registry.insert("callApi".into(), Rc::new(call_api));
        registry.insert("delay".into(), Rc::new(delay));
        registry.insert("navigate".into(), Rc::new(navigate));
        registry
    }

    pub(crate) fn insert(&mut self, name: String, action: BuiltinAction) {
        self.actions.insert(name, action);
    }

    pub(crate) fn get(&self, name: &str) -> Option<BuiltinAction> {
        self.actions.get(name).cloned()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &BuiltinAction)> {
        self.actions.iter()
    }
}

fn invalid(action: &str, message: impl Into<String>) -> NativeResult {
    let error = ScriptError::Action(ActionError::InvalidArguments {
        action: action.to_string(),
        message: message.into(),
    });
    Box::pin(std::future::ready(Err(error)))
}

/// `delay(ms)`: resolves after at least `ms` milliseconds of frame time.
pub(crate) fn delay(cx: CallContext, args: Vec<Value>) -> NativeResult {
    let millis = args.first().map_or(0.0, Value::to_number);
    let millis = if millis.is_finite() && millis > 0.0 {
        millis as u64
    } else {
        0
    };
    let clock = cx.engine.runtime().frame_clock();
    Box::pin(async move {
        clock.delay_millis(millis).await;
        Ok(Value::Undefined)
    })
}

/// Host hook behind the `navigate` action.
pub trait Navigator {
    fn navigate(&self, target: &str, options: &Value);
}

/// Navigator used when the host did not install one: remembers targets.
#[derive(Default)]
pub struct RecordingNavigator {
    history: RefCell<Vec<String>>,
}

impl RecordingNavigator {
    pub fn history(&self) -> Vec<String> {
        self.history.borrow().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, target: &str, _options: &Value) {
        self.history.borrow_mut().push(target.to_string());
    }
}

fn navigate(cx: CallContext, args: Vec<Value>) -> NativeResult {
    let target = match args.first() {
        Some(Value::String(target)) if !target.is_empty() => target.to_string(),
        _ => return invalid("navigate", "expected a target path"),
    };
    log::debug!("navigate to {target}");
    let options = args.get(1).cloned().unwrap_or_default();
    cx.engine.navigator().navigate(&target, &options);
    Box::pin(std::future::ready(Ok(Value::Undefined)))
}

/// One request issued by `callApi`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiRequest {
    pub url: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ApiError {
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn to_value(&self) -> Value {
        Value::object_from([
            (
                "status",
                self.status.map_or(Value::Null, |status| Value::from(status as i32)),
            ),
            ("message", Value::from(self.message.as_str())),
        ])
    }
}

/// Network transport behind `callApi`, supplied by the host.
pub trait ApiClient {
    fn execute(&self, request: ApiRequest) -> LocalFuture<'static, Result<Value, ApiError>>;
}

fn string_map(value: &Value) -> BTreeMap<String, String> {
    match value {
        Value::Object(map) => map
            .borrow()
            .iter()
            .filter(|(_, value)| !value.is_nullish())
            .map(|(key, value)| (key.clone(), value.to_display()))
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn api_request(options: &Value) -> Result<(ApiRequest, Value), String> {
    if let Value::String(url) = options {
        let request = ApiRequest {
            url: url.to_string(),
            method: "GET".into(),
            body: None,
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
        };
        return Ok((request, Value::Undefined));
    }
    if !matches!(options, Value::Object(_)) {
        return Err(format!("expected an options object, found {}", options.describe()));
    }
    let url = match options.get_property("url") {
        Value::String(url) if !url.is_empty() => url.to_string(),
        _ => return Err("missing 'url'".into()),
    };
    let method = match options.get_property("method") {
        Value::Undefined => "GET".to_string(),
        method => method.to_display().to_uppercase(),
    };
    let body = match options.get_property("body") {
        Value::Undefined => None,
        body => Some(body.to_json()),
    };
    let request = ApiRequest {
        url,
        method,
        body,
        query: string_map(&options.get_property("queryParams")),
        headers: string_map(&options.get_property("headers")),
    };
    Ok((request, options.get_property("onError")))
}

/// `callApi(options)`. When the request fails and `onError` returns `false`,
/// the failure is logged and the action resolves to `undefined`.
fn call_api(cx: CallContext, args: Vec<Value>) -> NativeResult {
    let options = args.first().cloned().unwrap_or_default();
    let (request, on_error) = match api_request(&options) {
        Ok(parsed) => parsed,
        Err(message) => return invalid("callApi", message),
    };
    let Some(client) = cx.engine.api_client() else {
        return Box::pin(std::future::ready(Err(ScriptError::Action(
            ActionError::NoApiClient,
        ))));
    };
    Box::pin(async move {
        let method = request.method.clone();
        let url = request.url.clone();
        log::debug!("callApi {method} {url}");
        let error = match client.execute(request).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if on_error.is_callable() {
            let verdict = cx
                .engine
                .invoke_callback(on_error, cx.container.clone(), vec![error.to_value()])
                .await?;
            if verdict.strict_eq(&Value::Bool(false)) {
                log::warn!("callApi {method} {url} failed ({error}); suppressed by onError");
                return Ok(Value::Undefined);
            }
        }
        Err(ScriptError::Action(ActionError::Api {
            method,
            url,
            status: error.status,
            message: error.message,
        }))
    })
}
