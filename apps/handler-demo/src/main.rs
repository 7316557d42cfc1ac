use std::rc::Rc;
use std::time::Duration;

use bindery_core::{
    ApiClient, ApiError, ApiRequest, Container, Engine, EngineConfig, HandlerOptions,
    HandlerSource, LocalFuture, ObjectMap, RecordingNavigator, Value,
};
use bindery_runtime_std::StdRuntime;

/// Label bindings of the demo "page", as they would appear in markup.
const LABELS: &[(&str, &str)] = &[
    ("counter", "Clicked {count} times"),
    ("todos", "{todos.filter(t => !t.done).length} of {todos.length} open"),
    ("quote", "Quote: {quote ?? 'none yet'}"),
];

/// Event handlers wired to the page, in the order the demo fires them.
const EVENTS: &[(&str, &str, &str)] = &[
    ("increment", "click", "count = count + 1"),
    ("increment", "click", "count = count + 1"),
    (
        "add-todo",
        "click",
        "todos.push({title: draft, done: false}); draft = ''",
    ),
    ("todo-0", "toggle", "todos[0].done = !todos[0].done"),
    (
        "load-quote",
        "click",
        "const reply = Actions.callApi('/quote'); quote = reply.text",
    ),
    ("details", "click", "Actions.navigate('/details/' + count)"),
];

/// Offline stand-in for a backend.
struct DemoApi;

impl ApiClient for DemoApi {
    fn execute(&self, request: ApiRequest) -> LocalFuture<'static, Result<Value, ApiError>> {
        let response = match (request.method.as_str(), request.url.as_str()) {
            ("GET", "/quote") => Ok(Value::from(serde_json::json!({
                "text": "Simplicity is prerequisite for reliability."
            }))),
            (method, url) => Err(ApiError::new(Some(404), format!("{method} {url} not found"))),
        };
        Box::pin(std::future::ready(response))
    }
}

fn initial_state() -> ObjectMap {
    let mut state = ObjectMap::new();
    state.insert("count".into(), Value::from(0));
    state.insert("draft".into(), Value::from("Write the docs"));
    state.insert("todos".into(), Value::array(Vec::new()));
    state.insert("quote".into(), Value::Null);
    state
}

fn render(engine: &Engine, container: &Container) {
    let view = container.view();
    for (name, property) in LABELS {
        match engine.evaluate(container.id(), property, &view, None) {
            Ok(text) => println!("  [{name}] {}", text.to_display()),
            Err(error) => println!("  [{name}] <binding error: {error}>"),
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let runtime = StdRuntime::new();
    let engine = runtime.engine(EngineConfig::from_env());
    let navigator = Rc::new(RecordingNavigator::default());
    engine.set_navigator(navigator.clone());
    engine.set_api_client(Rc::new(DemoApi));

    let container = Container::new(initial_state());

    println!("=== Bindery handler demo ===");
    render(&engine, &container);

    for (owner, event, source) in EVENTS {
        println!("> {owner}.{event}: {source}");
        let options = HandlerOptions::new().owner(*owner).event(*event);
        let action = match engine.lookup_action(&HandlerSource::from(*source), &container, options) {
            Ok(Some(action)) => action,
            Ok(None) => continue,
            Err(error) => {
                log::error!("{owner}.{event} does not parse: {error}");
                continue;
            }
        };
        if action.spawn(Vec::new()).is_none() {
            log::error!("runtime is gone");
            return;
        }
        let frames = runtime.run_until_idle(Duration::from_millis(16), 600);
        log::info!("{owner}.{event} settled after {frames} frames");
        if let Some(lifecycle) = container.lifecycle(owner, event) {
            log::debug!("{owner}.{event} lifecycle: {lifecycle:?}");
        }
        render(&engine, &container);
    }

    println!("navigation history: {:?}", navigator.history());
    let metrics = engine.metrics();
    println!(
        "statements: {}, commits: {}, handlers: {}",
        metrics.statements(),
        metrics.commits(),
        metrics.handlers_started()
    );

    engine.unmount(&container);
}
