use std::cell::RefCell;
use std::rc::Rc;

use crate::test_support::{capture_logs, captured_logs, json, state, Harness};
use crate::{
    Container, EngineConfig, ErrorSink, HandlerLifecycle, HandlerOptions, HandlerSource,
    ScriptError, Value,
};
use serde_json::json as expected;

#[derive(Default)]
struct RecordingSink {
    errors: RefCell<Vec<String>>,
}

impl ErrorSink for RecordingSink {
    fn signal(&self, error: &ScriptError) {
        self.errors.borrow_mut().push(error.to_string());
    }
}

fn counter() -> Container {
    Container::new(state([("count", Value::from(0))]))
}

#[test]
fn three_increments_commit_three_records() {
    let harness = Harness::new();
    let container = counter();

    for _ in 0..3 {
        let future = harness.engine.run_handler_async(
            HandlerSource::from("count = count + 1"),
            &container,
            HandlerOptions::default(),
            Vec::new(),
        );
        harness.run(future).expect("handler");
    }

    assert_eq!(container.get("count").to_number(), 3.0);
    assert_eq!(container.version(), 3);
    assert_eq!(harness.engine.metrics().commits(), 3);
    assert_eq!(harness.engine.metrics().ack_waits(), 3);
    assert_eq!(harness.frames(), 3);
    assert!(harness.schedule_requests() >= 3);
}

#[test]
fn each_statement_waits_for_the_previous_commit() {
    let harness = Harness::new();
    let container = Container::new(state([]));
    let slot = harness.spawn(harness.engine.run_handler_async(
        HandlerSource::from("x = 1; y = x + 1; z = y + 1"),
        &container,
        HandlerOptions::default(),
        Vec::new(),
    ));
    let handle = harness.handle();

    handle.drain_ui();
    assert_eq!(container.view().to_json(), expected!({"x": 1}));

    harness.advance_frame();
    handle.drain_ui();
    assert_eq!(container.view().to_json(), expected!({"x": 1, "y": 2}));

    harness.advance_frame();
    handle.drain_ui();
    assert_eq!(container.view().to_json(), expected!({"x": 1, "y": 2, "z": 3}));
    assert!(slot.borrow().is_none(), "still waiting for the last acknowledgement");

    harness.pump_until_idle();
    let result = slot.borrow_mut().take().expect("finished");
    assert_eq!(result.expect("ok").to_number(), 3.0);
}

#[test]
fn throwing_after_a_commit_keeps_the_commit() {
    let harness = Harness::new();
    let sink = Rc::new(RecordingSink::default());
    harness.engine.set_error_sink(sink.clone());
    let container = counter();

    let result = harness.run(harness.engine.run_handler_async(
        HandlerSource::from("count = 1; throw 'boom'"),
        &container,
        HandlerOptions::new().owner("button").event("click"),
        Vec::new(),
    ));

    assert!(matches!(result, Err(ScriptError::Thrown(ref value)) if value.to_display() == "boom"));
    assert_eq!(container.get("count").to_number(), 1.0);
    assert!(matches!(
        container.lifecycle("button", "click"),
        Some(HandlerLifecycle::Error(ScriptError::Thrown(_)))
    ));
    assert_eq!(sink.errors.borrow().len(), 1);
}

#[test]
fn opting_out_of_error_signalling() {
    let harness = Harness::new();
    let sink = Rc::new(RecordingSink::default());
    harness.engine.set_error_sink(sink.clone());
    let container = counter();

    let result = harness.run(harness.engine.run_handler_async(
        HandlerSource::from("missing()"),
        &container,
        HandlerOptions::new().signal_error(false),
        Vec::new(),
    ));

    assert!(matches!(result, Err(ScriptError::NotCallable { .. })));
    assert!(sink.errors.borrow().is_empty());

    let quiet = Harness::with_config(EngineConfig::default().with_signal_errors_by_default(false));
    let sink = Rc::new(RecordingSink::default());
    quiet.engine.set_error_sink(sink.clone());
    let _ = quiet.run(quiet.engine.run_handler_async(
        HandlerSource::from("missing()"),
        &container,
        HandlerOptions::default(),
        Vec::new(),
    ));
    assert!(sink.errors.borrow().is_empty());
}

#[test]
fn writes_of_the_failing_statement_are_dropped() {
    let harness = Harness::new();
    let container = Container::new(state([("a", Value::from(0)), ("b", Value::from(0))]));

    let result = harness.run(harness.engine.run_handler_async(
        HandlerSource::from("b = 1; const fail = () => { a = 5; throw 'stop' }; fail()"),
        &container,
        HandlerOptions::default().signal_error(false),
        Vec::new(),
    ));

    assert!(result.is_err());
    assert_eq!(container.get("b").to_number(), 1.0);
    assert_eq!(container.get("a").to_number(), 0.0);
}

#[test]
fn lifecycle_moves_from_running_to_completed() {
    let harness = Harness::new();
    let container = counter();
    let slot = harness.spawn(harness.engine.run_handler_async(
        HandlerSource::from("count = 1; count = 2"),
        &container,
        HandlerOptions::new().owner("form").event("submit"),
        Vec::new(),
    ));

    harness.handle().drain_ui();
    assert!(container
        .lifecycle("form", "submit")
        .is_some_and(|lifecycle| lifecycle.is_running()));

    harness.pump_until_idle();
    assert!(slot.borrow().as_ref().is_some_and(Result::is_ok));
    assert!(matches!(
        container.lifecycle("form", "submit"),
        Some(HandlerLifecycle::Completed)
    ));
    assert_eq!(harness.engine.metrics().handlers_started(), 1);
}

#[test]
fn unmount_releases_a_waiting_handler() {
    let harness = Harness::new();
    let container = Container::new(state([]));
    let slot = harness.spawn(harness.engine.run_handler_async(
        HandlerSource::from("a = 1; b = 2"),
        &container,
        HandlerOptions::default(),
        Vec::new(),
    ));
    let handle = harness.handle();

    handle.drain_ui();
    assert!(handle.has_frame_callbacks(), "waiting for the acknowledgement");

    harness.engine.unmount(&container);
    for _ in 0..6 {
        handle.drain_ui();
    }

    assert!(slot.borrow().as_ref().is_some_and(Result::is_ok));
    assert!(!handle.has_frame_callbacks());
    assert_eq!(container.view().to_json(), expected!({"a": 1, "b": 2}));
    assert_eq!(harness.engine.metrics().commits(), 2);
    assert_eq!(harness.engine.metrics().ack_waits(), 1);
    assert_eq!(harness.frames(), 0);
}

#[test]
fn idle_statements_force_a_yield_past_the_threshold() {
    let harness = Harness::with_config(EngineConfig::default().with_idle_yield_threshold(2));
    let container = Container::new(state([]));

    harness
        .run(harness.engine.run_handler_async(
            HandlerSource::from("let a = 1; let b = 2; let c = 3; let d = 4"),
            &container,
            HandlerOptions::default(),
            Vec::new(),
        ))
        .expect("handler");

    assert_eq!(harness.engine.metrics().forced_yields(), 1);
    assert_eq!(harness.engine.metrics().commits(), 0);
    assert_eq!(harness.engine.metrics().statements(), 4);
}

#[test]
fn loop_bodies_commit_per_statement() {
    let harness = Harness::new();
    let container = Container::new(state([("total", Value::from(0))]));

    harness
        .run(harness.engine.run_handler_async(
            HandlerSource::from("for (const n of [1, 2, 3]) { total = total + n }"),
            &container,
            HandlerOptions::default(),
            Vec::new(),
        ))
        .expect("handler");

    assert_eq!(container.get("total").to_number(), 6.0);
    assert_eq!(harness.engine.metrics().commits(), 3);
}

#[test]
fn nested_calls_commit_with_their_statement() {
    let harness = Harness::new();
    let container = counter();

    harness
        .run(harness.engine.run_handler_async(
            HandlerSource::from(
                "const bump = () => { count = count + 1; count = count + 1 }; bump()",
            ),
            &container,
            HandlerOptions::default(),
            Vec::new(),
        ))
        .expect("handler");

    assert_eq!(container.get("count").to_number(), 2.0);
    assert_eq!(container.version(), 2);
    assert_eq!(harness.engine.metrics().commits(), 1);
}

#[test]
fn in_place_array_edits_commit_the_whole_array() {
    let harness = Harness::new();
    let container = Container::new(state([("todo", json(r#"{"items": ["a"]}"#))]));
    let before = container.get("todo");

    harness
        .run(harness.engine.run_handler_async(
            HandlerSource::from("todo.items.push('b'); todo.items.reverse()"),
            &container,
            HandlerOptions::default(),
            Vec::new(),
        ))
        .expect("handler");

    assert_eq!(container.get("todo").to_json(), expected!({"items": ["b", "a"]}));
    assert_eq!(before.to_json(), expected!({"items": ["a"]}));
    assert_eq!(harness.engine.metrics().commits(), 2);
}

#[test]
fn implicit_bindings_are_read_only_in_handlers() {
    let harness = Harness::new();
    let container = Container::new(state([]));
    let this = json(r#"{"id": "save", "clicks": 0}"#);

    let result = harness.run(harness.engine.run_handler_async(
        HandlerSource::from("$this.clicks = 1"),
        &container,
        HandlerOptions::new().this(this.clone()).signal_error(false),
        Vec::new(),
    ));

    assert!(matches!(result, Err(ScriptError::ReadOnlyPath { ref path }) if path == "$this.clicks"));
    assert_eq!(this.get_property("clicks").to_number(), 0.0);
}

#[test]
fn extra_context_and_arguments_are_visible() {
    let harness = Harness::new();
    let container = Container::new(state([("selected", Value::Null)]));

    harness
        .run(harness.engine.run_handler_async(
            HandlerSource::from("selected = $item.id + ':' + $param"),
            &container,
            HandlerOptions::new().extra("$item", json(r#"{"id": 4}"#)),
            vec![Value::from("tap")],
        ))
        .expect("handler");

    assert_eq!(container.get("selected").to_display(), "4:tap");
}

#[test]
fn later_statements_see_committed_state() {
    let harness = Harness::new();
    let container = Container::new(state([("user", json(r#"{"name": "Ada"}"#))]));

    let value = harness
        .run(harness.engine.run_handler_async(
            HandlerSource::from("user.name = 'Grace'; user.name.length"),
            &container,
            HandlerOptions::default(),
            Vec::new(),
        ))
        .expect("handler");

    assert_eq!(value.to_number(), 5.0);
    assert_eq!(container.get("user").get_property("name").to_display(), "Grace");
}

#[test]
fn concurrent_handlers_on_one_container_interleave_by_statement() {
    let harness = Harness::new();
    let container = Container::new(state([("a", Value::from(0))]));
    let engine = &harness.engine;

    let first = harness.spawn(engine.run_handler_async(
        HandlerSource::from("a = 1; a = 10"),
        &container,
        HandlerOptions::default(),
        Vec::new(),
    ));
    let second = harness.spawn(engine.run_handler_async(
        HandlerSource::from("a = 2"),
        &container,
        HandlerOptions::default(),
        Vec::new(),
    ));
    harness.pump_until_idle();

    assert!(first.borrow().as_ref().is_some_and(Result::is_ok));
    assert!(second.borrow().as_ref().is_some_and(Result::is_ok));
    assert_eq!(container.get("a").to_number(), 10.0);
    assert_eq!(container.version(), 3);
}

#[test]
fn callbacks_invoked_by_the_host_commit_their_writes() {
    let harness = Harness::new();
    let container = counter();
    let callback = harness
        .engine
        .run_handler_sync(
            HandlerSource::from("const set = (n) => { count = n }; set"),
            &container,
            Vec::new(),
        )
        .expect("closure");
    assert!(callback.is_callable());

    harness
        .run(
            harness
                .engine
                .invoke_callback(callback, Some(container.clone()), vec![Value::from(9)]),
        )
        .expect("callback");

    assert_eq!(container.get("count").to_number(), 9.0);
}

#[test]
fn closure_handlers_keep_statement_boundaries() {
    let harness = Harness::new();
    let container = counter();
    let handler = harness
        .engine
        .run_handler_sync(
            HandlerSource::from("const h = () => { count = 1; count = 2 }; h"),
            &container,
            Vec::new(),
        )
        .expect("closure");

    harness
        .run(harness.engine.run_handler_async(
            HandlerSource::from(handler),
            &container,
            HandlerOptions::default(),
            Vec::new(),
        ))
        .expect("handler");

    assert_eq!(container.get("count").to_number(), 2.0);
    assert_eq!(harness.engine.metrics().commits(), 2);
}

#[test]
fn writes_through_object_values_commit_to_state() {
    let harness = Harness::new();
    let container = Container::new(state([("users", json(r#"{"a": {"name": "Ada"}}"#))]));

    harness
        .run(harness.engine.run_handler_async(
            HandlerSource::from("Object.values(users)[0].name = 'x'"),
            &container,
            HandlerOptions::default(),
            Vec::new(),
        ))
        .expect("handler");

    assert_eq!(container.get("users").to_json(), expected!({"a": {"name": "x"}}));
    assert_eq!(container.version(), 1);
}

#[test]
fn writes_through_copied_arrays_reach_the_shared_element() {
    let harness = Harness::new();
    let container = Container::new(state([
        ("items", json(r#"[{"done": false}, {"done": false}]"#)),
        ("users", json(r#"{"a": {"tags": []}}"#)),
    ]));

    harness
        .run(harness.engine.run_handler_async(
            HandlerSource::from(
                "items.slice(0, 1)[0].done = true; \
                 items.concat([])[1].done = true; \
                 Object.entries(users)[0][1].tags.push('new')",
            ),
            &container,
            HandlerOptions::default(),
            Vec::new(),
        ))
        .expect("handler");

    assert_eq!(
        container.get("items").to_json(),
        expected!([{"done": true}, {"done": true}])
    );
    assert_eq!(container.get("users").to_json(), expected!({"a": {"tags": ["new"]}}));
    assert_eq!(harness.engine.metrics().commits(), 3);
}

#[test]
fn values_outside_state_stay_local() {
    let harness = Harness::new();
    let container = Container::new(state([("items", json(r#"[{"done": false}]"#))]));
    let this = json(r#"{"meta": {"clicks": 0}}"#);

    let value = harness
        .run(harness.engine.run_handler_async(
            HandlerSource::from(
                "const copy = items.map((x) => { return { done: x.done } }); \
                 copy[0].done = true; copy[0].done",
            ),
            &container,
            HandlerOptions::new().this(this.clone()),
            Vec::new(),
        ))
        .expect("handler");
    assert!(value.truthy());
    assert_eq!(container.get("items").to_json(), expected!([{"done": false}]));
    assert_eq!(container.version(), 0);

    let result = harness.run(harness.engine.run_handler_async(
        HandlerSource::from("Object.values($this)[0].clicks = 1"),
        &container,
        HandlerOptions::new().this(this.clone()).signal_error(false),
        Vec::new(),
    ));
    assert!(matches!(result, Err(ScriptError::ReadOnlyPath { ref path }) if path == "$this.meta.clicks"));
    assert_eq!(this.to_json(), expected!({"meta": {"clicks": 0}}));
}

#[test]
fn oversized_array_growth_fails_without_committing() {
    let harness = Harness::new();
    let container = Container::new(state([("items", json("[1, 2]"))]));

    for source in ["items[4294967294] = 1", "items.length = 1e10"] {
        let result = harness.run(harness.engine.run_handler_async(
            HandlerSource::from(source),
            &container,
            HandlerOptions::new().signal_error(false),
            Vec::new(),
        ));
        assert!(
            matches!(result, Err(ScriptError::LengthExceeded { limit, .. }) if limit == 1 << 20),
            "{source}: {result:?}"
        );
    }
    let error = harness
        .run(harness.engine.run_handler_async(
            HandlerSource::from("items.length = 1e10"),
            &container,
            HandlerOptions::new().signal_error(false),
            Vec::new(),
        ))
        .expect_err("too long");
    assert_eq!(error.to_string(), "invalid length 10000000000: the limit is 1048576");

    harness
        .run(harness.engine.run_handler_async(
            HandlerSource::from("items[3] = 4; items.length = 5"),
            &container,
            HandlerOptions::default(),
            Vec::new(),
        ))
        .expect("small growth");
    assert_eq!(container.get("items").to_json(), expected!([1, 2, null, 4, null]));
    assert_eq!(container.version(), 2);
}

#[test]
fn array_length_limit_follows_the_config() {
    let harness = Harness::with_config(EngineConfig::default().with_max_array_length(4));
    let container = Container::new(state([("items", json("[]"))]));

    let result = harness.run(harness.engine.run_handler_async(
        HandlerSource::from("items[3] = 'last'; items[4] = 'over'"),
        &container,
        HandlerOptions::new().signal_error(false),
        Vec::new(),
    ));

    assert!(matches!(result, Err(ScriptError::LengthExceeded { limit: 4, .. })));
    assert_eq!(container.get("items").to_json(), expected!([null, null, null, "last"]));
}

#[test]
fn spawned_failures_are_logged_at_debug() {
    let harness = Harness::new();
    let container = counter();
    capture_logs();

    harness
        .engine
        .spawn_handler(
            HandlerSource::from("count = 1; missing()"),
            &container,
            HandlerOptions::new().signal_error(false),
            Vec::new(),
        )
        .expect("runtime alive");
    let action = harness
        .engine
        .lookup_action(
            &HandlerSource::from("throw 'nope'"),
            &container,
            HandlerOptions::new().signal_error(false),
        )
        .expect("parsed")
        .expect("action");
    action.spawn(Vec::new()).expect("runtime alive");
    harness.pump_until_idle();

    let logs = captured_logs();
    assert!(
        logs.iter()
            .any(|line| line.starts_with("DEBUG: spawned handler failed:")),
        "{logs:?}"
    );
    assert!(
        logs.iter()
            .any(|line| line.starts_with("DEBUG: spawned action failed: ")),
        "{logs:?}"
    );
    assert_eq!(container.get("count").to_number(), 1.0);
}
