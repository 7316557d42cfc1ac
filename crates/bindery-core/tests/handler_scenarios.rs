use std::cell::Cell;
use std::rc::Rc;

use bindery_core::{Container, HandlerLifecycle, HandlerOptions, NativeFunction, ScriptError, Value};
use bindery_testing::{run_test_engine, EngineTestRule};

#[test]
fn counter_increments_three_times() {
    run_test_engine(|rule| {
        let container = rule.container([("count", Value::from(0))]);
        for _ in 0..3 {
            rule.run_handler("count = count + 1", &container, HandlerOptions::default(), Vec::new())
                .expect("increment");
        }
        assert_eq!(container.view().to_json(), serde_json::json!({"count": 3}));
        assert_eq!(container.version(), 3);
        assert_eq!(rule.frames(), 3);
    });
}

#[test]
fn a_reader_between_frames_sees_whole_statements() {
    let rule = EngineTestRule::new();
    let container = rule.container([]);
    let slot = rule.spawn_handler(
        "x = 1; y = x + 1; z = y + 1",
        &container,
        HandlerOptions::default(),
        Vec::new(),
    );

    let mut observed = Vec::new();
    while !slot.is_done() {
        rule.drain();
        observed.push(container.view().to_json());
        rule.advance_frame();
    }

    assert_eq!(
        observed[..3],
        [
            serde_json::json!({"x": 1}),
            serde_json::json!({"x": 1, "y": 2}),
            serde_json::json!({"x": 1, "y": 2, "z": 3}),
        ]
    );
    assert_eq!(container.version(), 3);
}

#[test]
fn failure_after_a_commit_is_recorded_and_returned() {
    let rule = EngineTestRule::new();
    let container = rule.container([("count", Value::from(0))]);

    let result = rule.run_handler(
        "count = count + 1; throw 'nope'; count = 100",
        &container,
        HandlerOptions::new().owner("counter").event("click").signal_error(false),
        Vec::new(),
    );

    assert!(matches!(result, Err(ScriptError::Thrown(_))));
    assert_eq!(container.get("count").to_number(), 1.0);
    assert!(matches!(
        container.lifecycle("counter", "click"),
        Some(HandlerLifecycle::Error(_))
    ));
}

#[test]
fn rebinding_after_a_commit_recomputes_only_changed_dependencies() {
    let rule = EngineTestRule::new();
    let engine = rule.engine();
    let container = rule.container([("first", Value::from("Ada")), ("clicks", Value::from(0))]);
    let renders = Rc::new(Cell::new(0));
    let counter = renders.clone();
    let services = Value::object_from([(
        "shout",
        Value::from(NativeFunction::sync("shout", move |args| {
            counter.set(counter.get() + 1);
            Ok(Value::from(args.first().cloned().unwrap_or_default().to_display().to_uppercase()))
        })),
    )]);

    let title = |container: &Container| {
        engine
            .evaluate(container.id(), "{shout(first)}", &container.view(), Some(&services))
            .expect("binding")
            .to_display()
    };
    assert_eq!(title(&container), "ADA");

    rule.run_handler("clicks++", &container, HandlerOptions::default(), Vec::new())
        .expect("click");
    assert_eq!(title(&container), "ADA");
    assert_eq!(renders.get(), 1);

    rule.run_handler("first = 'Grace'", &container, HandlerOptions::default(), Vec::new())
        .expect("rename");
    assert_eq!(title(&container), "GRACE");
    assert_eq!(renders.get(), 2);

    engine.unmount(&container);
    assert_eq!(engine.caches().memo_len(), 0);
}

#[test]
fn nested_containers_share_inherited_state() {
    let rule = EngineTestRule::new();
    let page = rule.container([("total", Value::from(0))]);
    let row = Container::with_parent(&page, {
        let mut own = bindery_core::ObjectMap::new();
        own.insert("price".into(), Value::from(5));
        own
    });

    rule.run_handler(
        "total = total + price; touched = true",
        &row,
        HandlerOptions::default(),
        Vec::new(),
    )
    .expect("add");

    assert_eq!(page.get("total").to_number(), 5.0);
    assert!(!page.owns("touched"));
    assert!(row.get("touched").truthy());
}

#[test]
fn list_rows_pass_their_item_as_extra_context() {
    let rule = EngineTestRule::new();
    let engine = rule.engine();
    let container = rule.container([("selected", Value::Null)]);
    let items = ["a", "b", "c"];

    let actions: Vec<_> = items
        .iter()
        .map(|item| {
            engine
                .lookup_action(
                    &"selected = $item".into(),
                    &container,
                    HandlerOptions::new().event("click").extra("$item", Value::from(*item)),
                )
                .expect("parse")
                .expect("action")
        })
        .collect();

    rule.run(actions[1].call(Vec::new())).expect("select");
    assert_eq!(container.get("selected").to_display(), "b");
    assert_eq!(engine.caches().action_len(), 0);
}
