use std::cell::Cell;
use std::rc::Rc;

use crate::dependencies::collect_dependencies;
use crate::fragment_cache::ParsedPropertyValue;
use crate::test_support::{json, state, Harness};
use crate::{EngineConfig, NativeFunction, ScriptError, Value};

const SCOPE: usize = 7;

fn counting_service(calls: Rc<Cell<usize>>) -> Value {
    let echo = NativeFunction::sync("echo", move |args| {
        calls.set(calls.get() + 1);
        Ok(args.first().cloned().unwrap_or_default())
    });
    Value::object_from([("echo", Value::from(echo))])
}

#[test]
fn whitespace_around_a_single_expression_yields_the_raw_value() {
    let harness = Harness::new();
    let scope = Value::object(state([("count", Value::from(3))]));

    let value = harness
        .engine
        .evaluate(SCOPE, "  {count}  ", &scope, None)
        .expect("evaluate");
    assert!(value.strict_eq(&Value::from(3)));
}

#[test]
fn literal_only_properties_come_back_verbatim() {
    let harness = Harness::new();
    let scope = Value::object(state([]));
    let engine = &harness.engine;

    assert_eq!(engine.evaluate(SCOPE, "Save", &scope, None).unwrap().to_display(), "Save");
    assert_eq!(engine.evaluate(SCOPE, "   ", &scope, None).unwrap().to_display(), "   ");
    assert_eq!(engine.evaluate(SCOPE, "", &scope, None).unwrap().to_display(), "");
}

#[test]
fn mixed_segments_concatenate_and_skip_nullish() {
    let harness = Harness::new();
    let scope = Value::object(state([
        ("user", json(r#"{"name": "Ada"}"#)),
        ("nothing", Value::Null),
    ]));

    let greeting = harness
        .engine
        .evaluate(SCOPE, "Hello {user.name}!{nothing}{missing}", &scope, None)
        .expect("evaluate");
    assert_eq!(greeting.to_display(), "Hello Ada!");
}

#[test]
fn unchanged_dependencies_skip_recomputation() {
    let harness = Harness::new();
    let calls = Rc::new(Cell::new(0));
    let services = counting_service(calls.clone());
    let engine = &harness.engine;

    let first_state = Value::object(state([("a", Value::from(1)), ("b", Value::from(1))]));
    engine
        .evaluate(SCOPE, "{echo(a)}", &first_state, Some(&services))
        .expect("evaluate");
    engine
        .evaluate(SCOPE, "{echo(a)}", &first_state, Some(&services))
        .expect("evaluate");
    assert_eq!(calls.get(), 1);

    // A new root with the same projection is still a hit.
    let unrelated_change = Value::object(state([("a", Value::from(1)), ("b", Value::from(2))]));
    engine
        .evaluate(SCOPE, "{echo(a)}", &unrelated_change, Some(&services))
        .expect("evaluate");
    assert_eq!(calls.get(), 1);

    let relevant_change = Value::object(state([("a", Value::from(2)), ("b", Value::from(2))]));
    let value = engine
        .evaluate(SCOPE, "{echo(a)}", &relevant_change, Some(&services))
        .expect("evaluate");
    assert_eq!(calls.get(), 2);
    assert_eq!(value.to_number(), 2.0);
}

#[test]
fn memo_cells_are_per_scope_and_dropped_with_it() {
    let harness = Harness::new();
    let calls = Rc::new(Cell::new(0));
    let services = counting_service(calls.clone());
    let engine = &harness.engine;
    let scope_state = Value::object(state([("a", Value::from(1))]));

    engine
        .evaluate(1, "{echo(a)}", &scope_state, Some(&services))
        .unwrap();
    engine
        .evaluate(2, "{echo(a)}", &scope_state, Some(&services))
        .unwrap();
    assert_eq!(calls.get(), 2);
    assert_eq!(engine.caches().memo_len(), 2);

    engine.dispose_scope(1);
    assert_eq!(engine.caches().memo_len(), 1);
    engine
        .evaluate(1, "{echo(a)}", &scope_state, Some(&services))
        .unwrap();
    assert_eq!(calls.get(), 3);
}

#[test]
fn parsing_twice_gives_new_ids_and_equal_results() {
    let harness = Harness::new();
    let scope = Value::object(state([("price", Value::from(4)), ("qty", Value::from(3))]));
    let first = ParsedPropertyValue::parse("Total: {price * qty}").expect("parse");
    let second = ParsedPropertyValue::parse("Total: {price * qty}").expect("parse");
    assert_ne!(first.id, second.id);

    let a = harness.engine.evaluate_parsed(SCOPE, &first, &scope, None).unwrap();
    let b = harness.engine.evaluate_parsed(SCOPE, &second, &scope, None).unwrap();
    assert_eq!(a.to_display(), "Total: 12");
    assert!(a.strict_eq(&b));
}

#[test]
fn fragment_cache_reuses_parses_by_text() {
    let harness = Harness::new();
    let first = harness.engine.parse_property("{a + 1}").unwrap();
    let second = harness.engine.parse_property("{a + 1}").unwrap();
    assert!(Rc::ptr_eq(&first, &second));
    assert!(harness.engine.parse_property("{a +}").is_err());
    assert_eq!(harness.engine.caches().fragments().len(), 1);
}

#[test]
fn dependencies_are_free_paths_only() {
    let parsed =
        ParsedPropertyValue::parse("{user.profile.name} {items.filter(x => x.price > limit)}")
            .expect("parse");
    let dependencies = collect_dependencies(&parsed.segments);
    assert_eq!(
        dependencies.to_vec(),
        vec![
            "user.profile.name".to_string(),
            "items".to_string(),
            "limit".to_string()
        ]
    );
}

#[test]
fn services_are_consulted_after_state() {
    let harness = Harness::new();
    let scope = Value::object(state([("label", Value::from("state"))]));
    let services = Value::object_from([
        ("label", Value::from("service")),
        ("locale", Value::from("en")),
    ]);
    let value = harness
        .engine
        .evaluate(SCOPE, "{label}/{locale}", &scope, Some(&services))
        .unwrap();
    assert_eq!(value.to_display(), "state/en");
}

#[test]
fn bindings_cannot_write_state() {
    let harness = Harness::new();
    let scope = Value::object(state([("count", Value::from(1)), ("items", json("[3, 1]"))]));
    let engine = &harness.engine;

    for property in ["{count = 5}", "{count++}", "{items.push(4)}", "{items.sort()}"] {
        let error = engine
            .evaluate(SCOPE, property, &scope, None)
            .expect_err(property);
        assert!(
            matches!(error, ScriptError::ReadOnlyEvaluation),
            "{property}: {error}"
        );
    }
    assert_eq!(scope.to_json(), serde_json::json!({"count": 1, "items": [3, 1]}));
}

#[test]
fn bindings_cannot_write_through_services() {
    let harness = Harness::new();
    let scope = Value::object(state([]));
    let services = Value::object_from([("config", json(r#"{"theme": "light"}"#))]);
    let error = harness
        .engine
        .evaluate(SCOPE, "{config.theme = 'dark'}", &scope, Some(&services))
        .expect_err("read-only");
    assert!(matches!(error, ScriptError::ReadOnlyEvaluation));
}

#[test]
fn bindings_cannot_write_through_values_handed_out_by_builtins() {
    let harness = Harness::new();
    let scope = Value::object(state([
        ("users", json(r#"{"a": {"name": "Ada"}}"#)),
        ("items", json(r#"[{"done": false}]"#)),
    ]));
    let engine = &harness.engine;

    for property in [
        "{Object.values(users)[0].name = 'hacked'}",
        "{Object.entries(users)[0][1].name = 'hacked'}",
        "{items.slice(0, 1)[0].done = true}",
        "{items.concat([])[0].done = true}",
    ] {
        let error = engine
            .evaluate(SCOPE, property, &scope, None)
            .expect_err(property);
        assert!(
            matches!(error, ScriptError::ReadOnlyEvaluation),
            "{property}: {error}"
        );
    }
    assert_eq!(
        scope.to_json(),
        serde_json::json!({"users": {"a": {"name": "Ada"}}, "items": [{"done": false}]})
    );
}

#[test]
fn bindings_may_edit_objects_they_created() {
    let harness = Harness::new();
    let scope = Value::object(state([("users", json(r#"{"a": {"name": "Ada"}}"#))]));
    let value = harness
        .engine
        .evaluate(
            SCOPE,
            "{[{ n: 0 }].map((x) => { x.n = Object.values(users).length + 1; return x })[0]}",
            &scope,
            None,
        )
        .unwrap();
    assert_eq!(value.to_json(), serde_json::json!({"n": 2}));
}

#[test]
fn bindings_may_use_local_scratch_values() {
    let harness = Harness::new();
    let scope = Value::object(state([("items", json("[3, 1, 2]"))]));
    let value = harness
        .engine
        .evaluate(SCOPE, "{items.slice().sort().join(',')}", &scope, None)
        .unwrap();
    assert_eq!(value.to_display(), "1,2,3");
}

#[test]
fn member_access_on_nullish_depends_on_config() {
    let scope = Value::object(state([("user", Value::Null)]));

    let strict = Harness::new();
    let error = strict
        .engine
        .evaluate(SCOPE, "{user.name}", &scope, None)
        .expect_err("null member");
    assert!(matches!(
        error,
        ScriptError::UndefinedMember { ref property, target: "null" } if property == "name"
    ));
    let optional = strict
        .engine
        .evaluate(SCOPE + 1, "{user?.name}", &scope, None)
        .unwrap();
    assert!(optional.is_undefined());

    let lenient = Harness::with_config(EngineConfig::default().with_optional_member_access(true));
    assert!(lenient
        .engine
        .evaluate(SCOPE, "{user.name}", &scope, None)
        .unwrap()
        .is_undefined());
}

#[test]
fn typed_accessors_coerce() {
    let harness = Harness::new();
    let scope = Value::object(state([
        ("width", Value::from(12)),
        ("ratio", Value::from(7.9)),
        ("text", Value::from("42")),
        ("flag", Value::Bool(true)),
        ("answer", Value::from("False")),
        ("word", Value::from("yes")),
        ("zero", Value::from(0)),
        ("empty", Value::from("")),
    ]));
    let extractor = harness.engine.extractor(SCOPE, scope, None);

    assert_eq!(extractor.as_number("{text}").unwrap(), 42.0);
    assert!(matches!(
        extractor.as_number("{flag}"),
        Err(ScriptError::TypeMismatch { expected: "number", .. })
    ));
    assert!(extractor.as_number("{missing}").is_err());
    assert_eq!(extractor.as_optional_number("{missing}", 4.0).unwrap(), 4.0);
    assert_eq!(extractor.as_integer("{ratio}").unwrap(), 7);

    assert!(!extractor.as_boolean("{answer}").unwrap());
    assert!(extractor.as_boolean("{word}").unwrap());
    assert!(!extractor.as_boolean("{zero}").unwrap());
    assert!(!extractor.as_boolean("{empty}").unwrap());
    assert!(!extractor.as_boolean("{missing}").unwrap());
    assert!(extractor.as_optional_boolean("{missing}", true).unwrap());
    assert!(extractor.as_boolean("{flag}").unwrap());

    assert_eq!(extractor.as_size("{width}").unwrap().as_deref(), Some("12px"));
    assert_eq!(extractor.as_size("50%").unwrap().as_deref(), Some("50%"));
    assert_eq!(extractor.as_size("{missing}").unwrap(), None);

    assert_eq!(extractor.as_string("{missing}").unwrap(), "");
    assert_eq!(extractor.as_optional_string("{missing}").unwrap(), None);
    assert_eq!(extractor.as_display_text("{ratio}").unwrap(), "7.9");
}

#[test]
fn state_sigil_sees_every_commit() {
    let harness = Harness::new();
    let first = Value::object(state([("n", Value::from(1))]));
    let second = Value::object(state([("n", Value::from(2))]));
    let engine = &harness.engine;
    assert_eq!(engine.evaluate(SCOPE, "{$state.n}", &first, None).unwrap().to_number(), 1.0);
    assert_eq!(engine.evaluate(SCOPE, "{$state.n}", &second, None).unwrap().to_number(), 2.0);
}
