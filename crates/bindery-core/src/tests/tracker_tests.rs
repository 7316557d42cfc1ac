use crate::test_support::json;
use crate::tracker::{ChangeAction, MutationTracker, StatePath, TrackedState};
use crate::{ScriptError, Value};
use serde_json::json as expected;

fn path(segments: &[&str]) -> StatePath {
    segments.iter().map(|segment| segment.to_string()).collect()
}

#[test]
fn nested_write_produces_one_record_and_leaves_source_alone() {
    let source = json(r#"{"a": {"b": 1, "c": 2}}"#);
    let mut tracked = TrackedState::new(&source, '$');

    tracked.set(&["a", "b"], Value::from(5)).expect("set");

    let changes = tracked.take_changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].path_string(), "a.b");
    assert_eq!(changes[0].action, ChangeAction::Set);
    assert_eq!(changes[0].new_value.to_json(), expected!(5));
    assert_eq!(changes[0].target.to_json(), expected!({"b": 5, "c": 2}));

    assert_eq!(source.to_json(), expected!({"a": {"b": 1, "c": 2}}));
    assert_eq!(
        tracked.snapshot().to_json(),
        expected!({"a": {"b": 5, "c": 2}})
    );
}

#[test]
fn reserved_paths_are_rejected_before_recording() {
    let source = json(r#"{"$this": {"x": 1}}"#);
    let mut tracked = TrackedState::new(&source, '$');

    let error = tracked
        .set(&["$this", "x"], Value::from(2))
        .expect_err("read-only");
    assert!(matches!(error, ScriptError::ReadOnlyPath { ref path } if path == "$this.x"));
    assert!(tracked.take_changes().is_empty());
    assert_eq!(tracked.snapshot().to_json(), expected!({"$this": {"x": 1}}));
}

#[test]
fn custom_sigil_is_honoured() {
    let mut tracker = MutationTracker::new('#');
    assert!(tracker.check_writable(&path(&["$free"])).is_ok());
    assert!(tracker
        .record_set(path(&["#own"]), &Value::from(1), Value::Undefined)
        .is_err());
    assert!(!tracker.has_changes());
}

#[test]
fn recorded_values_do_not_follow_later_edits() {
    let mut tracker = MutationTracker::new('$');
    let list = Value::array(vec![Value::from(1)]);
    tracker
        .record_set(path(&["items"]), &list, Value::Undefined)
        .expect("record");

    if let Value::Array(items) = &list {
        items.borrow_mut().push(Value::from(2));
    }

    assert_eq!(tracker.changes()[0].new_value.to_json(), expected!([1]));
}

#[test]
fn first_registered_path_wins() {
    let mut tracker = MutationTracker::new('$');
    let shared = json(r#"{"n": 1}"#);
    tracker.register(&shared, path(&["first"]));
    tracker.register(&shared, path(&["second"]));
    assert_eq!(tracker.path_of(&shared), Some(&path(&["first"])));

    let child = shared.get_property("n");
    tracker.register_child(&shared, "n", &child);
    assert!(!tracker.is_tracked(&child), "scalars are never tracked");
}

#[test]
fn unset_records_removal() {
    let source = json(r#"{"draft": {"title": "x", "body": "y"}}"#);
    let mut tracked = TrackedState::new(&source, '$');

    tracked.unset(&["draft", "body"]).expect("unset");

    let changes = tracked.take_changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].action, ChangeAction::Unset);
    assert_eq!(tracked.snapshot().to_json(), expected!({"draft": {"title": "x"}}));
}

#[test]
fn writing_below_a_scalar_fails() {
    let source = json(r#"{"count": 1}"#);
    let mut tracked = TrackedState::new(&source, '$');
    let error = tracked
        .set(&["count", "x"], Value::from(1))
        .expect_err("not a container");
    assert!(matches!(error, ScriptError::UndefinedMember { .. }));
}
