use std::sync::Arc;
use std::task::{Wake, Waker};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::test_support::{json, state};
use crate::tracker::{ChangeAction, ChangeRecord};
use crate::{Container, HandlerLifecycle, ScriptError, Value};
use serde_json::json as expected;

fn change(path: &[&str], new_value: Value) -> ChangeRecord {
    ChangeRecord {
        path: path.iter().map(|segment| segment.to_string()).collect(),
        new_value,
        target: Value::Undefined,
        action: ChangeAction::Set,
    }
}

#[derive(Default)]
struct CountingWake(AtomicUsize);

impl Wake for CountingWake {
    fn wake(self: Arc<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn commit_copies_the_changed_path_only() {
    let container = Container::new(state([
        ("profile", json(r#"{"name": "Ada", "address": {"city": "London"}}"#)),
        ("settings", json(r#"{"theme": "light"}"#)),
    ]));
    let before = container.view();

    container.state_part_changed(&change(&["profile", "name"], Value::from("Grace")));

    let after = container.view();
    assert!(!after.shallow_eq(&before));
    assert!(!after
        .get_property("profile")
        .shallow_eq(&before.get_property("profile")));
    assert!(after
        .get_property("settings")
        .shallow_eq(&before.get_property("settings")));
    assert!(after
        .get_property("profile")
        .get_property("address")
        .shallow_eq(&before.get_property("profile").get_property("address")));
    assert_eq!(
        before.get_property("profile").get_property("name").to_display(),
        "Ada",
        "older views stay consistent"
    );
    assert_eq!(container.get("profile").get_property("name").to_display(), "Grace");
    assert_eq!(container.version(), 1);
}

#[test]
fn child_writes_to_inherited_names_reach_the_owner() {
    let parent = Container::new(state([("total", Value::from(1))]));
    let child = Container::with_parent(&parent, state([("local", Value::from(0))]));

    child.state_part_changed(&change(&["total"], Value::from(5)));
    child.state_part_changed(&change(&["local"], Value::from(2)));
    child.state_part_changed(&change(&["fresh"], Value::from(3)));

    assert_eq!(parent.get("total").to_number(), 5.0);
    assert!(!parent.owns("local"));
    assert!(!parent.owns("fresh"));
    assert_eq!(child.get("total").to_number(), 5.0);
    assert_eq!(child.view().to_json(), expected!({"total": 5, "local": 2, "fresh": 3}));
}

#[test]
fn child_view_shadows_parent_names() {
    let parent = Container::new(state([("title", Value::from("outer")), ("n", Value::from(1))]));
    let child = Container::with_parent(&parent, state([("title", Value::from("inner"))]));
    assert_eq!(child.get("title").to_display(), "inner");
    assert_eq!(child.view().get_property("n").to_number(), 1.0);
}

#[test]
fn array_commits_resize_and_fill() {
    let container = Container::new(state([("items", json("[1, 2]"))]));
    container.state_part_changed(&change(&["items", "3"], Value::from(4)));
    assert_eq!(container.get("items").to_json(), expected!([1, 2, null, 4]));

    container.state_part_changed(&change(&["items", "length"], Value::from(1)));
    assert_eq!(container.get("items").to_json(), expected!([1]));
}

#[test]
fn unset_removes_the_member() {
    let container = Container::new(state([("draft", json(r#"{"a": 1, "b": 2}"#))]));
    let mut record = change(&["draft", "a"], Value::Undefined);
    record.action = ChangeAction::Unset;
    container.state_part_changed(&record);
    assert_eq!(container.get("draft").to_json(), expected!({"b": 2}));
}

#[test]
fn unmount_wakes_registered_waiters_once() {
    let container = Container::new(state([]));
    let wake = Arc::new(CountingWake::default());
    let waker = Waker::from(wake.clone());
    container.register_unmount_waker(&waker);
    container.register_unmount_waker(&waker);

    container.unmount();
    container.unmount();

    assert!(!container.is_mounted());
    assert_eq!(wake.0.load(Ordering::SeqCst), 1);
}

#[test]
fn lifecycle_is_tracked_per_owner_and_event() {
    let container = Container::new(state([]));
    assert!(container.lifecycle("button", "click").is_none());

    container.set_lifecycle("button", "click", HandlerLifecycle::Running);
    container.set_lifecycle(
        "field",
        "change",
        HandlerLifecycle::Error(ScriptError::ReadOnlyEvaluation),
    );

    assert!(container
        .lifecycle("button", "click")
        .is_some_and(|lifecycle| lifecycle.is_running()));
    assert!(matches!(
        container.lifecycle("field", "change"),
        Some(HandlerLifecycle::Error(ScriptError::ReadOnlyEvaluation))
    ));
}

#[test]
fn oversized_array_records_are_ignored() {
    let container = Container::new(state([("items", json("[1]"))]));

    container.state_part_changed(&change(&["items", "length"], Value::from(1e10)));
    container.state_part_changed(&change(&["items", "4294967294"], Value::from(2)));
    assert_eq!(container.get("items").to_json(), expected!([1]));

    container.state_part_changed(&change(&["items", "length"], Value::from(3)));
    assert_eq!(container.get("items").to_json(), expected!([1, null, null]));
}
