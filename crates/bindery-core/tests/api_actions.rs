use std::rc::Rc;

use bindery_core::{ActionError, HandlerOptions, ScriptError, Value};
use bindery_testing::{EngineTestRule, ScriptedApiClient};
use serde_json::json;

fn rule_with_client() -> (EngineTestRule, Rc<ScriptedApiClient>) {
    let rule = EngineTestRule::new();
    let client = Rc::new(ScriptedApiClient::new());
    rule.engine().set_api_client(client.clone());
    (rule, client)
}

#[test]
fn loading_a_list_into_state() {
    let (rule, client) = rule_with_client();
    client.respond_json("GET", "/todos", json!([{"id": 1, "done": false}, {"id": 2, "done": true}]));
    let container = rule.container([("todos", Value::array(Vec::new())), ("loading", Value::Bool(false))]);

    rule.run_handler(
        "loading = true; todos = Actions.callApi('/todos'); loading = false",
        &container,
        HandlerOptions::default(),
        Vec::new(),
    )
    .expect("load");

    assert_eq!(
        container.view().to_json(),
        json!({"todos": [{"id": 1, "done": false}, {"id": 2, "done": true}], "loading": false})
    );
    let open = rule
        .engine()
        .evaluate(
            container.id(),
            "{todos.filter(t => !t.done).length} open",
            &container.view(),
            None,
        )
        .expect("binding");
    assert_eq!(open.to_display(), "1 open");
}

#[test]
fn posting_a_form() {
    let (rule, client) = rule_with_client();
    client.respond_json("POST", "/users", json!({"id": 42}));
    let container = rule.container([("name", Value::from("Ada")), ("createdId", Value::Null)]);

    rule.run_handler(
        "const created = Actions.callApi({url: '/users', method: 'POST', body: {name}, \
         headers: {'X-Trace': 'abc'}}); createdId = created.id",
        &container,
        HandlerOptions::default(),
        Vec::new(),
    )
    .expect("post");

    assert_eq!(container.get("createdId").to_number(), 42.0);
    let requests = client.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body, Some(json!({"name": "Ada"})));
    assert_eq!(requests[0].headers.get("X-Trace").map(String::as_str), Some("abc"));
}

#[test]
fn server_errors_reach_the_caller_unless_handled() {
    let (rule, client) = rule_with_client();
    client.fail("DELETE", "/users/1", 500, "boom");
    let container = rule.container([("error", Value::Null)]);

    let result = rule.run_handler(
        "Actions.callApi({url: '/users/1', method: 'delete'})",
        &container,
        HandlerOptions::new().signal_error(false),
        Vec::new(),
    );
    assert!(matches!(
        result,
        Err(ScriptError::Action(ActionError::Api { status: Some(500), .. }))
    ));

    rule.run_handler(
        "Actions.callApi({url: '/users/1', method: 'delete', \
         onError: (e) => { error = e.message; return false }})",
        &container,
        HandlerOptions::default(),
        Vec::new(),
    )
    .expect("handled");
    assert_eq!(container.get("error").to_display(), "boom");
    assert_eq!(client.request_count(), 2);
}

#[test]
fn try_catch_sees_action_failures() {
    let (rule, _client) = rule_with_client();
    let container = rule.container([("message", Value::Null)]);

    rule.run_handler(
        "try { Actions.callApi('/missing') } catch (e) { message = e.name }",
        &container,
        HandlerOptions::default(),
        Vec::new(),
    )
    .expect("caught");

    assert_eq!(container.get("message").to_display(), "ActionError");
}
