use super::*;
use crate::ScriptedApiClient;
use bindery_core::{ApiClient, ApiRequest};

#[test]
fn engine_test_rule_steps_through_commits() {
    run_test_engine(|rule| {
        let container = rule.container([("count", Value::from(0))]);
        let slot = rule.spawn_handler(
            "count = 1; count = 2",
            &container,
            HandlerOptions::default(),
            Vec::new(),
        );
        assert_eq!(rule.frame_requests(), 1, "spawning requests a frame");

        rule.drain();
        assert_eq!(container.get("count").to_number(), 1.0);
        assert!(!slot.is_done());

        rule.advance_frame();
        rule.drain();
        assert_eq!(container.get("count").to_number(), 2.0);

        let frames = rule.pump_until_idle();
        assert_eq!(frames, 1);
        assert_eq!(rule.frames(), 2);
        assert_eq!(rule.frame_time_nanos(), 2 * FRAME_NANOS);
        assert!(slot.take().is_some_and(|result| result.is_ok()));
    });
}

#[test]
fn run_handler_returns_the_handler_value() {
    let rule = EngineTestRule::new();
    let container = rule.container([("name", Value::from("ada"))]);
    let value = rule
        .run_handler(
            "name = name.toUpperCase(); name",
            &container,
            HandlerOptions::default(),
            Vec::new(),
        )
        .expect("handler");
    assert_eq!(value.to_display(), "ADA");
    assert_eq!(container.get("name").to_display(), "ADA");
}

#[test]
fn pump_is_a_no_op_when_idle() {
    let rule = EngineTestRule::new();
    assert_eq!(rule.pump_until_idle(), 0);
    assert_eq!(rule.frames(), 0);
}

#[test]
fn scripted_client_serves_routes_in_order() {
    let client = ScriptedApiClient::new();
    client
        .respond_json("get", "/n", serde_json::json!(1))
        .respond_json("GET", "/n", serde_json::json!(2));
    let request = |url: &str| ApiRequest {
        url: url.to_string(),
        method: "GET".into(),
        body: None,
        query: Default::default(),
        headers: Default::default(),
    };

    let rule = EngineTestRule::new();
    let answers: Vec<_> = (0..3)
        .map(|_| rule.run(client_call(&client, request("/n"))))
        .collect();
    let numbers: Vec<f64> = answers
        .iter()
        .map(|answer| answer.as_ref().map(Value::to_number).unwrap_or(f64::NAN))
        .collect();
    assert_eq!(numbers, vec![1.0, 2.0, 2.0]);

    let missing = rule.run(client_call(&client, request("/other")));
    assert!(missing.is_err());
    assert_eq!(client.request_count(), 4);
}

fn client_call(
    client: &ScriptedApiClient,
    request: ApiRequest,
) -> impl Future<Output = Result<Value, ScriptError>> + 'static {
    let response = client.execute(request);
    async move {
        response
            .await
            .map_err(|error| ScriptError::Thrown(Value::from(error.message)))
    }
}
