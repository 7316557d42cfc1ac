use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use bindery_core::{ApiClient, ApiError, ApiRequest, LocalFuture, Value};

type Route = (String, String);

/// [`ApiClient`] answering from canned responses, keyed by method and URL.
///
/// Responses queued for the same route are served in order; the last one
/// keeps answering once the queue is down to it. Requests without a route
/// fail with a 404. Every request is recorded for later assertions.
#[derive(Default)]
pub struct ScriptedApiClient {
    routes: RefCell<HashMap<Route, VecDeque<Result<Value, ApiError>>>>,
    requests: RefCell<Vec<ApiRequest>>,
}

impl ScriptedApiClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for `method url`.
    pub fn respond(&self, method: &str, url: &str, response: Result<Value, ApiError>) -> &Self {
        self.routes
            .borrow_mut()
            .entry((method.to_ascii_uppercase(), url.to_string()))
            .or_default()
            .push_back(response);
        self
    }

    pub fn respond_json(&self, method: &str, url: &str, body: serde_json::Value) -> &Self {
        self.respond(method, url, Ok(Value::from(body)))
    }

    pub fn fail(&self, method: &str, url: &str, status: u16, message: &str) -> &Self {
        self.respond(method, url, Err(ApiError::new(Some(status), message)))
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.borrow().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }

    fn answer(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        let route = (request.method.clone(), request.url.clone());
        let mut routes = self.routes.borrow_mut();
        let Some(queue) = routes.get_mut(&route) else {
            log::debug!("no scripted response for {} {}", route.0, route.1);
            return Err(ApiError::new(
                Some(404),
                format!("no scripted response for {} {}", route.0, route.1),
            ));
        };
        match queue.pop_front() {
            Some(response) if !queue.is_empty() => response,
            Some(last) => {
                queue.push_back(last.clone());
                last
            }
            None => Err(ApiError::new(Some(404), "empty route")),
        }
    }
}

impl ApiClient for ScriptedApiClient {
    fn execute(&self, request: ApiRequest) -> LocalFuture<'static, Result<Value, ApiError>> {
        let response = self.answer(&request);
        self.requests.borrow_mut().push(request);
        Box::pin(std::future::ready(response))
    }
}
