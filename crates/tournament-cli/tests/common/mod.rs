//! Mock judge endpoints for transport and command tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const OLLAMA_ROUTE: &str = "/api/generate";

/// Server answering every `POST route` with `response`.
pub async fn judge_server(route: &str, response: ResponseTemplate) -> MockServer {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(route))
        .respond_with(response)
        .mount(&mock_server)
        .await;
    mock_server
}

/// Ollama `/api/generate` reply carrying `text`.
pub fn ollama_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "model": "phi4",
        "response": text,
        "done": true
    }))
}

/// JSON bodies of every request the server received, in arrival order.
pub async fn request_bodies(mock_server: &MockServer) -> Vec<Value> {
    mock_server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|request| request.body_json().expect("request body should be JSON"))
        .collect()
}

/// Judge verdict favouring the first-listed contender, wrapped in prose.
pub fn verdict_text() -> String {
    "Both are solid.\n```json\n{\"criteria_scores\": {\"quality\": {\"contender1\": 7, \"contender2\": 5}}, \
     \"contender1_score\": 7, \"contender2_score\": 5, \"winner\": null, \"rationale\": \"first is tighter\"}\n```"
        .to_string()
}
