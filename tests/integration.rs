// Integration tests
//
// End-to-end tests exercising the full request path:
// request → validate → token resolution → responses stream → moderation → SSE
//
// Uses wiremock for the model server, the shield endpoint and the MaaS
// issuer, and tower::ServiceExt::oneshot for in-process HTTP. Everything
// else is the production wiring built from config.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use genai_bff::config::{self, StringSource};
use genai_bff::proxy::{self, AppState, RESPONSES_PATH, USER_HEADER};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config_yaml(llama_stack: &str, on_failure: &str, maas: Option<&str>) -> String {
    let mut yaml = format!(
        r#"bff: v1
environment: test
llama_stack:
  url: "{llama_stack}"
  timeout_ms: 5000
moderation:
  on_failure: {on_failure}
  min_words: 1
  max_words: 30
  timeout_ms: 2000
  violation_message: "This response was blocked."
"#
    );
    if let Some(url) = maas {
        yaml.push_str(&format!(
            r#"maas:
  url: "{url}"
  token_ttl_secs: 600
  cache_ttl_secs: 540
"#
        ));
    }
    yaml
}

fn app(yaml: &str) -> axum::Router {
    let config = config::load_config(&StringSource::new(yaml)).expect("test config loads");
    let (state, _cache) = AppState::from_config(&config);
    proxy::build_router(state)
}

/// SSE body the model server would send for the given events.
fn sse_body(events: &[Value]) -> String {
    let mut body = String::new();
    for event in events {
        body.push_str("event: ");
        body.push_str(event["type"].as_str().unwrap_or("message"));
        body.push('\n');
        body.push_str(&format!("data: {event}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn response_events(sentences: &[&str]) -> Vec<Value> {
    let mut events = vec![
        json!({"type": "response.created", "sequence_number": 0,
               "response": {"id": "resp_42", "model": "llama-3", "status": "in_progress", "created_at": 1}}),
        json!({"type": "response.content_part.added", "sequence_number": 1,
               "item_id": "msg_1", "output_index": 0}),
    ];
    let mut seq = 2;
    for sentence in sentences {
        events.push(json!({"type": "response.output_text.delta", "sequence_number": seq,
                           "item_id": "msg_1", "output_index": 0, "delta": sentence}));
        seq += 1;
    }
    events.push(json!({"type": "response.content_part.done", "sequence_number": seq,
                       "item_id": "msg_1", "output_index": 0}));
    events.push(json!({"type": "response.completed", "sequence_number": seq + 1,
                       "response": {"id": "resp_42", "model": "llama-3", "status": "completed", "created_at": 1}}));
    events
}

async fn mount_stream(server: &MockServer, events: &[Value]) {
    Mock::given(method("POST"))
        .and(path("/v1/openai/v1/responses"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(events)),
        )
        .mount(server)
        .await;
}

async fn mount_shield_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/safety/run-shield"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"violation": null})))
        .mount(server)
        .await;
}

fn stream_request(shield: &str) -> Request<Body> {
    let body = json!({"input": "Tell me something", "model": "llama-3", "stream": true,
                      "output_shield_id": shield});
    Request::builder()
        .method("POST")
        .uri(RESPONSES_PATH)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn records(resp: axum::response::Response) -> Vec<Value> {
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec())
        .unwrap()
        .split("\n\n")
        .filter_map(|r| r.strip_prefix("data: "))
        .map(|r| serde_json::from_str(r).unwrap())
        .collect()
}

fn deltas(records: &[Value]) -> Vec<String> {
    records
        .iter()
        .filter(|r| r["type"] == "response.output_text.delta")
        .map(|r| r["delta"].as_str().unwrap().to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Streaming with a shield
// ---------------------------------------------------------------------------

#[tokio::test]
async fn safe_stream_is_delivered_in_order() {
    let server = MockServer::start().await;
    let sentences = ["The sky is blue.", "Grass is green.", "Water is wet."];
    mount_stream(&server, &response_events(&sentences)).await;
    Mock::given(method("POST"))
        .and(path("/v1/safety/run-shield"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"violation": null})))
        .expect(3)
        .mount(&server)
        .await;

    let resp = app(&config_yaml(&server.uri(), "open", None))
        .oneshot(stream_request("llama-guard"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let records = records(resp).await;
    assert_eq!(deltas(&records), sentences);
    let types: Vec<&str> = records.iter().map(|r| r["type"].as_str().unwrap()).collect();
    assert_eq!(
        types,
        vec![
            "response.created",
            "response.content_part.added",
            "response.output_text.delta",
            "response.output_text.delta",
            "response.output_text.delta",
            "response.content_part.done",
            "response.completed",
        ]
    );
    assert!(records[6]["response"].get("guardrail_triggered").is_none());
}

#[tokio::test]
async fn flagged_output_is_replaced_by_violation() {
    let server = MockServer::start().await;
    let sentences = ["A harmless opener.", "Something hateful here.", "More text after."];
    mount_stream(&server, &response_events(&sentences)).await;
    Mock::given(method("POST"))
        .and(path("/v1/safety/run-shield"))
        .and(body_string_contains("hateful"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "violation": {
                "violation_level": "error",
                "user_message": "I can't help with that.",
                "metadata": {"violation_type": "hate_speech"}
            }
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    mount_shield_ok(&server).await;

    let resp = app(&config_yaml(&server.uri(), "open", None))
        .oneshot(stream_request("llama-guard"))
        .await
        .unwrap();
    let records = records(resp).await;

    let texts = deltas(&records);
    assert!(!texts.iter().any(|t| t.contains("hateful")));
    assert!(!texts.iter().any(|t| t.contains("More text after")));
    assert_eq!(texts.last().map(String::as_str), Some("hate_speech"));

    let n = records.len();
    assert_eq!(records[n - 2]["type"], "response.content_part.done");
    let completed = &records[n - 1];
    assert_eq!(completed["type"], "response.completed");
    assert_eq!(completed["response"]["id"], "resp_42");
    assert_eq!(completed["response"]["guardrail_triggered"], true);
    assert_eq!(completed["response"]["violation_reason"], "hate_speech");
}

#[tokio::test]
async fn shield_outage_fails_open() {
    let server = MockServer::start().await;
    let sentences = ["First line.", "Second line."];
    mount_stream(&server, &response_events(&sentences)).await;
    Mock::given(method("POST"))
        .and(path("/v1/safety/run-shield"))
        .respond_with(ResponseTemplate::new(503).set_body_string("shield down"))
        .mount(&server)
        .await;

    let resp = app(&config_yaml(&server.uri(), "open", None))
        .oneshot(stream_request("llama-guard"))
        .await
        .unwrap();
    let records = records(resp).await;
    assert_eq!(deltas(&records), sentences);
    assert_eq!(records.last().unwrap()["type"], "response.completed");
}

#[tokio::test]
async fn shield_outage_fails_closed_when_configured() {
    let server = MockServer::start().await;
    mount_stream(&server, &response_events(&["Only line."])).await;
    Mock::given(method("POST"))
        .and(path("/v1/safety/run-shield"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let resp = app(&config_yaml(&server.uri(), "closed", None))
        .oneshot(stream_request("llama-guard"))
        .await
        .unwrap();
    let records = records(resp).await;
    assert_eq!(deltas(&records), vec!["This response was blocked."]);
    let completed = records.last().unwrap();
    assert_eq!(completed["response"]["guardrail_triggered"], true);
    assert_eq!(completed["response"]["violation_reason"], "");
}

#[tokio::test]
async fn no_shield_means_no_moderation_calls() {
    let server = MockServer::start().await;
    mount_stream(&server, &response_events(&["Unmoderated text."])).await;
    Mock::given(method("POST"))
        .and(path("/v1/safety/run-shield"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"violation": null})))
        .expect(0)
        .mount(&server)
        .await;

    let resp = app(&config_yaml(&server.uri(), "open", None))
        .oneshot(stream_request(""))
        .await
        .unwrap();
    let records = records(resp).await;
    assert_eq!(records.len(), 5);
    assert_eq!(deltas(&records), vec!["Unmoderated text."]);
}

// ---------------------------------------------------------------------------
// Upstream errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_model_maps_to_404() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/openai/v1/responses"))
        .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
        .mount(&server)
        .await;

    let resp = app(&config_yaml(&server.uri(), "open", None))
        .oneshot(stream_request("llama-guard"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["error"]["code"], "404");
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .contains("llama-3"));
}

#[tokio::test]
async fn upstream_5xx_maps_to_500() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/openai/v1/responses"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let resp = app(&config_yaml(&server.uri(), "open", None))
        .oneshot(stream_request("llama-guard"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn previous_response_is_checked_and_echoed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/openai/v1/responses/resp_0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "resp_0"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/openai/v1/responses"))
        .and(body_string_contains("resp_0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"id": "resp_1", "model": "llama-3", "status": "completed", "created_at": 7}),
        ))
        .mount(&server)
        .await;

    let req = Request::builder()
        .method("POST")
        .uri(RESPONSES_PATH)
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"input": "more", "model": "llama-3", "previous_response_id": "resp_0"})
                .to_string(),
        ))
        .unwrap();
    let resp = app(&config_yaml(&server.uri(), "open", None))
        .oneshot(req)
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["data"]["id"], "resp_1");
    assert_eq!(json["data"]["previous_response_id"], "resp_0");
}

#[tokio::test]
async fn unknown_previous_response_maps_to_400() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/openai/v1/responses/resp_gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/openai/v1/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "resp_1"})))
        .expect(0)
        .mount(&server)
        .await;

    let req = Request::builder()
        .method("POST")
        .uri(RESPONSES_PATH)
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"input": "more", "model": "llama-3", "previous_response_id": "resp_gone"})
                .to_string(),
        ))
        .unwrap();
    let resp = app(&config_yaml(&server.uri(), "open", None))
        .oneshot(req)
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// MaaS token issuance
// ---------------------------------------------------------------------------

#[tokio::test]
async fn model_token_issued_once_and_forwarded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/tokens"))
        .and(header("authorization", "Bearer user-credential"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "token": "maas-token-1",
            "expiresAt": "2999-01-01T00:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/openai/v1/responses"))
        .and(header(
            "x-llamastack-provider-data",
            r#"{"vllm_api_token":"maas-token-1"}"#,
        ))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "resp_7", "status": "completed"})),
        )
        .expect(2)
        .mount(&server)
        .await;

    let router = app(&config_yaml(&server.uri(), "open", Some(server.uri().as_str())));
    for _ in 0..2 {
        let req = Request::builder()
            .method("POST")
            .uri(format!("{RESPONSES_PATH}?namespace=team-a"))
            .header(USER_HEADER, "alice")
            .header("authorization", "Bearer user-credential")
            .header("content-type", "application/json")
            .body(Body::from(json!({"input": "hi", "model": "llama-3"}).to_string()))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["data"]["id"], "resp_7");
    }
    // MockServer verifies the expect() counts on drop.
}

#[tokio::test]
async fn issuer_failure_continues_without_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/tokens"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/openai/v1/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "resp_8"})))
        .mount(&server)
        .await;

    let router = app(&config_yaml(&server.uri(), "open", Some(server.uri().as_str())));
    let req = Request::builder()
        .method("POST")
        .uri(format!("{RESPONSES_PATH}?namespace=team-a"))
        .header(USER_HEADER, "bob")
        .header("authorization", "Bearer cred")
        .body(Body::from(json!({"input": "hi", "model": "llama-3"}).to_string()))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let received = server.received_requests().await.unwrap();
    let upstream = received
        .iter()
        .find(|r| r.url.path() == "/v1/openai/v1/responses")
        .unwrap();
    assert!(upstream.headers.get("x-llamastack-provider-data").is_none());
}
