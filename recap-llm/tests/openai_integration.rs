//! OpenAI client against a mocked Responses API endpoint.

use recap_llm::{LlmClient, OpenAiClient};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RESPONSES_REPLY: &str = r#"{
    "model": "gpt-test",
    "output": [
        {"content": [{"type": "output_text", "text": "{\"success\": true}"}]}
    ],
    "usage": {"total_tokens": 42}
}"#;

#[tokio::test]
async fn generate_round_trips_through_responses_api() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(RESPONSES_REPLY, "application/json"),
        )
        .mount(&server)
        .await;

    let client = OpenAiClient::with_base_url(
        "sk-test".into(),
        "gpt-test".into(),
        &format!("{}/v1/", server.uri()),
    )
    .expect("client builds");

    let resp = client
        .generate("analyze this", Some("system"), Some(100), Some(0.1))
        .await
        .expect("call succeeds");

    assert_eq!(resp.text, "{\"success\": true}");
    assert_eq!(resp.model.as_deref(), Some("gpt-test"));
    assert_eq!(resp.tokens_used, Some(42));
    assert_eq!(client.model_name(), "gpt-test");
}

#[tokio::test]
async fn api_errors_surface_as_llm_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .respond_with(ResponseTemplate::new(401).set_body_string(r#"{"error":"bad key"}"#))
        .mount(&server)
        .await;

    let client = OpenAiClient::with_base_url(
        "sk-bad".into(),
        "gpt-test".into(),
        &format!("{}/v1/", server.uri()),
    )
    .unwrap();

    let err = client.generate("x", None, None, None).await.unwrap_err();
    assert!(err.to_string().contains("401"));
}
