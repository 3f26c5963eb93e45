use super::*;
use futures::TryStreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.model.base_url = server.uri();
    config.model.chat_model = "test-model".to_string();
    config.model_api_key = "test-key".to_string();
    config
}

#[tokio::test]
async fn complete_returns_answer_text() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "model": "test-model" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [
                { "message": { "role": "assistant", "content": "The return window is 30 days." } }
            ]
        })))
        .mount(&server)
        .await;

    let client = ChatClient::new(&config_for(&server)).expect("should build client");
    let answer = client
        .complete(&[ChatMessage::user("What is the return window?")])
        .await
        .expect("should complete");

    assert_eq!(answer, "The return window is 30 days.");
}

#[tokio::test]
async fn complete_surfaces_http_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let client = ChatClient::new(&config_for(&server)).expect("should build client");
    let result = client.complete(&[ChatMessage::user("hi")]).await;

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("429"));
}

#[tokio::test]
async fn stream_yields_deltas_in_order() {
    let server = MockServer::start().await;

    let sse_body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}\n\n",
        "data: [DONE]\n\n",
    );

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body, "text/event-stream"),
        )
        .mount(&server)
        .await;

    let client = ChatClient::new(&config_for(&server)).expect("should build client");
    let stream = client
        .stream(&[ChatMessage::user("hi")])
        .await
        .expect("should open stream");

    let tokens: Vec<String> = stream.try_collect().await.expect("should drain stream");
    assert_eq!(tokens, vec!["Hello", " there", "!"]);
}

#[tokio::test]
async fn stream_skips_malformed_payloads() {
    let server = MockServer::start().await;

    let sse_body = concat!(
        "data: not json\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
        ": keep-alive comment\n\n",
        "data: [DONE]\n\n",
    );

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body, "text/event-stream"),
        )
        .mount(&server)
        .await;

    let client = ChatClient::new(&config_for(&server)).expect("should build client");
    let stream = client
        .stream(&[ChatMessage::user("hi")])
        .await
        .expect("should open stream");

    let tokens: Vec<String> = stream.try_collect().await.expect("should drain stream");
    assert_eq!(tokens, vec!["ok"]);
}

#[test]
fn message_constructors_set_roles() {
    assert_eq!(ChatMessage::system("a").role, "system");
    assert_eq!(ChatMessage::user("b").role, "user");
    assert_eq!(ChatMessage::assistant("c").role, "assistant");
}
