use super::*;
use crate::config::Config;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer, dimension: u32) -> Config {
    let mut config = Config::default();
    config.model.base_url = server.uri();
    config.model.embedding_dimension = dimension;
    config.model_api_key = "test-key".to_string();
    config
}

fn embedding_body(vectors: &[Vec<f32>]) -> serde_json::Value {
    json!({
        "object": "list",
        "data": vectors
            .iter()
            .enumerate()
            .map(|(i, v)| json!({ "object": "embedding", "index": i, "embedding": v }))
            .collect::<Vec<_>>(),
        "model": "text-embedding-3-small"
    })
}

#[tokio::test]
async fn embed_returns_vector_of_configured_dimension() {
    let server = MockServer::start().await;
    let vector = vec![0.5_f32; 64];

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(embedding_body(&[vector.clone()])))
        .mount(&server)
        .await;

    let client = OpenAiEmbeddings::new(&config_for(&server, 64)).expect("should build client");
    let result = client.embed("hello world").await.expect("should embed");

    assert_eq!(result.len(), 64);
    assert_eq!(result, vector);
}

#[tokio::test]
async fn embed_rejects_dimension_mismatch() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(embedding_body(&[vec![0.1_f32; 8]])),
        )
        .mount(&server)
        .await;

    let client = OpenAiEmbeddings::new(&config_for(&server, 64)).expect("should build client");
    let result = client.embed("hello").await;

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("dimension"));
}

#[tokio::test]
async fn embed_batch_preserves_input_order() {
    let server = MockServer::start().await;
    // Respond with indices swapped to verify the client re-sorts.
    let body = json!({
        "object": "list",
        "data": [
            { "object": "embedding", "index": 1, "embedding": vec![1.0_f32; 64] },
            { "object": "embedding", "index": 0, "embedding": vec![0.0_f32; 64] },
        ],
        "model": "text-embedding-3-small"
    });

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_partial_json(json!({ "input": ["first", "second"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let client = OpenAiEmbeddings::new(&config_for(&server, 64)).expect("should build client");
    let results = client
        .embed_batch(&["first".to_string(), "second".to_string()])
        .await
        .expect("should embed batch");

    assert_eq!(results[0], vec![0.0_f32; 64]);
    assert_eq!(results[1], vec![1.0_f32; 64]);
}

#[tokio::test]
async fn embed_batch_empty_input_short_circuits() {
    let server = MockServer::start().await;
    let client = OpenAiEmbeddings::new(&config_for(&server, 64)).expect("should build client");

    let results = client.embed_batch(&[]).await.expect("should succeed");
    assert!(results.is_empty());
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAiEmbeddings::new(&config_for(&server, 64))
        .expect("should build client")
        .with_retry_attempts(3);

    let result = client.embed("hello").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(embedding_body(&[vec![0.2_f32; 64]])))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAiEmbeddings::new(&config_for(&server, 64))
        .expect("should build client")
        .with_retry_attempts(2);

    let result = client.embed("hello").await.expect("should succeed after retry");
    assert_eq!(result.len(), 64);
}
