use super::*;

use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

fn config_for(server: &MockServer) -> OpenAiConfig {
    OpenAiConfig {
        base_url: format!("{}/v1", server.uri()),
        api_key: "sk-test".to_string(),
        model: "embed-small".to_string(),
        batch_size: 2,
        ..OpenAiConfig::default()
    }
}

#[test]
fn endpoint_keeps_base_path() {
    let config = OpenAiConfig {
        base_url: "https://example.com/openai/v1/".to_string(),
        ..OpenAiConfig::default()
    };
    let client = OpenAiClient::new(&config).expect("Failed to create client");
    assert_eq!(
        client.endpoint.as_str(),
        "https://example.com/openai/v1/embeddings"
    );
    assert_eq!(client.model_name(), "text-embedding-3-small");
}

#[test]
fn proxy_and_insecure_tls_are_accepted() {
    let config = OpenAiConfig {
        proxy_url: "http://127.0.0.1:3128".to_string(),
        disable_ssl: true,
        ..OpenAiConfig::default()
    };
    assert!(OpenAiClient::new(&config).is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn embed_sends_bearer_token_and_orders_by_index() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({"model": "embed-small"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"embedding": [0.0, 2.0], "index": 1},
                {"embedding": [3.0, 0.0], "index": 0}
            ],
            "model": "embed-small"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAiClient::new(&config_for(&server)).expect("Failed to create client");
    let texts = vec!["first".to_string(), "second".to_string()];

    let vectors = tokio::task::spawn_blocking(move || client.embed(&texts))
        .await
        .expect("blocking task should not panic")
        .expect("embedding should succeed");

    assert_eq!(vectors, vec![vec![3.0, 0.0], vec![0.0, 2.0]]);
}

#[tokio::test(flavor = "multi_thread")]
async fn unauthorized_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAiClient::new(&config_for(&server))
        .expect("Failed to create client")
        .with_backoff_unit(Duration::from_millis(1));

    let result = tokio::task::spawn_blocking(move || client.health_check())
        .await
        .expect("blocking task should not panic");

    let message = format!("{:#}", result.expect_err("401 should fail"));
    assert!(message.contains("401"), "unexpected error: {message}");
}

#[tokio::test(flavor = "multi_thread")]
async fn server_errors_exhaust_retries() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let client = OpenAiClient::new(&config_for(&server))
        .expect("Failed to create client")
        .with_retry_attempts(2)
        .with_backoff_unit(Duration::from_millis(1));

    let result = tokio::task::spawn_blocking(move || client.embed(&["a".to_string()]))
        .await
        .expect("blocking task should not panic");
    assert!(result.is_err());
}
