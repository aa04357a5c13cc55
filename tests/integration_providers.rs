#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Stores driven through the HTTP embedding providers
// The Ollama test at the bottom needs a real server:
//   cargo test --test integration_providers -- --ignored

use std::env;
use std::sync::Arc;

use rag_store::StoreError;
use rag_store::config::{Config, OllamaConfig, ProviderKind};
use rag_store::embeddings::{Embedder, build_embedder};
use rag_store::store::{IndexAction, RetrievalStore, StoreOptions};
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Answers embedding requests with vectors keyed on a few topic words,
/// in reverse order so clients must sort by `index`
struct TopicEmbeddings;

impl Respond for TopicEmbeddings {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).expect("request body is JSON");
        let inputs = body["input"].as_array().expect("input is an array");

        let mut data: Vec<Value> = inputs
            .iter()
            .enumerate()
            .map(|(index, text)| {
                let text = text.as_str().unwrap_or_default().to_lowercase();
                let topic = |word: &str| if text.contains(word) { 1.0 } else { 0.0 };
                json!({
                    "index": index,
                    "embedding": [topic("cat"), topic("ship"), topic("bread"), 0.1]
                })
            })
            .collect();
        data.reverse();

        ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": data,
            "model": body["model"],
        }))
    }
}

fn openai_config(server: &MockServer, base_dir: &TempDir) -> Config {
    let mut config = Config {
        provider: ProviderKind::OpenAi,
        base_dir: base_dir.path().to_path_buf(),
        ..Config::default()
    };
    config.openai.base_url = format!("{}/v1", server.uri());
    config.openai.api_key = "sk-test".to_string();
    config.openai.model = "topic-embed".to_string();
    config.openai.batch_size = 2;
    config.chunking.max_chars = 120;
    config.chunking.overlap = 10;
    config
}

fn open_store(config: &Config) -> RetrievalStore {
    let embedder: Arc<dyn Embedder> = build_embedder(config).expect("embedder builds");
    RetrievalStore::open(
        config.stores_dir().join("documents"),
        StoreOptions::from_config(config).expect("valid options"),
        Some(embedder),
    )
    .expect("store opens")
}

#[tokio::test(flavor = "multi_thread")]
async fn openai_compatible_provider_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(TopicEmbeddings)
        .mount(&server)
        .await;

    let base_dir = TempDir::new().expect("temp dir");
    let config = openai_config(&server, &base_dir);

    tokio::task::spawn_blocking(move || {
        let store = open_store(&config);
        let cats = store
            .ingest("cats.txt", "The cat sat on the mat.")
            .expect("ingest succeeds");
        store
            .ingest("ships.txt", "A ship left the harbour at dawn.")
            .expect("ingest succeeds");
        store
            .ingest("bread.txt", "Fresh bread from the oven.")
            .expect("ingest succeeds");
        assert_eq!(store.model_name().as_deref(), Some("topic-embed"));

        let hits = store.search_with_meta("which ship sailed", 1).expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_name, "ships.txt");

        // Re-embedding after removal goes through the provider in batches of 2
        let report = store.remove_file(&cats).expect("remove succeeds");
        assert_eq!(report.index_action, IndexAction::Rebuilt);

        let hits = store.search("a cat", 3).expect("search");
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|(text, _)| !text.contains("cat")));

        let state = store.rebuild_sync().expect("rebuild succeeds");
        assert_eq!(state.current, 2);
    })
    .await
    .expect("blocking task completes");
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_credentials_leave_the_store_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(1)
        .mount(&server)
        .await;

    let base_dir = TempDir::new().expect("temp dir");
    let config = openai_config(&server, &base_dir);

    tokio::task::spawn_blocking(move || {
        let store = open_store(&config);
        let err = store
            .ingest("a.txt", "anything at all")
            .expect_err("provider rejects the request");
        assert!(matches!(err, StoreError::Provider(message) if message.contains("401")));

        let status = store.get_status();
        assert_eq!(status.chunks_count, 0);
        assert!(!status.meta_exists);
        assert!(!status.index_exists);
    })
    .await
    .expect("blocking task completes");
}

#[test]
#[ignore = "requires a running Ollama instance"]
fn real_ollama_ingest_and_search() {
    let mut config = Config {
        provider: ProviderKind::Ollama,
        ..Config::default()
    };
    let temp = TempDir::new().expect("temp dir");
    config.base_dir = temp.path().to_path_buf();
    config.ollama = OllamaConfig {
        host: env::var("OLLAMA_HOST").unwrap_or_else(|_| "localhost".to_string()),
        port: env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434),
        model: env::var("OLLAMA_MODEL").unwrap_or_else(|_| "nomic-embed-text:latest".to_string()),
        ..OllamaConfig::default()
    };

    let store = open_store(&config);
    store
        .ingest(
            "rust.txt",
            "Rust is a systems programming language focused on memory safety.",
        )
        .expect("ingest succeeds");
    store
        .ingest("baking.txt", "Sourdough bread needs a long, slow fermentation.")
        .expect("ingest succeeds");

    let hits = store.search_with_meta("memory safe languages", 1).expect("search");
    assert_eq!(hits[0].file_name, "rust.txt");
    assert!(store.get_status().dim.is_some_and(|dim| dim > 0));
}
