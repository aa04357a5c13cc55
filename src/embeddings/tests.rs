use super::*;

#[derive(Debug)]
struct FixedEmbedder(Vec<Vec<f32>>);

impl Embedder for FixedEmbedder {
    fn model_name(&self) -> &str {
        "fixed"
    }

    fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(self.0.clone())
    }
}

#[derive(Debug)]
struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(anyhow::anyhow!("connection refused")).context("Failed to generate embeddings")
    }
}

fn texts(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("text {i}")).collect()
}

#[test]
fn normalize_scales_to_unit_length() {
    let mut vector = vec![3.0, 4.0];
    normalize(&mut vector);
    assert!((vector[0] - 0.6).abs() < 1e-6);
    assert!((vector[1] - 0.8).abs() < 1e-6);
}

#[test]
fn normalize_leaves_zero_vector_alone() {
    let mut vector = vec![0.0; 4];
    normalize(&mut vector);
    assert_eq!(vector, vec![0.0; 4]);
}

#[test]
fn embed_normalized_reports_width() {
    let embedder = FixedEmbedder(vec![vec![2.0, 0.0, 0.0], vec![0.0, 0.0, 5.0]]);
    let (vectors, dim) = embed_normalized(&embedder, &texts(2)).expect("embedding should succeed");
    assert_eq!(dim, 3);
    assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 0.0, 1.0]]);
}

#[test]
fn embed_normalized_rejects_count_mismatch() {
    let embedder = FixedEmbedder(vec![vec![1.0, 0.0]]);
    let err = embed_normalized(&embedder, &texts(2)).expect_err("count mismatch should fail");
    assert!(matches!(err, StoreError::Provider(_)));
}

#[test]
fn embed_normalized_rejects_ragged_widths() {
    let embedder = FixedEmbedder(vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0]]);
    let err = embed_normalized(&embedder, &texts(2)).expect_err("ragged widths should fail");
    assert!(matches!(
        err,
        StoreError::DimensionMismatch {
            expected: 2,
            actual: 3
        }
    ));
}

#[test]
fn embed_normalized_rejects_empty_vectors() {
    let embedder = FixedEmbedder(vec![Vec::new()]);
    let err = embed_normalized(&embedder, &texts(1)).expect_err("empty vector should fail");
    assert!(matches!(err, StoreError::Provider(_)));
}

#[test]
fn provider_errors_keep_their_context() {
    let err = embed_normalized(&FailingEmbedder, &texts(1)).expect_err("provider should fail");
    match err {
        StoreError::Provider(message) => {
            assert!(message.contains("Failed to generate embeddings"));
            assert!(message.contains("connection refused"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn build_embedder_follows_provider_kind() {
    let config = Config {
        provider: ProviderKind::Hashing,
        ..Config::default()
    };
    let embedder = build_embedder(&config).expect("hashing embedder should build");
    assert_eq!(embedder.model_name(), config.embedding_model());

    let config = Config {
        provider: ProviderKind::OpenAi,
        ..Config::default()
    };
    let embedder = build_embedder(&config).expect("openai client should build");
    assert_eq!(embedder.model_name(), "text-embedding-3-small");
}
