//! Tests against the real sentence model.
//!
//! These tests require model download and are marked #[ignore] by default.
//! Run with: cargo test -- --ignored

use crate::catalog::{self, CatalogFiles};
use crate::config::EmbeddingConfig;
use crate::matching::{
    cosine, load_provider, Document, EmbeddingGateway, ExhaustiveScorer, MatchOrchestrator,
    RankingPolicy, DEFAULT_MODEL,
};
use std::sync::Arc;

fn config() -> EmbeddingConfig {
    EmbeddingConfig {
        model: DEFAULT_MODEL.to_string(),
        ..Default::default()
    }
}

#[test]
#[ignore = "requires model download (~23MB)"]
fn test_related_texts_score_higher() {
    let dir = tempfile::tempdir().unwrap();
    let provider = load_provider(&config(), dir.path().to_path_buf()).unwrap();
    assert_eq!(provider.dimensions(), 384);

    let resume = provider.embed("Backend developer with Rust and PostgreSQL experience").unwrap();
    let related = provider.embed("Hiring a server-side engineer, Rust, SQL databases").unwrap();
    let unrelated = provider.embed("Pastry chef for a busy French bakery").unwrap();

    let related_score = cosine(&resume, &related).unwrap();
    let unrelated_score = cosine(&resume, &unrelated).unwrap();
    assert!(
        related_score > unrelated_score,
        "{related_score} vs {unrelated_score}"
    );
    assert!((cosine(&resume, &resume).unwrap() - 1.0).abs() < 1e-4);
}

#[tokio::test]
#[ignore = "requires model download (~23MB)"]
async fn test_index_and_match_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("jobs.csv");
    std::fs::write(
        &csv,
        "job_id,title,description\n\
         1,Pastry Chef,Bake bread and pastries every morning\n\
         2,Backend Engineer,Build APIs in Rust backed by PostgreSQL\n\
         3,Nurse,Care for patients in the emergency ward\n",
    )
    .unwrap();

    let provider = load_provider(&config(), dir.path().to_path_buf()).unwrap();
    let files = CatalogFiles::new(csv, dir.path().join("vectors.bin"));
    let jobs = Arc::new(files.load(provider.as_ref()).unwrap());

    let gateway = EmbeddingGateway::new(provider.clone(), &config()).unwrap();
    assert_eq!(catalog::embed_pending(&jobs, &gateway).await.unwrap(), 3);
    assert_eq!(files.save(&jobs, provider.as_ref()).unwrap(), 3);

    let orch = MatchOrchestrator::new(gateway, Box::new(ExhaustiveScorer), jobs, RankingPolicy::default());
    let outcome = orch
        .match_jobs(
            Document::resume("cv.txt", "Rust developer, five years building web services and SQL schemas"),
            0.0,
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.response.results[0].document_id.as_str(), "2");
    assert_eq!(
        outcome.documents[0].metadata.title.as_deref(),
        Some("Backend Engineer")
    );
}
