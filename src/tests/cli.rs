use std::path::PathBuf;
use std::sync::Arc;

use crate::catalog::CatalogFiles;
use crate::config::Config;
use crate::engine::Engine;
use crate::matching::{Document, ErrorKind, HashingProvider, JobCatalog};
use crate::{describe, match_resume_files};

fn engine() -> Engine {
    let mut config = Config::default();
    config.embedding.parallelism = "2".to_string();
    Engine::with_parts(
        config,
        Arc::new(HashingProvider::new(64, 8192)),
        CatalogFiles::new("jobs.csv".into(), "vectors.bin".into()),
        Arc::new(JobCatalog::new()),
    )
    .unwrap()
}

fn write(dir: &std::path::Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn job() -> Document {
    Document::job("job.txt", None, "Rust backend engineer")
}

#[tokio::test]
async fn test_match_resume_files_skips_unreadable() {
    let dir = tempfile::tempdir().unwrap();
    let paths = vec![
        write(dir.path(), "good.txt", b"rust backend engineer"),
        write(dir.path(), "scan.pdf", b"not really a pdf"),
        dir.path().join("missing.txt"),
    ];

    let response = match_resume_files(&engine(), job(), &paths, 0.0, None)
        .await
        .unwrap();

    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].filename, "good.txt");
    let skipped: Vec<&str> = response.skipped.iter().map(|s| s.document.as_str()).collect();
    assert_eq!(skipped, vec!["scan.pdf", "missing.txt"]);
}

#[tokio::test]
async fn test_all_resume_files_unreadable_reports_each_file() {
    let dir = tempfile::tempdir().unwrap();
    let paths = vec![
        write(dir.path(), "a.pdf", b"plain bytes"),
        write(dir.path(), "b.txt", &[0xff, 0xfe, 0xfd]),
    ];

    let err = match_resume_files(&engine(), job(), &paths, 0.5, None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::EmptyCorpus);
    let skipped: Vec<&str> = err.excluded().iter().map(|s| s.document.as_str()).collect();
    assert_eq!(skipped, vec!["a.pdf", "b.txt"]);
    assert!(err
        .excluded()
        .iter()
        .all(|s| s.kind == ErrorKind::DocumentUnreadable));

    let message = describe(err).to_string();
    assert!(message.contains("EMPTY_CORPUS"));
    assert!(message.contains("skipped a.pdf"));
    assert!(message.contains("skipped b.txt"));
}
