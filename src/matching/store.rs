//! Documents and the versioned job catalog.
//!
//! The job catalog is long-lived and shared by every request. It is published
//! as immutable snapshots: readers clone an `Arc` and never see a partial
//! update, writers build the next snapshot and swap it in. Uploaded resumes
//! never enter the catalog; they live only as long as their request.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::matching::normalize::{content_hash, normalize};

/// Identifier of a document: a job id or an uploaded file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Job,
    Resume,
}

/// Display data carried alongside a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// A query or corpus document.
///
/// The embedding, once attached, belongs to `content_hash`; a text change
/// produces a new document without one.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub kind: DocumentKind,
    pub raw_text: String,
    pub normalized_text: String,
    pub content_hash: u64,
    pub embedding: Option<Arc<[f32]>>,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(
        id: impl Into<DocumentId>,
        kind: DocumentKind,
        raw_text: impl Into<String>,
        metadata: DocumentMetadata,
    ) -> Self {
        let raw_text = raw_text.into();
        let normalized_text = normalize(&raw_text);
        let content_hash = content_hash(&normalized_text);

        Self {
            id: id.into(),
            kind,
            raw_text,
            normalized_text,
            content_hash,
            embedding: None,
            metadata,
        }
    }

    pub fn job(id: impl Into<DocumentId>, title: Option<String>, description: impl Into<String>) -> Self {
        Self::new(
            id,
            DocumentKind::Job,
            description,
            DocumentMetadata {
                title,
                filename: None,
            },
        )
    }

    pub fn resume(filename: impl Into<String>, text: impl Into<String>) -> Self {
        let filename = filename.into();
        Self::new(
            filename.clone(),
            DocumentKind::Resume,
            text,
            DocumentMetadata {
                title: None,
                filename: Some(filename),
            },
        )
    }

    #[cfg(test)]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding.into());
        self
    }
}

/// Which corpus a request ranks against.
#[derive(Debug, Clone)]
pub enum CorpusSelector {
    /// The shared job catalog
    Jobs,
    /// Documents uploaded with this request
    Uploaded(Vec<Document>),
}

/// The documents of one request, plus whether lazily computed embeddings
/// should be written back to the store.
#[derive(Debug, Clone)]
pub struct Corpus {
    pub documents: Vec<Arc<Document>>,
    pub cacheable: bool,
}

/// An embedding computed for a catalog document during a request.
#[derive(Debug, Clone)]
pub struct ComputedEmbedding {
    pub id: DocumentId,
    pub content_hash: u64,
    pub embedding: Arc<[f32]>,
}

/// Source of corpora for the orchestrator.
pub trait DocumentStore: Send + Sync {
    fn get_corpus(&self, selector: CorpusSelector) -> Corpus;

    /// Remember embeddings computed for cacheable documents.
    /// Returns how many were stored.
    fn cache_embeddings(&self, computed: Vec<ComputedEmbedding>) -> usize;
}

/// One immutable version of the catalog.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    version: u64,
    documents: Vec<Arc<Document>>,
    positions: HashMap<DocumentId, usize>,
}

impl CatalogSnapshot {
    fn build(version: u64, documents: Vec<Arc<Document>>) -> Self {
        let positions = documents
            .iter()
            .enumerate()
            .map(|(idx, doc)| (doc.id.clone(), idx))
            .collect();

        Self {
            version,
            documents,
            positions,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[Arc<Document>] {
        &self.documents
    }

    pub fn get(&self, id: &DocumentId) -> Option<&Arc<Document>> {
        self.positions.get(id).map(|idx| &self.documents[*idx])
    }

    /// Documents that still need an embedding.
    pub fn pending(&self) -> impl Iterator<Item = &Arc<Document>> {
        self.documents.iter().filter(|doc| doc.embedding.is_none())
    }
}

/// Shared, read-mostly job catalog.
#[derive(Debug, Default)]
pub struct JobCatalog {
    current: RwLock<Arc<CatalogSnapshot>>,
}

impl JobCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(documents: Vec<Document>) -> Self {
        let catalog = Self::new();
        catalog.replace_all(documents);
        catalog
    }

    /// Current snapshot; stays valid however the catalog changes afterwards.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    #[cfg(test)]
    pub fn version(&self) -> u64 {
        self.snapshot().version
    }

    /// Replace the catalog contents, keeping the embedding of any document
    /// whose id and text are unchanged. Returns the new version.
    pub fn replace_all(&self, documents: Vec<Document>) -> u64 {
        self.publish(|previous| {
            documents
                .into_iter()
                .map(|doc| Arc::new(Self::carry_embedding(previous, doc)))
                .collect()
        })
    }

    /// Insert or update documents. Updated documents keep their position so
    /// the tie-break order stays stable. Returns the new version.
    #[cfg(test)]
    pub fn upsert(&self, documents: Vec<Document>) -> u64 {
        self.publish(|previous| {
            let mut next = previous.documents.clone();
            let mut positions = previous.positions.clone();

            for doc in documents {
                let doc = Arc::new(Self::carry_embedding(previous, doc));
                match positions.get(&doc.id) {
                    Some(idx) => next[*idx] = doc,
                    None => {
                        positions.insert(doc.id.clone(), next.len());
                        next.push(doc);
                    }
                }
            }
            next
        })
    }

    fn carry_embedding(previous: &CatalogSnapshot, mut doc: Document) -> Document {
        if doc.embedding.is_none() {
            if let Some(old) = previous.get(&doc.id) {
                if old.content_hash == doc.content_hash {
                    doc.embedding = old.embedding.clone();
                }
            }
        }
        doc
    }

    fn publish<F>(&self, build: F) -> u64
    where
        F: FnOnce(&CatalogSnapshot) -> Vec<Arc<Document>>,
    {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let documents = build(&guard);
        let version = guard.version + 1;
        *guard = Arc::new(CatalogSnapshot::build(version, documents));
        version
    }
}

impl DocumentStore for JobCatalog {
    fn get_corpus(&self, selector: CorpusSelector) -> Corpus {
        match selector {
            CorpusSelector::Jobs => Corpus {
                documents: self.snapshot().documents.clone(),
                cacheable: true,
            },
            CorpusSelector::Uploaded(documents) => Corpus {
                documents: documents.into_iter().map(Arc::new).collect(),
                cacheable: false,
            },
        }
    }

    fn cache_embeddings(&self, computed: Vec<ComputedEmbedding>) -> usize {
        if computed.is_empty() {
            return 0;
        }

        let mut stored = 0;
        self.publish(|previous| {
            let mut next = previous.documents.clone();
            for item in computed {
                let Some(idx) = previous.positions.get(&item.id) else {
                    continue;
                };
                let current = &next[*idx];
                // the text may have changed since the request read it
                if current.content_hash != item.content_hash || current.embedding.is_some() {
                    continue;
                }
                let mut doc = Document::clone(current);
                doc.embedding = Some(item.embedding);
                next[*idx] = Arc::new(doc);
                stored += 1;
            }
            next
        });
        stored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, text: &str) -> Document {
        Document::job(id, Some(format!("Job {id}")), text)
    }

    #[test]
    fn test_document_normalizes_and_hashes() {
        let doc = Document::resume("cv.pdf", "  Rust \n\n developer ");
        assert_eq!(doc.normalized_text, "Rust developer");
        assert_eq!(doc.content_hash, content_hash("Rust developer"));
        assert_eq!(doc.id.as_str(), "cv.pdf");
        assert_eq!(doc.metadata.filename.as_deref(), Some("cv.pdf"));
        assert_eq!(doc.kind, DocumentKind::Resume);
    }

    #[test]
    fn test_replace_all_bumps_version() {
        let catalog = JobCatalog::new();
        assert_eq!(catalog.version(), 0);

        let version = catalog.replace_all(vec![job("1", "a"), job("2", "b")]);
        assert_eq!(version, 1);
        assert_eq!(catalog.snapshot().len(), 2);
    }

    #[test]
    fn test_snapshot_isolated_from_updates() {
        let catalog = JobCatalog::with_documents(vec![job("1", "a")]);
        let before = catalog.snapshot();

        catalog.upsert(vec![job("2", "b")]);

        assert_eq!(before.len(), 1);
        assert_eq!(catalog.snapshot().len(), 2);
        assert!(catalog.snapshot().version() > before.version());
    }

    #[test]
    fn test_upsert_keeps_position() {
        let catalog = JobCatalog::with_documents(vec![job("1", "a"), job("2", "b"), job("3", "c")]);
        catalog.upsert(vec![job("2", "changed"), job("4", "d")]);

        let snapshot = catalog.snapshot();
        let ids: Vec<&str> = snapshot.documents().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
        assert_eq!(snapshot.get(&DocumentId::from("2")).unwrap().raw_text, "changed");
    }

    #[test]
    fn test_unchanged_text_keeps_embedding() {
        let catalog = JobCatalog::with_documents(vec![job("1", "rust").with_embedding(vec![1.0, 0.0])]);

        // same text after normalization
        catalog.upsert(vec![job("1", "  rust ")]);
        let snapshot = catalog.snapshot();
        assert!(snapshot.get(&DocumentId::from("1")).unwrap().embedding.is_some());

        catalog.upsert(vec![job("1", "go")]);
        let snapshot = catalog.snapshot();
        assert!(snapshot.get(&DocumentId::from("1")).unwrap().embedding.is_none());
        assert_eq!(snapshot.pending().count(), 1);
    }

    #[test]
    fn test_cache_embeddings_attaches_matching_hash() {
        let catalog = JobCatalog::with_documents(vec![job("1", "a"), job("2", "b")]);
        let snapshot = catalog.snapshot();
        let doc = snapshot.get(&DocumentId::from("1")).unwrap();

        let stored = catalog.cache_embeddings(vec![ComputedEmbedding {
            id: doc.id.clone(),
            content_hash: doc.content_hash,
            embedding: vec![0.5, 0.5].into(),
        }]);

        assert_eq!(stored, 1);
        assert_eq!(catalog.snapshot().pending().count(), 1);
        // the old snapshot is untouched
        assert_eq!(snapshot.pending().count(), 2);
    }

    #[test]
    fn test_cache_embeddings_skips_stale_text() {
        let catalog = JobCatalog::with_documents(vec![job("1", "old text")]);
        let stale_hash = catalog.snapshot().documents()[0].content_hash;
        catalog.upsert(vec![job("1", "new text")]);

        let stored = catalog.cache_embeddings(vec![ComputedEmbedding {
            id: DocumentId::from("1"),
            content_hash: stale_hash,
            embedding: vec![1.0].into(),
        }]);

        assert_eq!(stored, 0);
        assert_eq!(catalog.snapshot().pending().count(), 1);
    }

    #[test]
    fn test_get_corpus_selectors() {
        let catalog = JobCatalog::with_documents(vec![job("1", "a")]);

        let jobs = catalog.get_corpus(CorpusSelector::Jobs);
        assert_eq!(jobs.documents.len(), 1);
        assert!(jobs.cacheable);

        let uploaded = catalog.get_corpus(CorpusSelector::Uploaded(vec![
            Document::resume("a.pdf", "x"),
            Document::resume("b.pdf", "y"),
        ]));
        assert_eq!(uploaded.documents.len(), 2);
        assert!(!uploaded.cacheable);
        assert_eq!(uploaded.documents[1].id.as_str(), "b.pdf");
        // uploads never enter the catalog
        assert_eq!(catalog.snapshot().len(), 1);
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let catalog = Arc::new(JobCatalog::with_documents(vec![job("0", "seed")]));

        let writer = {
            let catalog = catalog.clone();
            std::thread::spawn(move || {
                for i in 1..50 {
                    catalog.replace_all((0..=i).map(|n| job(&n.to_string(), "x")).collect());
                }
            })
        };

        for _ in 0..200 {
            let snapshot = catalog.snapshot();
            // version n always holds exactly n documents
            assert_eq!(snapshot.len() as u64, snapshot.version());
        }
        writer.join().unwrap();
    }
}
