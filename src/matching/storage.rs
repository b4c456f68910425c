//! Binary storage for catalog embeddings.
//!
//! File format: vectors.bin
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - id_len: u16 (little-endian)
//! - id: [u8; id_len] (UTF-8 job id)
//! - content_hash: u64 (little-endian)
//! - embedding: [f32; dimensions] (little-endian)

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::matching::store::{CatalogSnapshot, DocumentId};

const FORMAT_VERSION: u8 = 1;

/// version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl VectorStorageError {
    /// Whether the file was written for another model and should be rebuilt
    /// rather than reported.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            Self::ModelMismatch | Self::DimensionMismatch { .. } | Self::VersionMismatch(..)
        )
    }
}

/// One persisted embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVector {
    pub id: DocumentId,
    pub content_hash: u64,
    pub embedding: Vec<f32>,
}

pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load every stored vector written by `expected_model_id`.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<Vec<StoredVector>, VectorStorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        if header.model_id != *expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }
        if header.dimensions as usize != expected_dimensions {
            return Err(VectorStorageError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        // entry_count comes from disk; don't trust it for the allocation
        let mut vectors = Vec::with_capacity((header.entry_count as usize).min(65_536));
        for _ in 0..header.entry_count {
            vectors.push(read_entry(&mut reader, expected_dimensions)?);
        }

        Ok(vectors)
    }

    /// Persist the embeddings of every catalog document that has one.
    ///
    /// Uses atomic write: temp file -> fsync -> rename. Returns how many
    /// vectors were written.
    pub fn save(
        &self,
        snapshot: &CatalogSnapshot,
        model_id: &[u8; 32],
        dimensions: usize,
    ) -> Result<usize, VectorStorageError> {
        let dims = u16::try_from(dimensions).map_err(|_| {
            VectorStorageError::InvalidFormat(format!("{dimensions} dimensions do not fit the header"))
        })?;

        let temp_path = self.path.with_extension("tmp");
        match self.write_to_file(&temp_path, snapshot, model_id, dims) {
            Ok(written) => {
                std::fs::rename(&temp_path, &self.path)?;
                Ok(written)
            }
            Err(err) => {
                let _ = std::fs::remove_file(&temp_path);
                Err(err)
            }
        }
    }

    fn write_to_file(
        &self,
        path: &Path,
        snapshot: &CatalogSnapshot,
        model_id: &[u8; 32],
        dimensions: u16,
    ) -> Result<usize, VectorStorageError> {
        let entries: Vec<(&DocumentId, u64, &[f32])> = snapshot
            .documents()
            .iter()
            .filter_map(|doc| {
                let embedding = doc.embedding.as_deref()?;
                if embedding.len() != dimensions as usize {
                    log::warn!("not persisting {}: embedding has {} dimensions", doc.id, embedding.len());
                    return None;
                }
                Some((&doc.id, doc.content_hash, embedding))
            })
            .collect();

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        write_header(
            &mut writer,
            &Header {
                model_id: *model_id,
                dimensions,
                entry_count: entries.len() as u64,
            },
        )?;

        for (id, content_hash, embedding) in &entries {
            write_entry(&mut writer, id, *content_hash, embedding)?;
        }

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.sync_all()?;

        Ok(entries.len())
    }
}

#[derive(Debug)]
struct Header {
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

fn read_header(reader: &mut impl Read) -> Result<Header, VectorStorageError> {
    let mut bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut bytes)?;

    let version = bytes[0];
    if version != FORMAT_VERSION {
        return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
    }

    let stored_checksum = u32::from_le_bytes([bytes[43], bytes[44], bytes[45], bytes[46]]);
    if stored_checksum != crc32fast::hash(&bytes[0..43]) {
        return Err(VectorStorageError::ChecksumMismatch);
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&bytes[1..33]);

    let mut count = [0u8; 8];
    count.copy_from_slice(&bytes[35..43]);

    Ok(Header {
        model_id,
        dimensions: u16::from_le_bytes([bytes[33], bytes[34]]),
        entry_count: u64::from_le_bytes(count),
    })
}

fn write_header(writer: &mut impl Write, header: &Header) -> Result<(), VectorStorageError> {
    let mut bytes = [0u8; HEADER_SIZE];

    bytes[0] = FORMAT_VERSION;
    bytes[1..33].copy_from_slice(&header.model_id);
    bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
    bytes[35..43].copy_from_slice(&header.entry_count.to_le_bytes());

    let checksum = crc32fast::hash(&bytes[0..43]);
    bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

    writer.write_all(&bytes)?;
    Ok(())
}

fn read_entry(reader: &mut impl Read, dimensions: usize) -> Result<StoredVector, VectorStorageError> {
    let mut len = [0u8; 2];
    reader.read_exact(&mut len)?;

    let mut id = vec![0u8; u16::from_le_bytes(len) as usize];
    reader.read_exact(&mut id)?;
    let id = String::from_utf8(id)
        .map_err(|_| VectorStorageError::InvalidFormat("document id is not UTF-8".to_string()))?;

    let mut hash = [0u8; 8];
    reader.read_exact(&mut hash)?;

    let mut embedding = Vec::with_capacity(dimensions);
    for _ in 0..dimensions {
        let mut value = [0u8; 4];
        reader.read_exact(&mut value)?;
        embedding.push(f32::from_le_bytes(value));
    }

    Ok(StoredVector {
        id: DocumentId::from(id),
        content_hash: u64::from_le_bytes(hash),
        embedding,
    })
}

fn write_entry(
    writer: &mut impl Write,
    id: &DocumentId,
    content_hash: u64,
    embedding: &[f32],
) -> Result<(), VectorStorageError> {
    let id = id.as_str().as_bytes();
    let len = u16::try_from(id.len())
        .map_err(|_| VectorStorageError::InvalidFormat(format!("document id of {} bytes", id.len())))?;

    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(id)?;
    writer.write_all(&content_hash.to_le_bytes())?;
    for value in embedding {
        writer.write_all(&value.to_le_bytes())?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::store::{Document, JobCatalog};
    use std::io::{Seek, SeekFrom};

    fn model_id() -> [u8; 32] {
        let mut id = [0u8; 32];
        id[0] = 0xAB;
        id[31] = 0xCD;
        id
    }

    fn catalog() -> JobCatalog {
        JobCatalog::with_documents(vec![
            Document::job("101", None, "rust engineer").with_embedding(vec![1.0, 0.0, 0.0]),
            Document::job("données-7", None, "data engineer").with_embedding(vec![0.0, 1.0, 0.0]),
            Document::job("103", None, "not embedded yet"),
        ])
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let storage = VectorStorage::new(dir.path().join("vectors.bin"));
        let catalog = catalog();

        let written = storage.save(&catalog.snapshot(), &model_id(), 3).unwrap();
        assert_eq!(written, 2);
        assert!(storage.exists());

        let loaded = storage.load(&model_id(), 3).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id.as_str(), "101");
        assert_eq!(loaded[0].embedding, vec![1.0, 0.0, 0.0]);
        assert_eq!(loaded[1].id.as_str(), "données-7");
        assert_eq!(
            loaded[1].content_hash,
            catalog.snapshot().documents()[1].content_hash
        );
    }

    #[test]
    fn test_save_empty_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let storage = VectorStorage::new(dir.path().join("vectors.bin"));

        storage.save(&JobCatalog::new().snapshot(), &model_id(), 384).unwrap();
        assert!(storage.load(&model_id(), 384).unwrap().is_empty());
    }

    #[test]
    fn test_model_mismatch_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let storage = VectorStorage::new(dir.path().join("vectors.bin"));
        storage.save(&catalog().snapshot(), &model_id(), 3).unwrap();

        let err = storage.load(&[0xFF; 32], 3).unwrap_err();
        assert!(matches!(err, VectorStorageError::ModelMismatch));
        assert!(err.is_stale());
    }

    #[test]
    fn test_dimension_mismatch_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let storage = VectorStorage::new(dir.path().join("vectors.bin"));
        storage.save(&catalog().snapshot(), &model_id(), 3).unwrap();

        let err = storage.load(&model_id(), 384).unwrap_err();
        assert!(matches!(err, VectorStorageError::DimensionMismatch { expected: 384, got: 3 }));
        assert!(err.is_stale());
    }

    #[test]
    fn test_wrong_length_embeddings_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let storage = VectorStorage::new(dir.path().join("vectors.bin"));
        let catalog = JobCatalog::with_documents(vec![
            Document::job("1", None, "a").with_embedding(vec![1.0, 0.0]),
            Document::job("2", None, "b").with_embedding(vec![1.0, 0.0, 0.0]),
        ]);

        assert_eq!(storage.save(&catalog.snapshot(), &model_id(), 3).unwrap(), 1);
    }

    #[test]
    fn test_failed_write_cleans_up() {
        let path = PathBuf::from("/nonexistent/directory/vectors.bin");
        let storage = VectorStorage::new(path.clone());

        assert!(storage.save(&catalog().snapshot(), &model_id(), 3).is_err());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.bin");
        let storage = VectorStorage::new(path.clone());
        storage.save(&catalog().snapshot(), &model_id(), 3).unwrap();

        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(10)).unwrap();
        file.write_all(&[0xFF]).unwrap();

        let err = storage.load(&model_id(), 3).unwrap_err();
        assert!(matches!(err, VectorStorageError::ChecksumMismatch));
        assert!(!err.is_stale());
    }

    #[test]
    fn test_truncated_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.bin");
        let storage = VectorStorage::new(path.clone());
        storage.save(&catalog().snapshot(), &model_id(), 3).unwrap();

        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 5).unwrap();

        assert!(matches!(storage.load(&model_id(), 3), Err(VectorStorageError::Io(_))));
    }
}
