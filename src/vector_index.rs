use std::path::{Path, PathBuf};

use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
    TableError,
};
use tracing::{debug, warn};

use crate::error::Result;

/// File name of the durable index inside the index directory.
pub const INDEX_FILE: &str = "index.redb";

/// Header size: dimension, page, source length, text length (u32 LE each).
const HEADER_SIZE: usize = 16;

/// Stored in the page slot when the page number is unknown.
const NO_PAGE: u32 = u32::MAX;

/// A bounded span of document text with its embedding and provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub source_path: PathBuf,
    pub page_number: Option<u32>,
    pub embedding: Vec<f32>,
}

impl Chunk {
    /// Base name of the source file, e.g. `manual.pdf`.
    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.source_path.to_string_lossy().to_string())
    }

    /// Binary format:
    /// - 4 bytes: embedding dimension D (u32 LE)
    /// - 4 bytes: page number, `u32::MAX` when unknown (u32 LE)
    /// - 4 bytes: source path length S (u32 LE)
    /// - 4 bytes: text length T (u32 LE)
    /// - D * 4 bytes: f32 LE embedding values
    /// - S bytes: UTF-8 source path
    /// - T bytes: UTF-8 text
    fn encode(&self) -> Vec<u8> {
        let source = self.source_path.to_string_lossy();
        let embedding: &[u8] = bytemuck::cast_slice(&self.embedding);

        let mut out = Vec::with_capacity(
            HEADER_SIZE + embedding.len() + source.len() + self.text.len(),
        );
        out.extend_from_slice(&(self.embedding.len() as u32).to_le_bytes());
        out.extend_from_slice(
            &self.page_number.unwrap_or(NO_PAGE).to_le_bytes(),
        );
        out.extend_from_slice(&(source.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.text.len() as u32).to_le_bytes());
        out.extend_from_slice(embedding);
        out.extend_from_slice(source.as_bytes());
        out.extend_from_slice(self.text.as_bytes());
        out
    }

    /// Decode an entry; returns `None` when the bytes are malformed.
    fn decode(bytes: &[u8]) -> Option<Self> {
        let header = bytes.get(..HEADER_SIZE)?;
        let read_u32 = |i: usize| {
            u32::from_le_bytes([
                header[i],
                header[i + 1],
                header[i + 2],
                header[i + 3],
            ])
        };
        let dimension = read_u32(0) as usize;
        let page = read_u32(4);
        let source_len = read_u32(8) as usize;
        let text_len = read_u32(12) as usize;

        let emb_end = HEADER_SIZE + dimension * 4;
        let source_end = emb_end + source_len;
        let text_end = source_end + text_len;
        if bytes.len() != text_end {
            return None;
        }

        // Values may not be 4-byte aligned inside the page, so decode bytewise.
        let embedding = bytes[HEADER_SIZE..emb_end]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let source = std::str::from_utf8(&bytes[emb_end..source_end]).ok()?;
        let text = std::str::from_utf8(&bytes[source_end..text_end]).ok()?;

        Some(Self {
            text: text.to_string(),
            source_path: PathBuf::from(source),
            page_number: (page != NO_PAGE).then_some(page),
            embedding,
        })
    }
}

/// A chunk returned by a similarity search.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity to the query.
    pub similarity: f32,
}

enum Backend {
    Durable { db: Database, path: PathBuf },
    Ephemeral { chunks: Vec<Chunk> },
}

/// Nearest-neighbour index over chunk embeddings.
///
/// Durable indexes live in a redb file, one table per collection, keyed by
/// insertion order. Ephemeral indexes keep everything in memory and vanish
/// with the process. Search is an exact cosine scan, which is plenty for
/// a few thousand chunks.
pub struct VectorIndex {
    collection: String,
    backend: Backend,
}

impl VectorIndex {
    /// Create (or reopen) a durable index in `dir`.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use ragchat::VectorIndex;
    ///
    /// let index = VectorIndex::create(tmp.path(), "rag_documents").unwrap();
    /// assert_eq!(index.count().unwrap(), 0);
    /// assert!(index.is_durable());
    /// ```
    pub fn create(dir: &Path, collection: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(INDEX_FILE);
        let db = Database::create(&path)?;

        let txn = db.begin_write()?;
        txn.open_table(table_def(collection))?;
        txn.commit()?;

        Ok(Self {
            collection: collection.to_string(),
            backend: Backend::Durable { db, path },
        })
    }

    /// Open a durable index left by an earlier process.
    ///
    /// A missing, unreadable or corrupt index is reported as `None` rather
    /// than as an error: the next sync rebuilds it from scratch.
    pub fn open_existing(dir: &Path, collection: &str) -> Option<Self> {
        let path = dir.join(INDEX_FILE);
        if !path.is_file() {
            return None;
        }

        let db = match Database::open(&path) {
            Ok(db) => db,
            Err(e) => {
                warn!(path = %path.display(), "ignoring unreadable index: {e}");
                return None;
            }
        };

        let has_table = db
            .begin_read()
            .map_err(|e| e.to_string())
            .and_then(|txn| match txn.open_table(table_def(collection)) {
                Ok(_) => Ok(true),
                Err(TableError::TableDoesNotExist(_)) => Ok(false),
                Err(e) => Err(e.to_string()),
            });

        match has_table {
            Ok(true) => Some(Self {
                collection: collection.to_string(),
                backend: Backend::Durable { db, path },
            }),
            Ok(false) => None,
            Err(e) => {
                warn!(path = %path.display(), "ignoring unreadable index: {e}");
                None
            }
        }
    }

    /// Create an in-memory index.
    pub fn in_memory(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            backend: Backend::Ephemeral { chunks: Vec::new() },
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn is_durable(&self) -> bool {
        matches!(self.backend, Backend::Durable { .. })
    }

    /// Number of stored chunks.
    pub fn count(&self) -> Result<u64> {
        match &self.backend {
            Backend::Durable { db, .. } => {
                let txn = db.begin_read()?;
                let table = txn.open_table(table_def(&self.collection))?;
                Ok(table.len()?)
            }
            Backend::Ephemeral { chunks } => Ok(chunks.len() as u64),
        }
    }

    /// Append chunks in a single transaction.
    pub fn insert_batch(&mut self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        match &mut self.backend {
            Backend::Durable { db, .. } => {
                let txn = db.begin_write()?;
                {
                    let mut table =
                        txn.open_table(table_def(&self.collection))?;
                    let mut next_key = table.len()?;
                    for chunk in chunks {
                        table.insert(next_key, chunk.encode().as_slice())?;
                        next_key += 1;
                    }
                }
                txn.commit()?;
            }
            Backend::Ephemeral { chunks: stored } => {
                stored.extend_from_slice(chunks);
            }
        }

        debug!(count = chunks.len(), "inserted chunks");
        Ok(())
    }

    /// Return the `k` chunks most similar to `query`, best first.
    ///
    /// Ties keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let mut scored: Vec<ScoredChunk> = match &self.backend {
            Backend::Durable { db, .. } => {
                let txn = db.begin_read()?;
                let table = txn.open_table(table_def(&self.collection))?;
                let mut scored = Vec::new();
                for entry in table.iter()? {
                    let (key, value) = entry?;
                    let Some(chunk) = Chunk::decode(value.value()) else {
                        warn!(key = key.value(), "skipping malformed chunk");
                        continue;
                    };
                    let similarity =
                        cosine_similarity(query, &chunk.embedding);
                    scored.push(ScoredChunk { chunk, similarity });
                }
                scored
            }
            Backend::Ephemeral { chunks } => chunks
                .iter()
                .map(|chunk| ScoredChunk {
                    similarity: cosine_similarity(query, &chunk.embedding),
                    chunk: chunk.clone(),
                })
                .collect(),
        };

        // sort_by is stable, so equal scores keep insertion order.
        scored.sort_by(|a, b| rank_key(b).total_cmp(&rank_key(a)));
        scored.truncate(k);
        Ok(scored)
    }

    /// Remove every chunk, keeping the index usable.
    pub fn clear(&mut self) -> Result<()> {
        match &mut self.backend {
            Backend::Durable { db, .. } => {
                let txn = db.begin_write()?;
                txn.delete_table(table_def(&self.collection))?;
                txn.open_table(table_def(&self.collection))?;
                txn.commit()?;
            }
            Backend::Ephemeral { chunks } => chunks.clear(),
        }
        Ok(())
    }

    /// Drop the index and delete its file. Deletion is best effort.
    pub fn destroy(self) {
        if let Backend::Durable { db, path } = self.backend {
            drop(db);
            remove_index_file(&path);
        }
    }

    /// Delete whatever durable index file `dir` holds, best effort.
    pub fn purge(dir: &Path) {
        remove_index_file(&dir.join(INDEX_FILE));
    }
}

fn remove_index_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "deleted index"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "could not delete index: {e}"),
    }
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("collection", &self.collection)
            .field("durable", &self.is_durable())
            .finish_non_exhaustive()
    }
}

fn table_def(collection: &str) -> TableDefinition<'_, u64, &'static [u8]> {
    TableDefinition::new(collection)
}

/// Cosine similarity; mismatched or zero vectors score 0.
/// NaN similarities (corrupt entries, degenerate embeddings) rank last.
fn rank_key(scored: &ScoredChunk) -> f32 {
    if scored.similarity.is_nan() {
        f32::NEG_INFINITY
    } else {
        scored.similarity
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
