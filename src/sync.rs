use std::path::Path;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::{
    chunking::{ChunkingConfig, DocumentChunk, chunk_document},
    embedding::{EMBED_BATCH_SIZE, Embedder},
    error::{Error, Result},
    loader::load_document,
    vector_index::{Chunk, VectorIndex},
    walker::discover_files,
};

/// Outcome of a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncResult {
    /// Chunks stored in the index.
    pub chunk_count: usize,
    /// Supported files found under the root.
    pub files_found: usize,
    /// Files that failed to load and were left out.
    pub files_skipped: usize,
}

/// Chunks read from a folder, before embedding.
#[derive(Debug, Default)]
pub struct CollectedChunks {
    pub chunks: Vec<DocumentChunk>,
    pub files_found: usize,
    pub files_skipped: usize,
}

/// Discover, load and chunk every supported file under `root`.
///
/// The folder is created when missing. A file that fails to load is
/// logged and skipped; the rest of the folder is still processed.
pub fn collect_chunks(
    root: &Path,
    config: &ChunkingConfig,
) -> Result<CollectedChunks> {
    if !root.exists() {
        std::fs::create_dir_all(root)?;
        info!(path = %root.display(), "created documents folder");
    }

    let files = discover_files(root)?;
    info!("found {} document(s) in {}", files.len(), root.display());

    // Files load in parallel; results keep discovery order.
    let per_file: Vec<Option<Vec<DocumentChunk>>> = files
        .par_iter()
        .map(|file| match load_document(&file.absolute_path) {
            Ok(doc) => {
                if doc.is_empty() {
                    warn!(
                        "{} has no extractable text",
                        file.relative_path.display()
                    );
                }
                Some(chunk_document(&doc, config))
            }
            Err(e) => {
                warn!("skipping {}: {e}", file.relative_path.display());
                None
            }
        })
        .collect();

    let files_skipped = per_file.iter().filter(|c| c.is_none()).count();
    let chunks: Vec<DocumentChunk> =
        per_file.into_iter().flatten().flatten().collect();

    Ok(CollectedChunks {
        chunks,
        files_found: files.len(),
        files_skipped,
    })
}

/// Embed `chunks` batch by batch and append them to `index`.
pub fn index_chunks(
    chunks: Vec<DocumentChunk>,
    embedder: &mut dyn Embedder,
    index: &mut VectorIndex,
) -> Result<usize> {
    let total = chunks.len();
    let mut stored = 0;

    for batch in chunks.chunks(EMBED_BATCH_SIZE) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embeddings = embedder.embed_documents(&texts)?;
        if embeddings.len() != batch.len() {
            return Err(Error::Embedding(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                batch.len()
            )));
        }

        let entries: Vec<Chunk> = batch
            .iter()
            .zip(embeddings)
            .map(|(c, embedding)| Chunk {
                text: c.text.clone(),
                source_path: c.source_path.clone(),
                page_number: c.page_number,
                embedding,
            })
            .collect();
        index.insert_batch(&entries)?;

        stored += entries.len();
        info!("embedded {stored}/{total} chunks");
    }

    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LengthEmbedder;

    impl Embedder for LengthEmbedder {
        fn model_id(&self) -> &str {
            "length"
        }

        fn embed_documents(
            &mut self,
            texts: &[String],
        ) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        fn embed_query(&mut self, query: &str) -> Result<Vec<f32>> {
            Ok(vec![query.len() as f32, 1.0])
        }
    }

    #[test]
    fn missing_folder_is_created_and_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("uploads");

        let collected =
            collect_chunks(&root, &ChunkingConfig::default()).unwrap();
        assert!(root.is_dir());
        assert!(collected.chunks.is_empty());
        assert_eq!(collected.files_found, 0);
    }

    #[test]
    fn broken_files_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("broken.pdf"), "not a pdf").unwrap();
        std::fs::write(tmp.path().join("broken.docx"), "not a zip").unwrap();
        std::fs::write(tmp.path().join("ignored.txt"), "plain text").unwrap();

        let collected =
            collect_chunks(tmp.path(), &ChunkingConfig::default()).unwrap();
        assert_eq!(collected.files_found, 2);
        assert_eq!(collected.files_skipped, 2);
        assert!(collected.chunks.is_empty());
    }

    #[test]
    fn documents_without_text_are_loaded_not_skipped() {
        use std::io::Write;

        let tmp = tempfile::tempdir().unwrap();
        let file = std::fs::File::create(tmp.path().join("scan.docx")).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("word/document.xml", Default::default())
            .unwrap();
        zip.write_all(b"<w:document><w:body/></w:document>").unwrap();
        zip.finish().unwrap();

        let collected =
            collect_chunks(tmp.path(), &ChunkingConfig::default()).unwrap();
        assert_eq!(collected.files_found, 1);
        assert_eq!(collected.files_skipped, 0);
        assert!(collected.chunks.is_empty());
    }

    #[test]
    fn index_chunks_embeds_everything_in_batches() {
        let chunks: Vec<DocumentChunk> = (0..EMBED_BATCH_SIZE + 5)
            .map(|i| DocumentChunk {
                text: format!("chunk {i}"),
                source_path: "/docs/a.pdf".into(),
                page_number: Some(1),
            })
            .collect();
        let mut index = VectorIndex::in_memory("test");

        let stored =
            index_chunks(chunks, &mut LengthEmbedder, &mut index).unwrap();
        assert_eq!(stored, EMBED_BATCH_SIZE + 5);
        assert_eq!(index.count().unwrap(), (EMBED_BATCH_SIZE + 5) as u64);
    }
}
