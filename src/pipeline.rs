//! The retrieval-augmented chat pipeline.
//!
//! [`RagPipeline`] is an explicit context object: it owns the settings, the
//! current index generation, the embedder and the completion model. Callers
//! that share one across threads wrap it in a mutex; independent pipelines
//! never share state.

use std::{collections::HashSet, path::Path};

use tracing::{debug, info, warn};

use crate::{
    completion::CompletionModel,
    config::Settings,
    embedding::Embedder,
    error::{Error, Result},
    prompt::build_messages,
    rerank::{RankedChunk, RuleTable, build_context, citation, rerank},
    sync::{SyncResult, collect_chunks, index_chunks},
    vector_index::{Chunk, VectorIndex},
};

/// Chunks selected for a question and the context built from them.
#[derive(Debug, Clone)]
pub struct Retrieval {
    /// Selected chunks in presentation order.
    pub chunks: Vec<RankedChunk>,
    pub context: String,
}

/// An answer and the chunks it was grounded on.
#[derive(Debug, Clone)]
pub struct ChatResult {
    pub answer: String,
    pub cited_chunks: Vec<Chunk>,
}

impl ChatResult {
    /// Source file base names, deduplicated, in first-cited order.
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        for chunk in &self.cited_chunks {
            let name = chunk.file_name();
            if !sources.contains(&name) {
                sources.push(name);
            }
        }
        sources
    }

    /// `file (Page n)` for every cited page, deduplicated, in citation
    /// order.
    pub fn citations(&self) -> Vec<String> {
        let mut citations: Vec<String> = Vec::new();
        for chunk in &self.cited_chunks {
            let label = citation(chunk);
            if !citations.contains(&label) {
                citations.push(label);
            }
        }
        citations
    }
}

pub struct RagPipeline {
    settings: Settings,
    index: Option<VectorIndex>,
    embedder: Box<dyn Embedder>,
    completion: Box<dyn CompletionModel>,
    rules: RuleTable,
}

impl RagPipeline {
    /// Build a pipeline, picking up a durable index left by an earlier run.
    pub fn open(
        settings: Settings,
        embedder: Box<dyn Embedder>,
        completion: Box<dyn CompletionModel>,
    ) -> Result<Self> {
        settings.validate()?;
        let rules = settings.load_rules()?;

        let index = settings.index_dir.as_deref().and_then(|dir| {
            VectorIndex::open_existing(dir, &settings.collection)
        });
        if let Some(index) = &index {
            info!(collection = index.collection(), "loaded existing index");
        }

        Ok(Self {
            settings,
            index,
            embedder,
            completion,
            rules,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Whether a sync has produced an index to query.
    pub fn is_ready(&self) -> bool {
        self.index.is_some()
    }

    /// Chunks in the current index; 0 when there is none or it is unreadable.
    pub fn document_count(&self) -> usize {
        match &self.index {
            Some(index) => index.count().map_or_else(
                |e| {
                    warn!("cannot count index entries: {e}");
                    0
                },
                |n| n as usize,
            ),
            None => 0,
        }
    }

    /// Rebuild the index from the configured documents folder.
    pub fn sync_folder(&mut self) -> Result<SyncResult> {
        let root = self.settings.documents_dir.clone();
        self.sync_path(&root)
    }

    /// Rebuild the index from `root`.
    ///
    /// The previous generation is emptied first. When `root` yields no
    /// chunks the pipeline is left without an index.
    pub fn sync_path(&mut self, root: &Path) -> Result<SyncResult> {
        let retained = self.take_cleared_index();

        let collected = match collect_chunks(root, &self.settings.chunking) {
            Ok(collected) => collected,
            Err(e) => {
                discard(retained);
                return Err(e);
            }
        };
        let mut result = SyncResult {
            chunk_count: 0,
            files_found: collected.files_found,
            files_skipped: collected.files_skipped,
        };
        if collected.chunks.is_empty() {
            discard(retained);
            warn!("no chunks produced from {}", root.display());
            return Ok(result);
        }

        let mut index = match retained {
            Some(index) => index,
            None => self.new_index()?,
        };
        let embedder = self.embedder.as_mut();
        match index_chunks(collected.chunks, embedder, &mut index) {
            Ok(count) => result.chunk_count = count,
            Err(e) => {
                index.destroy();
                return Err(e);
            }
        }

        info!(
            chunks = result.chunk_count,
            files = result.files_found - result.files_skipped,
            "index ready"
        );
        self.index = Some(index);
        Ok(result)
    }

    /// Take the current index emptied in place, or `None` when there is
    /// none or it cannot be cleared.
    fn take_cleared_index(&mut self) -> Option<VectorIndex> {
        let mut index = self.index.take()?;
        match index.clear() {
            Ok(()) => {
                debug!(collection = index.collection(), "index emptied");
                Some(index)
            }
            Err(e) => {
                warn!("cannot empty index, rebuilding it: {e}");
                index.destroy();
                None
            }
        }
    }

    fn new_index(&self) -> Result<VectorIndex> {
        let collection = &self.settings.collection;
        match &self.settings.index_dir {
            Some(dir) => {
                // Unreadable leftovers would block creating the file.
                VectorIndex::purge(dir);
                VectorIndex::create(dir, collection)
            }
            None => Ok(VectorIndex::in_memory(collection)),
        }
    }

    /// Fetch candidates for `question`, rerank them and build the context.
    pub fn retrieve(&mut self, question: &str) -> Result<Retrieval> {
        let index = self.index.as_ref().ok_or(Error::NotReady)?;

        let query = self.embedder.embed_query(question)?;
        let candidates = index.search(&query, self.settings.candidates)?;
        debug!(candidates = candidates.len(), "retrieved candidates");

        let chunks = rerank(
            question,
            candidates,
            &self.rules,
            self.settings.context_chunks,
        );
        let context = build_context(&chunks);
        Ok(Retrieval { chunks, context })
    }

    /// Answer `question` from the indexed documents.
    pub fn chat(&mut self, question: &str) -> Result<ChatResult> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::InvalidRequest(
                "question must not be empty".to_string(),
            ));
        }

        let retrieval = self.retrieve(question)?;
        let cited_chunks: Vec<Chunk> =
            retrieval.chunks.into_iter().map(|r| r.chunk).collect();
        let files: HashSet<_> =
            cited_chunks.iter().map(|c| &c.source_path).collect();
        info!(
            "answering from {} chunk(s) of {} file(s)",
            cited_chunks.len(),
            files.len()
        );

        let messages = build_messages(question, &retrieval.context);
        let answer = self.completion.complete(&messages)?;

        Ok(ChatResult {
            answer,
            cited_chunks,
        })
    }

    /// Drop the current index generation, including any unreadable file
    /// left in the index directory. File deletion is best effort.
    pub fn clear_index(&mut self) {
        if let Some(index) = self.index.take() {
            index.destroy();
        }
        if let Some(dir) = &self.settings.index_dir {
            VectorIndex::purge(dir);
        }
        debug!("index cleared");
    }
}

fn discard(index: Option<VectorIndex>) {
    if let Some(index) = index {
        index.destroy();
    }
}
