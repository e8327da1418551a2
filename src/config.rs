use std::{path::PathBuf, time::Duration};

use crate::{
    chunking::ChunkingConfig,
    completion::{DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_TIMEOUT},
    error::{Error, Result},
    model_manager::DEFAULT_MODEL_ID,
    rerank::{DEFAULT_CANDIDATES, DEFAULT_CONTEXT_CHUNKS, RuleTable},
};

pub const DEFAULT_COLLECTION: &str = "rag_documents";

/// Everything a [`RagPipeline`](crate::pipeline::RagPipeline) needs to run.
///
/// The CLI fills this from flags with environment fallbacks; library users
/// start from [`Settings::new`] and override fields.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Credential for the completion service.
    pub api_key: Option<String>,
    pub completion_model: String,
    /// Base URL of an OpenAI-compatible API, without `/chat/completions`.
    pub completion_url: String,
    pub completion_timeout: Duration,
    /// Name of the vector index collection.
    pub collection: String,
    /// Durable index location. `None` keeps the index in memory.
    pub index_dir: Option<PathBuf>,
    /// Folder scanned by sync and written by uploads.
    pub documents_dir: PathBuf,
    /// HuggingFace model ID or local path of the embedding model.
    pub embedding_model: String,
    /// Candidates fetched from the index per question.
    pub candidates: usize,
    /// Chunks kept for the prompt after reranking.
    pub context_chunks: usize,
    pub chunking: ChunkingConfig,
    /// JSON rule table replacing the built-in reranking rules.
    pub rules_path: Option<PathBuf>,
}

impl Settings {
    /// Defaults for everything except the documents folder.
    pub fn new(documents_dir: PathBuf) -> Self {
        Self {
            api_key: None,
            completion_model: DEFAULT_MODEL.to_string(),
            completion_url: DEFAULT_BASE_URL.to_string(),
            completion_timeout: DEFAULT_TIMEOUT,
            collection: DEFAULT_COLLECTION.to_string(),
            index_dir: None,
            documents_dir,
            embedding_model: DEFAULT_MODEL_ID.to_string(),
            candidates: DEFAULT_CANDIDATES,
            context_chunks: DEFAULT_CONTEXT_CHUNKS,
            chunking: ChunkingConfig::default(),
            rules_path: None,
        }
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.collection.is_empty()
            || !self
                .collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::Config(format!(
                "invalid collection name '{}': use letters, digits, '_' or '-'",
                self.collection
            )));
        }
        if self.candidates == 0 || self.context_chunks == 0 {
            return Err(Error::Config(
                "candidate and context chunk limits must be positive"
                    .to_string(),
            ));
        }
        if self.chunking.chunk_size == 0 {
            return Err(Error::Config(
                "chunk size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The API key, or a configuration error naming the variable to set.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("GROQ_API_KEY is not set".to_string()))
    }

    /// The rule table from `rules_path`, or the built-in one.
    pub fn load_rules(&self) -> Result<RuleTable> {
        match &self.rules_path {
            Some(path) => RuleTable::from_json_file(path).map_err(|e| {
                Error::Config(format!(
                    "cannot load rules from {}: {e}",
                    path.display()
                ))
            }),
            None => Ok(RuleTable::default()),
        }
    }
}
