use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::{
    chunking::{ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    completion::{DEFAULT_BASE_URL, DEFAULT_MODEL},
    config::{DEFAULT_COLLECTION, Settings},
    data_dir::DataDir,
    model_manager::{
        DEFAULT_DOWNLOAD_ATTEMPTS,
        DEFAULT_DOWNLOAD_DELAY,
        DEFAULT_MODEL_ID,
    },
    rerank::{DEFAULT_CANDIDATES, DEFAULT_CONTEXT_CHUNKS},
};

#[derive(Debug, Parser)]
#[command(
    name = "ragchat",
    version,
    about = "Chat with your PDF and DOCX documents"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Settings shared by every command that builds a pipeline.
#[derive(Debug, Args)]
pub struct PipelineArgs {
    /// API key for the completion service
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Completion model identifier
    #[arg(
        long,
        env = "LLM_MODEL",
        default_value = DEFAULT_MODEL,
        global = true
    )]
    pub llm_model: String,

    /// Base URL of the OpenAI-compatible completion API
    #[arg(
        long,
        env = "RAGCHAT_COMPLETION_URL",
        default_value = DEFAULT_BASE_URL,
        global = true
    )]
    pub completion_url: String,

    /// Vector index collection name
    #[arg(
        long,
        env = "COLLECTION_NAME",
        default_value = DEFAULT_COLLECTION,
        global = true
    )]
    pub collection: String,

    /// Keep the index on disk in this directory (in memory when unset)
    #[arg(long, env = "RAGCHAT_INDEX_DIR", global = true)]
    pub index_dir: Option<PathBuf>,

    /// Keep the index on disk inside the data directory
    #[arg(long, global = true, conflicts_with = "index_dir")]
    pub persist: bool,

    /// Folder holding the documents to index
    #[arg(long, env = "RAGCHAT_DOCUMENTS_DIR", global = true)]
    pub documents_dir: Option<PathBuf>,

    /// Embedding model ID (HuggingFace) or local model path
    #[arg(
        long,
        env = "RAGCHAT_EMBEDDING_MODEL",
        default_value = DEFAULT_MODEL_ID,
        global = true
    )]
    pub model: String,

    /// JSON file replacing the built-in reranking rules
    #[arg(long, env = "RAGCHAT_RULES", global = true)]
    pub rules: Option<PathBuf>,

    /// Candidates fetched from the index per question
    #[arg(long, default_value_t = DEFAULT_CANDIDATES, global = true)]
    pub candidates: usize,

    /// Chunks kept for the prompt after reranking
    #[arg(long, default_value_t = DEFAULT_CONTEXT_CHUNKS, global = true)]
    pub context_chunks: usize,

    /// Chunk size in characters
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, global = true)]
    pub chunk_size: usize,

    /// Overlap between chunks in characters
    #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP, global = true)]
    pub chunk_overlap: usize,

    /// Do not prefix chunks with the document title
    #[arg(long, global = true)]
    pub no_title_prefix: bool,
}

impl PipelineArgs {
    /// Resolve into [`Settings`], placing unset folders under `data_dir`.
    pub fn settings(&self, data_dir: &DataDir) -> Settings {
        let index_dir = match (&self.index_dir, self.persist) {
            (Some(dir), _) => Some(dir.clone()),
            (None, true) => Some(data_dir.index_dir()),
            (None, false) => None,
        };

        Settings {
            api_key: self.api_key.clone(),
            completion_model: self.llm_model.clone(),
            completion_url: self.completion_url.clone(),
            collection: self.collection.clone(),
            index_dir,
            documents_dir: self
                .documents_dir
                .clone()
                .unwrap_or_else(|| data_dir.documents_dir()),
            embedding_model: self.model.clone(),
            candidates: self.candidates,
            context_chunks: self.context_chunks,
            chunking: ChunkingConfig {
                chunk_size: self.chunk_size,
                overlap: self.chunk_overlap,
                prefix_title: !self.no_title_prefix,
            },
            rules_path: self.rules.clone(),
            ..Settings::new(data_dir.documents_dir())
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the HTTP API
    Serve(ServeArgs),
    /// Rebuild the index from the documents folder
    Sync,
    /// Ask a question, or start an interactive session without one
    Ask(AskArgs),
    /// Show which chunks a question retrieves, without calling the model
    Retrieve(RetrieveArgs),
    /// Show configuration and index statistics
    Status(StatusArgs),
    /// Download the embedding model into the local cache
    DownloadModel(DownloadModelArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

#[derive(Debug, Parser)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "RAGCHAT_BIND", default_value = "127.0.0.1:8000")]
    pub bind: String,
}

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// The question; omit to read questions from stdin
    pub question: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct RetrieveArgs {
    /// The question to retrieve context for
    pub question: String,

    /// Print the full context instead of one line per chunk
    #[arg(long)]
    pub context: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct DownloadModelArgs {
    /// Attempts before giving up
    #[arg(long, default_value_t = DEFAULT_DOWNLOAD_ATTEMPTS)]
    pub attempts: u32,

    /// Seconds to wait between attempts
    #[arg(long, default_value_t = DEFAULT_DOWNLOAD_DELAY.as_secs())]
    pub delay: u64,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "ragchat",
            &mut std::io::stdout(),
        );
    }
}
