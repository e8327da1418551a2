//! ragchat - a retrieval-augmented chat assistant over PDF and DOCX files.
//!
//! Documents are split into overlapping chunks, embedded with a ColBERT
//! model and stored in a vector index. Each question retrieves the nearest
//! chunks, reranks them with a declarative rule table and sends them, with
//! their provenance, to a hosted chat-completion model.
//!
//! # Quick start
//!
//! ```no_run
//! use ragchat::{
//!     ChatCompletionsClient,
//!     ColbertEmbedder,
//!     DataDir,
//!     ModelManager,
//!     RagPipeline,
//!     Settings,
//! };
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let mut settings = Settings::new(data_dir.documents_dir());
//! settings.index_dir = Some(data_dir.index_dir());
//!
//! let completion = ChatCompletionsClient::new(
//!     &std::env::var("GROQ_API_KEY").unwrap(),
//!     &settings.completion_url,
//!     &settings.completion_model,
//!     settings.completion_timeout,
//! )
//! .unwrap();
//! let embedder = ColbertEmbedder::new(ModelManager::with_model_id(
//!     settings.embedding_model.clone(),
//! ));
//!
//! let mut pipeline = RagPipeline::open(
//!     settings,
//!     Box::new(embedder),
//!     Box::new(completion),
//! )
//! .unwrap();
//! pipeline.sync_folder().unwrap();
//!
//! let result = pipeline.chat("How do I set up the laptop?").unwrap();
//! println!("{}", result.answer);
//! for source in result.sources() {
//!     println!("  - {source}");
//! }
//! ```

pub mod chunking;
pub mod cli;
pub mod completion;
pub mod config;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod loader;
pub mod model_manager;
pub mod pipeline;
pub mod prompt;
pub mod rerank;
pub mod server;
pub mod sync;
pub mod vector_index;
pub mod walker;

pub use completion::{ChatCompletionsClient, CompletionModel};
pub use config::Settings;
pub use data_dir::DataDir;
pub use embedding::{ColbertEmbedder, Embedder};
pub use error::{Error, Result};
pub use model_manager::ModelManager;
pub use pipeline::{ChatResult, RagPipeline};
pub use rerank::RuleTable;
pub use sync::SyncResult;
pub use vector_index::{Chunk, VectorIndex};
