use std::{
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use candle_core::{Device, Tensor};
use pylate_rs::ColBERT;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";

/// Default number of download attempts before giving up.
pub const DEFAULT_DOWNLOAD_ATTEMPTS: u32 = 10;

/// Fixed pause between download attempts.
pub const DEFAULT_DOWNLOAD_DELAY: Duration = Duration::from_secs(5);

/// Files the model cannot load without.
const REQUIRED_FILES: &[&str] =
    &["config.json", "tokenizer.json", "model.safetensors"];

/// Files some checkpoints ship and others do not.
const OPTIONAL_FILES: &[&str] = &[
    "config_sentence_transformers.json",
    "tokenizer_config.json",
    "special_tokens_map.json",
    "1_Dense/config.json",
    "1_Dense/model.safetensors",
];

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

fn model_error(e: impl std::fmt::Display) -> Error {
    Error::Embedding(e.to_string())
}

/// Manages the ColBERT model lifecycle, supporting lazy loading on first use.
pub struct ModelManager {
    model: Option<ColBERT>,
    model_id: String,
}

impl ModelManager {
    /// Creates a `ModelManager` for `model_id`. The model is not loaded
    /// until the first encode call.
    pub fn with_model_id(model_id: String) -> Self {
        Self {
            model: None,
            model_id,
        }
    }

    /// Returns the model ID that will be (or has been) loaded.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Returns `true` if the model has already been loaded into memory.
    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Ensures the model is loaded, downloading from HuggingFace Hub if needed.
    fn ensure_loaded(&mut self) -> Result<&mut ColBERT> {
        if !self.is_loaded() {
            info!(model = %self.model_id, "loading embedding model");
            let colbert: ColBERT = ColBERT::from(&self.model_id)
                .with_device(default_device())
                .try_into()
                .map_err(model_error)?;
            self.model = Some(colbert);
        }

        self.model
            .as_mut()
            .ok_or_else(|| Error::Embedding("model not loaded".to_string()))
    }

    /// Encodes document texts into token-level embeddings `[B, T, D]`.
    pub fn encode_documents(&mut self, texts: &[String]) -> Result<Tensor> {
        let model = self.ensure_loaded()?;
        model.encode(texts, false).map_err(model_error)
    }

    /// Encodes a query string into token-level embeddings `[Q, D]`.
    pub fn encode_query(&mut self, query: &str) -> Result<Tensor> {
        let model = self.ensure_loaded()?;
        let embeddings =
            model.encode(&[query.to_string()], true).map_err(model_error)?;
        // Squeeze the batch dimension: [1, Q, D] -> [Q, D]
        embeddings.squeeze(0).map_err(model_error)
    }
}

/// Run `op` up to `max_attempts` times, sleeping a fixed `delay` between
/// failed attempts. The attempt number (1-based) is passed to `op`.
pub fn retry_fixed<T>(
    max_attempts: u32,
    delay: Duration,
    mut op: impl FnMut(u32) -> Result<T>,
) -> Result<T> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts => {
                warn!("attempt {attempt}/{max_attempts} failed: {e}");
                thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Prefetch the model's files into the local HuggingFace cache.
///
/// Local model directories are returned as-is. Remote downloads are retried
/// up to `max_attempts` times with a fixed `delay`; files completed by an
/// earlier attempt are served from the cache on the next one.
///
/// Returns the directory holding the downloaded files.
pub fn download_with_retries(
    model_id: &str,
    max_attempts: u32,
    delay: Duration,
) -> Result<PathBuf> {
    let local = Path::new(model_id);
    if local.is_dir() {
        debug!(path = %local.display(), "model is a local directory");
        return Ok(local.to_path_buf());
    }

    info!(model = model_id, "downloading model assets");

    let dir = retry_fixed(max_attempts, delay, |attempt| {
        let api = hf_hub::api::sync::Api::new().map_err(model_error)?;
        let repo = api.model(model_id.to_string());

        let mut dir = None;
        for file in REQUIRED_FILES {
            let path = repo.get(file).map_err(|e| {
                Error::Embedding(format!("failed to fetch {file}: {e}"))
            })?;
            dir = dir.or_else(|| path.parent().map(Path::to_path_buf));
        }
        for file in OPTIONAL_FILES {
            if let Err(e) = repo.get(file) {
                debug!("optional file {file} unavailable: {e}");
            }
        }

        info!("downloaded {model_id} after {attempt} attempt(s)");
        dir.ok_or_else(|| {
            Error::Embedding("download produced no files".to_string())
        })
    })?;

    Ok(dir)
}
