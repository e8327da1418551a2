use candle_core::Tensor;

use crate::{
    error::{Error, Result},
    model_manager::ModelManager,
};

/// Number of chunks sent to the model per encode call.
pub const EMBED_BATCH_SIZE: usize = 32;

/// Turns text into fixed-length vectors for similarity search.
pub trait Embedder: Send {
    /// Identifier of the underlying model.
    fn model_id(&self) -> &str;

    /// Embed a batch of chunk texts, one vector per input, in input order.
    fn embed_documents(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a user question.
    fn embed_query(&mut self, query: &str) -> Result<Vec<f32>>;
}

/// [`Embedder`] backed by a ColBERT model.
///
/// ColBERT produces one vector per token; they are mean-pooled into a single
/// L2-normalised vector. All-zero rows (padding) are left out of the mean.
pub struct ColbertEmbedder {
    model: ModelManager,
}

impl ColbertEmbedder {
    pub fn new(model: ModelManager) -> Self {
        Self { model }
    }
}

impl Embedder for ColbertEmbedder {
    fn model_id(&self) -> &str {
        self.model.model_id()
    }

    fn embed_documents(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            let embeddings = self.model.encode_documents(batch)?;
            // embeddings shape: [batch_size, num_tokens, dimension]
            let per_doc: Vec<Vec<Vec<f32>>> =
                embeddings.to_vec3().map_err(tensor_error)?;
            if per_doc.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "model returned {} embeddings for {} inputs",
                    per_doc.len(),
                    batch.len()
                )));
            }
            vectors.extend(per_doc.iter().map(|tokens| mean_pool(tokens)));
        }

        Ok(vectors)
    }

    fn embed_query(&mut self, query: &str) -> Result<Vec<f32>> {
        let embeddings = self.model.encode_query(query)?;
        Ok(mean_pool(&tensor_to_rows(&embeddings)?))
    }
}

fn tensor_error(e: candle_core::Error) -> Error {
    Error::Embedding(format!("tensor computation error: {e}"))
}

/// Convert a 2D Tensor [tokens, dimension] into rows.
fn tensor_to_rows(tensor: &Tensor) -> Result<Vec<Vec<f32>>> {
    tensor.to_vec2::<f32>().map_err(tensor_error)
}

/// Average the non-zero token rows and normalise the result to unit length.
pub fn mean_pool(tokens: &[Vec<f32>]) -> Vec<f32> {
    let dimension = tokens.first().map_or(0, Vec::len);
    let mut sum = vec![0.0f32; dimension];
    let mut count = 0usize;

    for row in tokens {
        if row.iter().all(|v| *v == 0.0) {
            continue;
        }
        for (acc, v) in sum.iter_mut().zip(row) {
            *acc += v;
        }
        count += 1;
    }

    if count > 0 {
        for v in &mut sum {
            *v /= count as f32;
        }
    }
    normalize(&mut sum);
    sum
}

/// Scale `v` to unit length in place; zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v {
            *x /= norm;
        }
    }
}
