use serde::{Deserialize, Serialize};

use crate::error::EmbeddingError;

/// Width of the face embeddings produced by the extraction service.
pub const EMBEDDING_DIM: usize = 512;

/// A face embedding: non-empty, every value finite.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Result<Self, EmbeddingError> {
        if values.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite { index });
        }
        Ok(Self(values))
    }

    /// Like [`Embedding::new`] but also requires exactly `dim` values.
    pub fn with_dim(values: Vec<f32>, dim: usize) -> Result<Self, EmbeddingError> {
        if values.len() != dim {
            return Err(EmbeddingError::WrongLength {
                expected: dim,
                found: values.len(),
            });
        }
        Self::new(values)
    }

    /// Decode a stored JSON array of numbers.
    pub fn parse(raw: &str, dim: usize) -> Result<Self, EmbeddingError> {
        let values: Vec<f32> = serde_json::from_str(raw)?;
        Self::with_dim(values, dim)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    pub fn to_json(&self) -> String {
        // a Vec<f32> of finite values always serializes
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

impl AsRef<[f32]> for Embedding {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

/// Decode a stored JSON array where individual entries may be `null`.
/// Non-finite numbers are treated as missing.
pub fn parse_partial(raw: &str, dim: usize) -> Result<Vec<Option<f32>>, EmbeddingError> {
    let values: Vec<Option<f32>> = serde_json::from_str(raw)?;
    if values.len() != dim {
        return Err(EmbeddingError::WrongLength {
            expected: dim,
            found: values.len(),
        });
    }
    Ok(values
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect())
}
