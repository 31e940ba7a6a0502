use thiserror::Error;

use crate::types::Origin;

/// Why a stored or submitted embedding could not be used.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("malformed embedding: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("embedding has {found} values, expected {expected}")]
    WrongLength { expected: usize, found: usize },
    #[error("embedding value at {index} is not finite")]
    NonFinite { index: usize },
    #[error("embedding is empty")]
    Empty,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("no usable training rows for submitter {submitter}")]
    NoTrainingData { submitter: String },
    #[error("no trained model for submitter {submitter}")]
    ModelNotTrained { submitter: String },
    #[error("{origin} case {id} not found")]
    NotFound { origin: Origin, id: String },
    #[error("duplicate {origin} case {id}")]
    DuplicateCase { origin: Origin, id: String },
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("invalid threshold {0}")]
    InvalidThreshold(f32),
    #[error("invalid parameter: {0}")]
    InvalidParams(String),
    #[error("computation failed: {0}")]
    Compute(String),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error("corrupt store: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] bincode::Error),
    #[error(transparent)]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
