pub mod classifier;
pub mod embedding;
pub mod error;
pub mod matcher;
pub mod metrics;
pub mod params;
pub mod repository;
pub mod storage;
pub mod types;
pub mod workflow;

pub use classifier::{KnnClassifier, LabelCodec, ModelArtifact, Prediction};
pub use embedding::{Embedding, EMBEDDING_DIM};
pub use error::{EmbeddingError, Error, Result};
pub use matcher::{match_embeddings, DEFAULT_THRESHOLD};
pub use metrics::similarity;
pub use params::Params;
pub use repository::{
    CaseRecord, CaseTable, EmbeddingRepository, InMemoryRepository, MemoryModelStore, ModelStore,
};
pub use storage::{CaseLog, FileModelStore};
pub use types::{
    CaseId, EmbeddingRow, MatchCandidate, MatchMap, MatchOutcome, MatchReport, Metric, Origin,
    Status, TrainingRow,
};
pub use workflow::{MatchWorkflow, TrainingSummary};
