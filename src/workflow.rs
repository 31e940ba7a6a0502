use chrono::{DateTime, Utc};
use log::{error, info, warn};

use crate::classifier::{KnnClassifier, Prediction};
use crate::embedding::Embedding;
use crate::error::{Error, Result};
use crate::matcher::match_embeddings;
use crate::params::Params;
use crate::repository::{EmbeddingRepository, ModelStore};
use crate::types::{MatchOutcome, Origin, Status};

#[derive(Clone, Debug, PartialEq)]
pub struct TrainingSummary {
    pub submitter: String,
    pub rows: usize,
    pub used_rows: usize,
    pub identities: usize,
    pub k: usize,
    pub created_at: DateTime<Utc>,
}

fn logged<T>(op: &str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        match e {
            Error::NoTrainingData { .. }
            | Error::ModelNotTrained { .. }
            | Error::NotFound { .. } => warn!("{op}: {e}"),
            _ => error!("{op} failed: {e}"),
        }
    }
    result
}

/// Matching only proposes pairs. Statuses change solely through
/// [`MatchWorkflow::update_status`], after an operator confirms a pair.
pub struct MatchWorkflow<'a, R: EmbeddingRepository + ?Sized> {
    repo: &'a R,
    params: Params,
}

impl<'a, R: EmbeddingRepository + ?Sized> MatchWorkflow<'a, R> {
    pub fn new(repo: &'a R, params: Params) -> Result<Self> {
        params.validate()?;
        Ok(Self { repo, params })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn propose_matches(&self) -> Result<MatchOutcome> {
        logged("match", self.run_match(self.params.threshold))
    }

    pub fn propose_matches_with(&self, threshold: f32) -> Result<MatchOutcome> {
        logged("match", self.run_match(threshold))
    }

    fn run_match(&self, threshold: f32) -> Result<MatchOutcome> {
        let registered = self
            .repo
            .list_embeddings(Origin::Registered, Status::NotFound)?;
        let sightings = self
            .repo
            .list_embeddings(Origin::PublicSighting, Status::NotFound)?;
        match_embeddings(&registered, &sightings, threshold)
    }

    pub fn update_status(&self, registered_id: &str, sighting_id: &str) -> Result<()> {
        let result = self.repo.set_status_and_link(registered_id, sighting_id);
        if result.is_ok() {
            info!("confirmed {registered_id} <- {sighting_id}");
        }
        logged("update status", result)
    }

    /// Retrains the submitter's classifier from scratch and replaces the
    /// stored artifact. Nothing is written when training fails.
    pub fn train<S: ModelStore + ?Sized>(
        &self,
        submitter: &str,
        store: &S,
    ) -> Result<TrainingSummary> {
        logged("train", self.run_train(submitter, store))
    }

    fn run_train<S: ModelStore + ?Sized>(
        &self,
        submitter: &str,
        store: &S,
    ) -> Result<TrainingSummary> {
        let rows = self.repo.training_rows(submitter)?;
        let model: KnnClassifier = KnnClassifier::train(submitter, &rows, &self.params)?;
        let artifact = model.artifact();
        store.save(submitter, artifact)?;
        Ok(TrainingSummary {
            submitter: submitter.to_string(),
            rows: rows.len(),
            used_rows: artifact.points.len(),
            identities: artifact.codec.len(),
            k: artifact.k,
            created_at: artifact.created_at,
        })
    }

    pub fn load_classifier<S: ModelStore + ?Sized>(
        &self,
        submitter: &str,
        store: &S,
    ) -> Result<KnnClassifier> {
        logged(
            "load model",
            store
                .load(submitter)
                .and_then(KnnClassifier::from_artifact),
        )
    }

    pub fn classify<S: ModelStore + ?Sized>(
        &self,
        submitter: &str,
        embedding: &Embedding,
        store: &S,
    ) -> Result<Prediction> {
        let model = self.load_classifier(submitter, store)?;
        logged("classify", model.classify(embedding))
    }
}
