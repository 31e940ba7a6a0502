use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::embedding::Embedding;

pub type CaseId = String;

/// Matched sighting ids keyed by the registered case they were matched to.
pub type MatchMap = BTreeMap<CaseId, Vec<CaseId>>;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Origin {
    Registered,
    PublicSighting,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Registered => f.write_str("registered"),
            Origin::PublicSighting => f.write_str("sighting"),
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    NotFound,
    Found,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::NotFound => f.write_str("NF"),
            Status::Found => f.write_str("F"),
        }
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub enum Metric {
    Cosine = 1,
    #[default]
    Euclidean = 2,
}

/// One row handed out by a repository. `embedding` is `None` when the stored
/// value was missing or failed validation.
#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddingRow {
    pub case_id: CaseId,
    pub embedding: Option<Embedding>,
}

impl EmbeddingRow {
    pub fn new(case_id: impl Into<CaseId>, embedding: Option<Embedding>) -> Self {
        Self {
            case_id: case_id.into(),
            embedding,
        }
    }
}

/// Labelled training input. Individual values may be missing; a missing
/// `embedding` drops the whole row.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingRow {
    pub label: String,
    pub embedding: Option<Vec<Option<f32>>>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct MatchCandidate {
    pub sighting_id: CaseId,
    pub registered_id: CaseId,
    pub similarity: f32,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct MatchReport {
    pub matches: MatchMap,
    /// Accepted pairs in sighting order.
    pub candidates: Vec<MatchCandidate>,
    /// Sightings whose best similarity fell below the threshold.
    pub unmatched: Vec<(CaseId, f32)>,
    pub excluded_registered: usize,
    pub excluded_sightings: usize,
    pub pairs_compared: usize,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub enum MatchOutcome {
    /// One side had no usable embeddings, so nothing was compared.
    EmptyComparisonSet {
        registered: usize,
        sightings: usize,
        excluded_registered: usize,
        excluded_sightings: usize,
    },
    Compared(MatchReport),
}

impl MatchOutcome {
    pub fn matches(&self) -> Option<&MatchMap> {
        match self {
            MatchOutcome::Compared(report) => Some(&report.matches),
            MatchOutcome::EmptyComparisonSet { .. } => None,
        }
    }

    pub fn is_empty_comparison(&self) -> bool {
        matches!(self, MatchOutcome::EmptyComparisonSet { .. })
    }
}
