use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::{info, warn};
use ordered_float::NotNan;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::embedding::Embedding;
use crate::error::{Error, Result};
use crate::metrics::distance;
use crate::params::Params;
use crate::types::{Metric, TrainingRow};

/// Codes follow the sorted order of the labels.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct LabelCodec {
    classes: Vec<String>,
}

impl LabelCodec {
    pub fn fit<'a, I: IntoIterator<Item = &'a str>>(labels: I) -> Self {
        let mut classes: Vec<String> = labels.into_iter().map(str::to_string).collect();
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    pub fn encode(&self, label: &str) -> Option<u32> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(label))
            .ok()
            .map(|i| i as u32)
    }

    pub fn decode(&self, code: u32) -> Option<&str> {
        self.classes.get(code as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ModelArtifact {
    pub trained_for: String,
    pub created_at: DateTime<Utc>,
    pub metric: Metric,
    pub k: usize,
    pub dim: usize,
    pub codec: LabelCodec,
    pub points: Vec<Vec<f32>>,
    pub codes: Vec<u32>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

/// Distance-weighted k-nearest-neighbor identity classifier. Neighbors are
/// ranked over every training point.
pub struct KnnClassifier {
    artifact: ModelArtifact,
}

// a column with no observed value is filled with 0.0
fn impute(rows: &[Vec<Option<f32>>], dim: usize) -> Vec<Vec<f32>> {
    let mut sums = vec![0.0f64; dim];
    let mut counts = vec![0usize; dim];
    for row in rows {
        for (j, v) in row.iter().enumerate() {
            if let Some(v) = v {
                sums[j] += f64::from(*v);
                counts[j] += 1;
            }
        }
    }
    let means: Vec<f32> = sums
        .iter()
        .zip(counts.iter())
        .map(|(s, &c)| if c == 0 { 0.0 } else { (s / c as f64) as f32 })
        .collect();
    rows.iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(j, v)| v.unwrap_or(means[j]))
                .collect()
        })
        .collect()
}

impl KnnClassifier {
    /// Rows without an embedding, or with no observed value, are dropped
    /// before fitting.
    pub fn train(submitter: &str, rows: &[TrainingRow], params: &Params) -> Result<Self> {
        let usable: Vec<(&str, &Vec<Option<f32>>)> = rows
            .iter()
            .filter_map(|r| {
                r.embedding
                    .as_ref()
                    .filter(|e| e.iter().any(Option::is_some))
                    .map(|e| (r.label.as_str(), e))
            })
            .collect();
        let dropped = rows.len() - usable.len();
        if dropped > 0 {
            warn!("dropped {dropped} training rows without embedding for {submitter}");
        }
        if usable.is_empty() {
            return Err(Error::NoTrainingData {
                submitter: submitter.to_string(),
            });
        }

        let dim = usable[0].1.len();
        if let Some((_, e)) = usable.iter().find(|(_, e)| e.len() != dim) {
            return Err(Error::DimensionMismatch {
                expected: dim,
                found: e.len(),
            });
        }

        let codec = LabelCodec::fit(usable.iter().map(|(label, _)| *label));
        let codes = usable
            .iter()
            .map(|(label, _)| {
                codec
                    .encode(label)
                    .ok_or_else(|| Error::Compute(format!("label {label} missing from codec")))
            })
            .collect::<Result<Vec<u32>>>()?;
        let partial: Vec<Vec<Option<f32>>> = usable.iter().map(|(_, e)| (*e).clone()).collect();
        let points = impute(&partial, dim);

        let artifact = ModelArtifact {
            trained_for: submitter.to_string(),
            created_at: Utc::now(),
            metric: params.metric,
            k: params.max_neighbors.min(points.len()),
            dim,
            codec,
            points,
            codes,
        };
        let model = Self::from_artifact(artifact)?;
        info!(
            "trained model for {}: {} rows, {} identities, k={}",
            submitter,
            model.artifact.points.len(),
            model.artifact.codec.len(),
            model.artifact.k
        );
        Ok(model)
    }

    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self> {
        if artifact.points.is_empty() {
            return Err(Error::NoTrainingData {
                submitter: artifact.trained_for,
            });
        }
        if artifact.points.len() != artifact.codes.len() {
            return Err(Error::Corrupt(format!(
                "{} points but {} labels",
                artifact.points.len(),
                artifact.codes.len()
            )));
        }
        if artifact.k == 0 || artifact.k > artifact.points.len() {
            return Err(Error::Corrupt(format!("invalid k {}", artifact.k)));
        }
        if let Some(code) = artifact
            .codes
            .iter()
            .find(|&&c| c as usize >= artifact.codec.len())
        {
            return Err(Error::Corrupt(format!("unknown label code {code}")));
        }
        if let Some(p) = artifact.points.iter().find(|p| p.len() != artifact.dim) {
            return Err(Error::DimensionMismatch {
                expected: artifact.dim,
                found: p.len(),
            });
        }
        Ok(Self { artifact })
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    pub fn k(&self) -> usize {
        self.artifact.k
    }

    pub fn codec(&self) -> &LabelCodec {
        &self.artifact.codec
    }

    pub fn classify(&self, embedding: &Embedding) -> Result<Prediction> {
        let query = embedding.as_slice();
        if query.len() != self.artifact.dim {
            return Err(Error::DimensionMismatch {
                expected: self.artifact.dim,
                found: query.len(),
            });
        }

        let mut ranked = self
            .artifact
            .points
            .iter()
            .zip(self.artifact.codes.iter())
            .enumerate()
            .map(|(i, (point, &code))| {
                NotNan::new(distance(self.artifact.metric, query, point))
                    .map(|d| (d, code, i))
                    .map_err(|_| Error::Compute("distance is NaN".into()))
            })
            .collect::<Result<Vec<_>>>()?;
        ranked.sort();
        ranked.truncate(self.artifact.k);
        if ranked.is_empty() {
            return Err(Error::Compute("no training points".into()));
        }

        let exact = ranked.iter().any(|(d, _, _)| d.into_inner() == 0.0);
        let mut votes: BTreeMap<u32, f64> = BTreeMap::new();
        for (d, code, _) in &ranked {
            let d = f64::from(d.into_inner());
            let w = if exact {
                if d == 0.0 {
                    1.0
                } else {
                    0.0
                }
            } else {
                1.0 / d
            };
            *votes.entry(*code).or_insert(0.0) += w;
        }
        let total: f64 = votes.values().sum();
        let mut best: Option<(u32, f64)> = None;
        for (&code, &w) in &votes {
            match best {
                Some((_, bw)) if w <= bw => {}
                _ => best = Some((code, w)),
            }
        }
        let (code, weight) =
            best.ok_or_else(|| Error::Compute("no neighbor votes".into()))?;
        let label = self
            .artifact
            .codec
            .decode(code)
            .ok_or_else(|| Error::Compute(format!("unknown label code {code}")))?;
        Ok(Prediction {
            label: label.to_string(),
            confidence: (weight / total) as f32,
        })
    }

    pub fn classify_batch(&self, queries: &[Embedding]) -> Result<Vec<Prediction>> {
        queries.par_iter().map(|q| self.classify(q)).collect()
    }
}
