use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::embedding::EMBEDDING_DIM;
use crate::error::{Error, Result};
use crate::matcher::DEFAULT_THRESHOLD;
use crate::types::Metric;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct Params {
    /// Minimum similarity for a proposed match.
    pub threshold: f32,
    /// Upper bound on k for the identity classifier.
    pub max_neighbors: usize,
    /// Distance used by the identity classifier.
    pub metric: Metric,
    pub dimension: usize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            max_neighbors: 3,
            metric: Metric::Euclidean,
            dimension: EMBEDDING_DIM,
        }
    }
}

impl Params {
    /// Loads parameters from a JSON file. Missing keys keep their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let params: Params = serde_json::from_reader(reader)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || !(-1.0..=1.0).contains(&self.threshold) {
            return Err(Error::InvalidThreshold(self.threshold));
        }
        if self.max_neighbors == 0 {
            return Err(Error::InvalidParams("max_neighbors must be positive".into()));
        }
        if self.dimension == 0 {
            return Err(Error::InvalidParams("dimension must be positive".into()));
        }
        Ok(())
    }
}
