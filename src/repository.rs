use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::classifier::ModelArtifact;
use crate::embedding::{parse_partial, Embedding};
use crate::error::{Error, Result};
use crate::types::{CaseId, EmbeddingRow, Origin, Status, TrainingRow};

/// Rows whose stored embedding is missing or invalid are listed with
/// `embedding: None`.
pub trait EmbeddingRepository {
    fn list_embeddings(&self, origin: Origin, status: Status) -> Result<Vec<EmbeddingRow>>;

    fn training_rows(&self, submitter: &str) -> Result<Vec<TrainingRow>>;

    /// Marks both cases found and links the sighting to the registered case.
    /// Either both records change or neither does.
    fn set_status_and_link(&self, registered_id: &str, sighting_id: &str) -> Result<()>;
}

pub trait ModelStore {
    fn save(&self, submitter: &str, artifact: &ModelArtifact) -> Result<()>;

    /// Fails with [`Error::ModelNotTrained`] when nothing is stored.
    fn load(&self, submitter: &str) -> Result<ModelArtifact>;
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct CaseRecord {
    pub id: CaseId,
    pub origin: Origin,
    pub submitted_by: Option<String>,
    /// Embedding as stored: a JSON array of numbers.
    pub embedding: Option<String>,
    pub status: Status,
    pub matched_with: Option<CaseId>,
}

impl CaseRecord {
    pub fn registered(
        id: impl Into<CaseId>,
        submitted_by: impl Into<String>,
        embedding: Option<&Embedding>,
    ) -> Self {
        Self {
            id: id.into(),
            origin: Origin::Registered,
            submitted_by: Some(submitted_by.into()),
            embedding: embedding.map(Embedding::to_json),
            status: Status::NotFound,
            matched_with: None,
        }
    }

    pub fn sighting(id: impl Into<CaseId>, embedding: Option<&Embedding>) -> Self {
        Self {
            id: id.into(),
            origin: Origin::PublicSighting,
            submitted_by: None,
            embedding: embedding.map(Embedding::to_json),
            status: Status::NotFound,
            matched_with: None,
        }
    }

    pub fn with_raw_embedding(mut self, raw: impl Into<String>) -> Self {
        self.embedding = Some(raw.into());
        self
    }

    pub fn submitted_by(mut self, submitter: impl Into<String>) -> Self {
        self.submitted_by = Some(submitter.into());
        self
    }
}

#[derive(Clone, Debug)]
pub struct CaseTable {
    dimension: usize,
    registered: BTreeMap<CaseId, CaseRecord>,
    sightings: BTreeMap<CaseId, CaseRecord>,
}

impl CaseTable {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            registered: BTreeMap::new(),
            sightings: BTreeMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn side(&self, origin: Origin) -> &BTreeMap<CaseId, CaseRecord> {
        match origin {
            Origin::Registered => &self.registered,
            Origin::PublicSighting => &self.sightings,
        }
    }

    fn side_mut(&mut self, origin: Origin) -> &mut BTreeMap<CaseId, CaseRecord> {
        match origin {
            Origin::Registered => &mut self.registered,
            Origin::PublicSighting => &mut self.sightings,
        }
    }

    pub fn get(&self, origin: Origin, id: &str) -> Option<&CaseRecord> {
        self.side(origin).get(id)
    }

    pub fn records(&self, origin: Origin) -> impl Iterator<Item = &CaseRecord> {
        self.side(origin).values()
    }

    pub fn filtered<'a>(
        &'a self,
        origin: Origin,
        submitter: Option<&'a str>,
        status: Option<Status>,
    ) -> impl Iterator<Item = &'a CaseRecord> + 'a {
        self.side(origin).values().filter(move |r| {
            submitter.map_or(true, |s| r.submitted_by.as_deref() == Some(s))
                && status.map_or(true, |s| r.status == s)
        })
    }

    /// Registered cases filed by `submitter`, optionally only those in `status`.
    pub fn count_registered(&self, submitter: &str, status: Option<Status>) -> usize {
        self.filtered(Origin::Registered, Some(submitter), status)
            .count()
    }

    pub fn len(&self) -> usize {
        self.registered.len() + self.sightings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn check_insert(&self, record: &CaseRecord) -> Result<()> {
        if self.side(record.origin).contains_key(&record.id) {
            return Err(Error::DuplicateCase {
                origin: record.origin,
                id: record.id.clone(),
            });
        }
        Ok(())
    }

    pub fn insert(&mut self, record: CaseRecord) -> Result<()> {
        self.check_insert(&record)?;
        self.side_mut(record.origin).insert(record.id.clone(), record);
        Ok(())
    }

    pub fn remove(&mut self, origin: Origin, id: &str) -> Result<CaseRecord> {
        self.side_mut(origin).remove(id).ok_or_else(|| Error::NotFound {
            origin,
            id: id.to_string(),
        })
    }

    pub fn check_link(&self, registered_id: &str, sighting_id: &str) -> Result<()> {
        for (origin, id) in [
            (Origin::Registered, registered_id),
            (Origin::PublicSighting, sighting_id),
        ] {
            if !self.side(origin).contains_key(id) {
                return Err(Error::NotFound {
                    origin,
                    id: id.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Validates both ids before touching either record.
    pub fn link(&mut self, registered_id: &str, sighting_id: &str) -> Result<()> {
        self.check_link(registered_id, sighting_id)?;
        if let Some(reg) = self.registered.get_mut(registered_id) {
            reg.status = Status::Found;
            reg.matched_with = Some(sighting_id.to_string());
        }
        if let Some(sighting) = self.sightings.get_mut(sighting_id) {
            sighting.status = Status::Found;
        }
        Ok(())
    }

    pub fn list_embeddings(&self, origin: Origin, status: Status) -> Vec<EmbeddingRow> {
        self.side(origin)
            .values()
            .filter(|r| r.status == status)
            .map(|r| {
                let embedding = r.embedding.as_deref().and_then(|raw| {
                    Embedding::parse(raw, self.dimension)
                        .map_err(|e| warn!("{} case {}: {}", origin, r.id, e))
                        .ok()
                });
                EmbeddingRow::new(r.id.clone(), embedding)
            })
            .collect()
    }

    pub fn training_rows(&self, submitter: &str) -> Vec<TrainingRow> {
        self.registered
            .values()
            .filter(|r| r.submitted_by.as_deref() == Some(submitter))
            .map(|r| {
                let embedding = r.embedding.as_deref().and_then(|raw| {
                    parse_partial(raw, self.dimension)
                        .map_err(|e| warn!("registered case {}: {}", r.id, e))
                        .ok()
                });
                TrainingRow {
                    label: r.id.clone(),
                    embedding,
                }
            })
            .collect()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::Corrupt("state lock poisoned".into()))
}

pub struct InMemoryRepository {
    table: Mutex<CaseTable>,
}

impl InMemoryRepository {
    pub fn new(dimension: usize) -> Self {
        Self {
            table: Mutex::new(CaseTable::new(dimension)),
        }
    }

    pub fn insert(&self, record: CaseRecord) -> Result<()> {
        lock(&self.table)?.insert(record)
    }

    pub fn get(&self, origin: Origin, id: &str) -> Result<Option<CaseRecord>> {
        Ok(lock(&self.table)?.get(origin, id).cloned())
    }
}

impl EmbeddingRepository for InMemoryRepository {
    fn list_embeddings(&self, origin: Origin, status: Status) -> Result<Vec<EmbeddingRow>> {
        Ok(lock(&self.table)?.list_embeddings(origin, status))
    }

    fn training_rows(&self, submitter: &str) -> Result<Vec<TrainingRow>> {
        Ok(lock(&self.table)?.training_rows(submitter))
    }

    fn set_status_and_link(&self, registered_id: &str, sighting_id: &str) -> Result<()> {
        lock(&self.table)?.link(registered_id, sighting_id)
    }
}

#[derive(Default)]
pub struct MemoryModelStore {
    models: Mutex<HashMap<String, ModelArtifact>>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelStore for MemoryModelStore {
    fn save(&self, submitter: &str, artifact: &ModelArtifact) -> Result<()> {
        lock(&self.models)?.insert(submitter.to_string(), artifact.clone());
        Ok(())
    }

    fn load(&self, submitter: &str) -> Result<ModelArtifact> {
        lock(&self.models)?
            .get(submitter)
            .cloned()
            .ok_or_else(|| Error::ModelNotTrained {
                submitter: submitter.to_string(),
            })
    }
}
