use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::info;
use serde::{Deserialize, Serialize};

use crate::classifier::ModelArtifact;
use crate::error::{Error, Result};
use crate::repository::{lock, CaseRecord, CaseTable, EmbeddingRepository, ModelStore};
use crate::types::{CaseId, EmbeddingRow, Origin, Status, TrainingRow};

pub const MAGIC: [u8; 4] = *b"FMC0";
pub const MODEL_MAGIC: [u8; 4] = *b"FMK0";
pub const VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
pub struct Header {
    pub magic: [u8; 4],
    pub version: u8,
    pub dim: u32,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub enum LogEntry {
    Case(CaseRecord),
    /// Both sides of a confirmed match, written as one entry.
    Link {
        registered_id: CaseId,
        sighting_id: CaseId,
    },
    Removed {
        origin: Origin,
        id: CaseId,
    },
}

fn read_header(reader: &mut impl std::io::Read, magic: [u8; 4]) -> Result<Header> {
    let header: Header = bincode::deserialize_from(reader)?;
    if header.magic != magic {
        return Err(Error::Corrupt("invalid magic".into()));
    }
    if header.version != VERSION {
        return Err(Error::Corrupt("unsupported version".into()));
    }
    Ok(header)
}

fn apply(table: &mut CaseTable, entry: LogEntry) -> Result<()> {
    match entry {
        LogEntry::Case(record) => table.insert(record),
        LogEntry::Link {
            registered_id,
            sighting_id,
        } => table.link(&registered_id, &sighting_id),
        LogEntry::Removed { origin, id } => table.remove(origin, &id).map(|_| ()),
    }
}

/// Runs `write` against the end of the file. On failure the file is cut
/// back to its previous length so a torn entry never reaches replay.
fn append_with<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&File>) -> Result<()>,
{
    let file = OpenOptions::new().append(true).open(path)?;
    let len = file.metadata()?.len();
    let result = {
        let mut writer = BufWriter::new(&file);
        write(&mut writer).and_then(|_| writer.flush().map_err(Error::from))
    };
    if result.is_err() {
        file.set_len(len)?;
    }
    result
}

/// Append-only case log on a single file. Every mutation is validated
/// against the in-memory table, appended, and only then applied.
pub struct CaseLog {
    path: PathBuf,
    table: Mutex<CaseTable>,
}

impl CaseLog {
    /// Opens the log at `path`, creating it with `dim` when missing.
    pub fn open<P: AsRef<Path>>(path: P, dim: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            let mut reader = BufReader::new(File::open(&path)?);
            let header = read_header(&mut reader, MAGIC)?;
            if header.dim as usize != dim {
                return Err(Error::DimensionMismatch {
                    expected: dim,
                    found: header.dim as usize,
                });
            }
            let mut table = CaseTable::new(dim);
            let mut replayed = 0usize;
            loop {
                match bincode::deserialize_from::<_, LogEntry>(&mut reader) {
                    Ok(entry) => {
                        apply(&mut table, entry)
                            .map_err(|e| Error::Corrupt(format!("replay failed: {e}")))?;
                        replayed += 1;
                    }
                    Err(e) => {
                        if let bincode::ErrorKind::Io(ref io_err) = *e {
                            if io_err.kind() == std::io::ErrorKind::UnexpectedEof {
                                break;
                            }
                        }
                        return Err(e.into());
                    }
                }
            }
            info!("opened {} ({} entries, {} cases)", path.display(), replayed, table.len());
            Ok(Self {
                path,
                table: Mutex::new(table),
            })
        } else {
            let header = Header {
                magic: MAGIC,
                version: VERSION,
                dim: dim as u32,
            };
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            let mut writer = BufWriter::new(file);
            bincode::serialize_into(&mut writer, &header)?;
            writer.flush()?;
            Ok(Self {
                path,
                table: Mutex::new(CaseTable::new(dim)),
            })
        }
    }

    fn append_entry(&self, entry: &LogEntry) -> Result<()> {
        append_with(&self.path, |writer| Ok(bincode::serialize_into(writer, entry)?))
    }

    pub fn register(&self, record: CaseRecord) -> Result<()> {
        let mut table = lock(&self.table)?;
        table.check_insert(&record)?;
        let entry = LogEntry::Case(record);
        self.append_entry(&entry)?;
        apply(&mut table, entry)
    }

    /// Administrative deletion.
    pub fn remove(&self, origin: Origin, id: &str) -> Result<()> {
        let mut table = lock(&self.table)?;
        if table.get(origin, id).is_none() {
            return Err(Error::NotFound {
                origin,
                id: id.to_string(),
            });
        }
        let entry = LogEntry::Removed {
            origin,
            id: id.to_string(),
        };
        self.append_entry(&entry)?;
        apply(&mut table, entry)
    }

    pub fn get(&self, origin: Origin, id: &str) -> Result<Option<CaseRecord>> {
        Ok(lock(&self.table)?.get(origin, id).cloned())
    }

    pub fn records(&self, origin: Origin) -> Result<Vec<CaseRecord>> {
        Ok(lock(&self.table)?.records(origin).cloned().collect())
    }

    pub fn filtered(
        &self,
        origin: Origin,
        submitter: Option<&str>,
        status: Option<Status>,
    ) -> Result<Vec<CaseRecord>> {
        Ok(lock(&self.table)?
            .filtered(origin, submitter, status)
            .cloned()
            .collect())
    }

    pub fn count_registered(&self, submitter: &str, status: Option<Status>) -> Result<usize> {
        Ok(lock(&self.table)?.count_registered(submitter, status))
    }

    pub fn dimension(&self) -> Result<usize> {
        Ok(lock(&self.table)?.dimension())
    }
}

impl EmbeddingRepository for CaseLog {
    fn list_embeddings(&self, origin: Origin, status: Status) -> Result<Vec<EmbeddingRow>> {
        Ok(lock(&self.table)?.list_embeddings(origin, status))
    }

    fn training_rows(&self, submitter: &str) -> Result<Vec<TrainingRow>> {
        Ok(lock(&self.table)?.training_rows(submitter))
    }

    fn set_status_and_link(&self, registered_id: &str, sighting_id: &str) -> Result<()> {
        let mut table = lock(&self.table)?;
        table.check_link(registered_id, sighting_id)?;
        let entry = LogEntry::Link {
            registered_id: registered_id.to_string(),
            sighting_id: sighting_id.to_string(),
        };
        self.append_entry(&entry)?;
        apply(&mut table, entry)
    }
}

/// One artifact file per submitter under `dir`.
pub struct FileModelStore {
    dir: PathBuf,
}

impl FileModelStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, submitter: &str) -> PathBuf {
        let name: String = submitter.bytes().map(|b| format!("{b:02x}")).collect();
        self.dir.join(format!("{name}.knn"))
    }
}

impl ModelStore for FileModelStore {
    fn save(&self, submitter: &str, artifact: &ModelArtifact) -> Result<()> {
        let path = self.path_for(submitter);
        let tmp = path.with_extension("knn.tmp");
        {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            let mut writer = BufWriter::new(file);
            let header = Header {
                magic: MODEL_MAGIC,
                version: VERSION,
                dim: artifact.dim as u32,
            };
            bincode::serialize_into(&mut writer, &header)?;
            bincode::serialize_into(&mut writer, artifact)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &path)?;
        info!("saved model for {} to {}", submitter, path.display());
        Ok(())
    }

    fn load(&self, submitter: &str) -> Result<ModelArtifact> {
        let path = self.path_for(submitter);
        if !path.exists() {
            return Err(Error::ModelNotTrained {
                submitter: submitter.to_string(),
            });
        }
        let mut reader = BufReader::new(File::open(&path)?);
        read_header(&mut reader, MODEL_MAGIC)?;
        let artifact: ModelArtifact = bincode::deserialize_from(&mut reader)?;
        if artifact.trained_for != submitter {
            return Err(Error::Corrupt(format!(
                "model at {} belongs to {}",
                path.display(),
                artifact.trained_for
            )));
        }
        Ok(artifact)
    }
}
