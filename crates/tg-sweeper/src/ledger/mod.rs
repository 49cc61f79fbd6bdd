//! File-backed ledger of published messages that must be deleted once they
//! expire.
//!
//! The ledger is a best-effort cache, not a system of record. A missing or
//! corrupt store is treated as an empty ledger, and failures to write it are
//! only logged. The store is read and overwritten as a whole, without any
//! locking, so concurrent runs are last-writer-wins.

mod model;
mod sweep;

use crate::error::fatal;
use crate::prelude::*;
use crate::Result;
use serde::Deserialize;
use std::io::Write as _;
use std::path::{Path, PathBuf};

pub use model::{Record, RecordId};
pub use sweep::{DeleteOutcome, Deleter, SweepPolicy, SweepReport};

#[derive(Deserialize)]
pub(crate) struct Config {
    #[serde(default = "default_ledger_path")]
    pub(crate) path: PathBuf,

    #[serde(default = "default_delete_after_minutes")]
    pub(crate) delete_after_minutes: u32,

    /// `0` disables the ceiling
    #[serde(default = "default_max_retained")]
    pub(crate) max_retained: usize,
}

fn default_ledger_path() -> PathBuf {
    "message_ids.yml".into()
}

fn default_delete_after_minutes() -> u32 {
    60
}

fn default_max_retained() -> usize {
    300
}

impl Config {
    pub(crate) fn validated(self) -> Result<Self> {
        if self.path.as_os_str().is_empty() {
            return Err(fatal!("The ledger path must not be empty"));
        }
        Ok(self)
    }

    pub(crate) fn sweep_policy(&self) -> SweepPolicy {
        SweepPolicy {
            max_age: chrono::Duration::minutes(self.delete_after_minutes.into()),
            max_retained: Some(self.max_retained).filter(|&max| max > 0),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Failed to read the ledger at {}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("The ledger at {} is not a valid YAML document", .path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("The ledger at {} doesn't contain a list of records", .path.display())]
    NotASequence { path: PathBuf },

    #[error("Malformed record at index {index} in the ledger at {}", .path.display())]
    MalformedRecord {
        path: PathBuf,
        index: usize,
        source: serde_yaml::Error,
    },

    #[error("Failed to serialize the ledger")]
    Serialize { source: serde_yaml::Error },

    #[error("Failed to write the ledger to {}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to replace the ledger at {}", .path.display())]
    Persist {
        path: PathBuf,
        source: tempfile::PersistError,
    },
}

/// Handle to the ledger persisted in a file
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads all records from the store.
    ///
    /// An absent store, an unreadable file, a document that isn't a list, or
    /// unparseable content all yield an empty ledger. Malformed records are
    /// skipped.
    pub fn load(&self) -> Vec<Record> {
        let content = match fs_err::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "The ledger doesn't exist yet");
                return vec![];
            }
            Err(source) => {
                let err = LedgerError::Read {
                    path: self.path.clone(),
                    source,
                };
                warn!(
                    err = %err.display_chain(),
                    "The ledger can't be read, starting with an empty one",
                );
                return vec![];
            }
        };

        self.parse(&content).unwrap_or_else(|err| {
            warn!(
                err = %err.display_chain(),
                "The ledger is corrupt, starting with an empty one",
            );
            vec![]
        })
    }

    fn parse(&self, content: &str) -> Result<Vec<Record>, LedgerError> {
        let document: serde_yaml::Value =
            serde_yaml::from_str(content).map_err(|source| LedgerError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        let items = match document {
            // An empty document
            serde_yaml::Value::Null => return Ok(vec![]),
            serde_yaml::Value::Sequence(items) => items,
            _ => {
                return Err(LedgerError::NotASequence {
                    path: self.path.clone(),
                })
            }
        };

        let records: Vec<Record> = items
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| {
                model::records_from_value(item)
                    .map_err(|source| {
                        let err = LedgerError::MalformedRecord {
                            path: self.path.clone(),
                            index,
                            source,
                        };
                        warn!(err = %err.display_chain(), "Skipping a malformed record");
                    })
                    .ok()
            })
            .flatten()
            .collect();

        Ok(records)
    }

    /// Overwrites the store with the given records. Failures are logged and
    /// swallowed, because the ledger is a best-effort cache.
    pub fn save(&self, records: &[Record]) {
        if let Err(err) = self.try_save(records) {
            error!(
                err = %err.display_chain(),
                records = records.len(),
                "Failed to save the ledger",
            );
        }
    }

    /// Writes the records into a temporary file next to the store and then
    /// renames it over the store, so that readers never see a partial write.
    fn try_save(&self, records: &[Record]) -> Result<(), LedgerError> {
        let write_err = |source| LedgerError::Write {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };

        fs_err::create_dir_all(dir).map_err(write_err)?;

        let content =
            serde_yaml::to_string(records).map_err(|source| LedgerError::Serialize { source })?;

        let mut file = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;

        file.write_all(content.as_bytes()).map_err(write_err)?;
        file.as_file().sync_all().map_err(write_err)?;

        file.persist(&self.path)
            .map_err(|source| LedgerError::Persist {
                path: self.path.clone(),
                source,
            })?;

        debug!(
            path = %self.path.display(),
            records = records.len(),
            "Saved the ledger",
        );

        Ok(())
    }

    /// Remembers the message that was just published, so that it is deleted
    /// once it expires.
    pub fn record(&self, id: impl Into<RecordId>, now: chrono::DateTime<chrono::Utc>) {
        let mut records = self.load();
        let record = Record::new(id, now);

        info!(message_id = %record.id, published_at = %record.published_at, "Recording the message");

        records.push(record);
        self.save(&records);
    }

    /// Deletes the expired records on the remote side and forgets about them.
    ///
    /// Individual delete failures never fail the sweep, the affected records
    /// stay in the ledger to be retried later. The error is returned only if
    /// the deleter reported that the remote channel is unreachable. In this
    /// case the records that weren't processed yet are persisted as is.
    pub async fn sweep(
        &self,
        now: chrono::DateTime<chrono::Utc>,
        deleter: &dyn Deleter,
        policy: &SweepPolicy,
    ) -> Result<SweepReport> {
        let records = self.load();

        if records.is_empty() {
            info!("The ledger is empty, nothing to sweep");
            return Ok(SweepReport::default());
        }

        let output = sweep::sweep(records, now, deleter, policy).await;

        self.save(&output.retained);

        match output.abort {
            Some(err) => Err(err),
            None => Ok(output.report),
        }
    }
}
