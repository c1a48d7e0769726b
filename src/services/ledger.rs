//! Archive ledger writer
//!
//! Thin layer over the repositories that speaks in candidates and backups
//! instead of rows. An [ArchivedItem] owns its file rows; removing the item
//! removes them too.

use std::collections::HashSet;

use thiserror::Error;

use crate::db::{ArchivedFileRecord, ArchivedItemRecord, CreateArchivedFile, Database};
use crate::services::inventory::MediaCandidate;

/// Errors from writing the ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("refusing to record item '{0}' without any backed-up file")]
    NoFiles(String),

    #[error(transparent)]
    Datastore(#[from] sqlx::Error),
}

/// An original and the place its copy was written to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBackup {
    pub original_path: String,
    pub backup_path: String,
}

impl From<&FileBackup> for CreateArchivedFile {
    fn from(backup: &FileBackup) -> Self {
        Self {
            original_path: backup.original_path.clone(),
            backup_path: backup.backup_path.clone(),
        }
    }
}

/// A persisted item together with the files it owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedItem {
    pub record: ArchivedItemRecord,
    pub files: Vec<ArchivedFileRecord>,
}

impl ArchivedItem {
    pub fn id(&self) -> &str {
        &self.record.id
    }
}

#[derive(Clone)]
pub struct ArchiveLedger {
    db: Database,
}

impl ArchiveLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Which of `ids` are already archived
    pub async fn existing_ids(&self, ids: &HashSet<String>) -> Result<HashSet<String>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let records = self.db.archived_items().find_by_ids(ids).await?;
        Ok(records.into_iter().map(|r| r.id).collect())
    }

    /// Persist one item row per candidate, without files
    pub async fn record_new_items(
        &self,
        candidates: &[MediaCandidate],
    ) -> Result<Vec<ArchivedItemRecord>, sqlx::Error> {
        let records: Vec<ArchivedItemRecord> =
            candidates.iter().map(ArchivedItemRecord::from).collect();
        self.db.archived_items().save_all(&records).await?;
        Ok(records)
    }

    /// Persist file rows for an item that already exists
    pub async fn record_files(
        &self,
        item: &ArchivedItemRecord,
        backups: &[FileBackup],
    ) -> Result<Vec<ArchivedFileRecord>, sqlx::Error> {
        let files: Vec<CreateArchivedFile> = backups.iter().map(CreateArchivedFile::from).collect();
        self.db.archived_files().save_all(&item.id, &files).await
    }

    /// Persist a candidate and its backed-up files in one transaction.
    ///
    /// An item is never stored bare: without backups nothing is written.
    pub async fn record_archived(
        &self,
        candidate: &MediaCandidate,
        backups: &[FileBackup],
    ) -> Result<ArchivedItem, LedgerError> {
        if backups.is_empty() {
            return Err(LedgerError::NoFiles(candidate.id.clone()));
        }
        let record = ArchivedItemRecord::from(candidate);
        let files: Vec<CreateArchivedFile> = backups.iter().map(CreateArchivedFile::from).collect();
        let files = self.db.record_archive(&record, &files).await?;
        Ok(ArchivedItem { record, files })
    }

    /// Remove an item and, by cascade, its files
    pub async fn retract(&self, item_id: &str) -> Result<bool, sqlx::Error> {
        self.db.archived_items().delete_by_id(item_id).await
    }
}
