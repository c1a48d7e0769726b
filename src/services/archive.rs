//! Archive workflow
//!
//! One run goes: fetch listing → parse → reconcile against the ledger →
//! for each new item: copy files → record → delete originals.
//!
//! Failure policy per step:
//! - a file that fails to copy is left out of the item; an item with no
//!   copied file is dropped without touching the ledger
//! - an original that fails to delete retracts the whole item from the
//!   ledger (the remote copies stay where they are)
//! - a ledger error stops the run: no further candidate is started, the
//!   ones already in flight are finished, then the error is returned
//!
//! Runs never overlap; a second caller gets [ArchiveError::RunInProgress].

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::services::cleanup::OriginalCleanup;
use crate::services::inventory::{InventoryError, MediaCandidate, parse_inventory};
use crate::services::ledger::{ArchiveLedger, FileBackup, LedgerError};
use crate::services::plex::InventorySource;
use crate::services::reconcile::reconcile;
use crate::services::transfer::{FileTransfer, TransferError};

/// Errors that end a run early
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("an archive run is already in progress")]
    RunInProgress,

    #[error("failed to fetch inventory: {0:#}")]
    InventoryFetch(anyhow::Error),

    #[error(transparent)]
    MalformedInventory(#[from] InventoryError),

    #[error("datastore error: {0}")]
    Datastore(#[from] sqlx::Error),

    #[error(transparent)]
    Ledger(LedgerError),
}

impl From<LedgerError> for ArchiveError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Datastore(e) => Self::Datastore(e),
            other => Self::Ledger(other),
        }
    }
}

/// A file that could not be copied
#[derive(Debug)]
pub struct FailedTransfer {
    pub path: String,
    pub error: TransferError,
}

/// Terminal state of one candidate
#[derive(Debug)]
pub enum CandidateOutcome {
    /// Already in the ledger; nothing was done
    Duplicate,
    /// No file could be copied; nothing was recorded
    Discarded { failures: Vec<FailedTransfer> },
    /// Recorded and every original deleted
    Cleaned {
        files: Vec<FileBackup>,
        failures: Vec<FailedTransfer>,
    },
    /// Recorded, then retracted because an original could not be deleted
    RolledBack {
        failed_path: String,
        reason: String,
        deleted: Vec<String>,
    },
}

impl CandidateOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::Discarded { .. } => "discarded",
            Self::Cleaned { .. } => "cleaned",
            Self::RolledBack { .. } => "rolled_back",
        }
    }
}

/// What happened during one run
#[derive(Debug, Default)]
pub struct ArchiveRunReport {
    /// `(item id, outcome)`; order is not meaningful
    pub outcomes: Vec<(String, CandidateOutcome)>,
    /// Candidates dropped before reconciliation because they had no id
    pub skipped_without_id: usize,
}

impl ArchiveRunReport {
    pub fn outcome(&self, item_id: &str) -> Option<&CandidateOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == item_id)
            .map(|(_, outcome)| outcome)
    }

    fn count(&self, label: &str) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.label() == label).count()
    }

    pub fn cleaned(&self) -> usize {
        self.count("cleaned")
    }

    pub fn duplicates(&self) -> usize {
        self.count("duplicate")
    }

    pub fn discarded(&self) -> usize {
        self.count("discarded")
    }

    pub fn rolled_back(&self) -> usize {
        self.count("rolled_back")
    }
}

/// Tuning for a run
#[derive(Debug, Clone)]
pub struct ArchiveSettings {
    /// Candidates processed in parallel; files of one candidate are
    /// always copied one after another
    pub max_concurrent: usize,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self { max_concurrent: 1 }
    }
}

pub struct ArchiveService {
    inventory: Arc<dyn InventorySource>,
    transfer: Arc<dyn FileTransfer>,
    ledger: ArchiveLedger,
    cleanup: OriginalCleanup,
    settings: ArchiveSettings,
    run_lock: Mutex<()>,
}

impl ArchiveService {
    pub fn new(
        inventory: Arc<dyn InventorySource>,
        transfer: Arc<dyn FileTransfer>,
        db: Database,
        cleanup: OriginalCleanup,
        settings: ArchiveSettings,
    ) -> Self {
        Self {
            inventory,
            transfer,
            ledger: ArchiveLedger::new(db),
            cleanup,
            settings,
            run_lock: Mutex::new(()),
        }
    }

    /// Run the workflow once
    pub async fn run(&self) -> Result<ArchiveRunReport, ArchiveError> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!("Archive run requested while another is in progress, skipping");
            return Err(ArchiveError::RunInProgress);
        };

        let span = info_span!("archive_run", run_id = %Uuid::new_v4());
        self.run_locked().instrument(span).await
    }

    async fn run_locked(&self) -> Result<ArchiveRunReport, ArchiveError> {
        let mut report = ArchiveRunReport::default();

        let raw = match self.inventory.fetch_stale_items().await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                info!("No candidates to archive found, skipping archive process");
                return Ok(report);
            }
            Err(e) => {
                error!(error = %format!("{:#}", e), "Failed to fetch inventory");
                return Err(ArchiveError::InventoryFetch(e));
            }
        };

        let parsed = parse_inventory(&raw).inspect_err(|e| {
            error!(error = %e, "Inventory response is not well-formed");
        })?;

        let mut candidates = Vec::with_capacity(parsed.len());
        for candidate in parsed {
            if candidate.id.trim().is_empty() {
                warn!(
                    title = candidate.display_title(),
                    files = ?candidate.files,
                    "Candidate has no guid, skipping it"
                );
                report.skipped_without_id += 1;
            } else {
                candidates.push(candidate);
            }
        }

        let ids: HashSet<String> = candidates.iter().map(|c| c.id.clone()).collect();
        let existing = self.ledger.existing_ids(&ids).await.inspect_err(|e| {
            error!(error = %e, "Failed to look up archived items");
        })?;
        for id in ids.intersection(&existing) {
            report.outcomes.push((id.clone(), CandidateOutcome::Duplicate));
        }

        let new_candidates = reconcile(candidates, &existing);
        info!(
            candidates = ids.len(),
            already_archived = existing.len(),
            new = new_candidates.len(),
            "Reconciled inventory against ledger"
        );

        let aborted = AtomicBool::new(false);
        let mut pending = futures::stream::iter(new_candidates)
            .map(|candidate| {
                let aborted = &aborted;
                async move {
                    if aborted.load(Ordering::SeqCst) {
                        return (candidate.id, None);
                    }
                    let outcome = self.process_candidate(&candidate).await;
                    (candidate.id, Some(outcome))
                }
            })
            .buffer_unordered(self.settings.max_concurrent.max(1));

        // Candidates already in flight run to the end
        let mut failure: Option<LedgerError> = None;
        while let Some((id, outcome)) = pending.next().await {
            match outcome {
                Some(Ok(outcome)) => report.outcomes.push((id, outcome)),
                Some(Err(e)) => {
                    error!(item_id = %id, error = %e, "Ledger write failed, aborting run");
                    aborted.store(true, Ordering::SeqCst);
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
                None => debug!(item_id = %id, "Run aborted, candidate not started"),
            }
        }

        if let Some(e) = failure {
            warn!(
                finished = report.outcomes.len(),
                "Archive run stopped after ledger failure"
            );
            return Err(e.into());
        }

        info!(
            cleaned = report.cleaned(),
            discarded = report.discarded(),
            rolled_back = report.rolled_back(),
            duplicates = report.duplicates(),
            skipped_without_id = report.skipped_without_id,
            "Archive run finished"
        );
        Ok(report)
    }

    /// Copy, record and clean up a single new candidate
    async fn process_candidate(
        &self,
        candidate: &MediaCandidate,
    ) -> Result<CandidateOutcome, LedgerError> {
        let mut backups = Vec::new();
        let mut failures = Vec::new();

        for path in &candidate.files {
            match self.transfer.transfer(&candidate.id, Path::new(path)).await {
                Ok(location) => backups.push(FileBackup {
                    original_path: path.clone(),
                    backup_path: location.spec,
                }),
                Err(error) => {
                    warn!(
                        item_id = %candidate.id,
                        path = %path,
                        error = %error,
                        "Failed to copy file to archive"
                    );
                    failures.push(FailedTransfer {
                        path: path.clone(),
                        error,
                    });
                }
            }
        }

        if backups.is_empty() {
            warn!(
                item_id = %candidate.id,
                title = candidate.display_title(),
                "No file of the item could be copied, discarding it"
            );
            return Ok(CandidateOutcome::Discarded { failures });
        }

        let item = self.ledger.record_archived(candidate, &backups).await?;
        info!(
            item_id = %item.id(),
            title = candidate.display_title(),
            files = item.files.len(),
            "Recorded archived item"
        );

        let mut deleted = Vec::new();
        for file in &item.files {
            if let Err(e) = self.cleanup.remove(Path::new(&file.original_path)).await {
                error!(
                    item_id = %item.id(),
                    path = %file.original_path,
                    backup = %file.backup_path,
                    already_deleted = ?deleted,
                    error = %e,
                    "Failed to delete original, retracting item from ledger"
                );
                self.ledger.retract(item.id()).await?;
                return Ok(CandidateOutcome::RolledBack {
                    failed_path: file.original_path.clone(),
                    reason: e.to_string(),
                    deleted,
                });
            }
            deleted.push(file.original_path.clone());
        }

        info!(item_id = %item.id(), title = candidate.display_title(), "Item archived");
        Ok(CandidateOutcome::Cleaned { files: backups, failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleaned() -> CandidateOutcome {
        CandidateOutcome::Cleaned {
            files: vec![FileBackup {
                original_path: "/m/a.mkv".to_string(),
                backup_path: "root@host:/archive/a.mkv".to_string(),
            }],
            failures: Vec::new(),
        }
    }

    #[test]
    fn test_report_counts() {
        let report = ArchiveRunReport {
            outcomes: vec![
                ("1".to_string(), cleaned()),
                ("2".to_string(), CandidateOutcome::Duplicate),
                ("3".to_string(), CandidateOutcome::Discarded { failures: Vec::new() }),
                ("4".to_string(), cleaned()),
                (
                    "5".to_string(),
                    CandidateOutcome::RolledBack {
                        failed_path: "/m/5.mkv".to_string(),
                        reason: "denied".to_string(),
                        deleted: Vec::new(),
                    },
                ),
            ],
            skipped_without_id: 1,
        };

        assert_eq!(report.cleaned(), 2);
        assert_eq!(report.duplicates(), 1);
        assert_eq!(report.discarded(), 1);
        assert_eq!(report.rolled_back(), 1);
        assert_eq!(report.outcome("5").map(|o| o.label()), Some("rolled_back"));
        assert!(report.outcome("6").is_none());
    }

    #[test]
    fn test_error_messages() {
        let err = ArchiveError::InventoryFetch(
            anyhow::anyhow!("connection refused").context("Failed to reach Plex"),
        );
        assert_eq!(
            err.to_string(),
            "failed to fetch inventory: Failed to reach Plex: connection refused"
        );
        assert_eq!(
            ArchiveError::RunInProgress.to_string(),
            "an archive run is already in progress"
        );
    }
}
