//! Archive workflow and the components it is built from

pub mod archive;
pub mod cleanup;
pub mod inventory;
pub mod ledger;
pub mod logging;
pub mod plex;
pub mod reconcile;
pub mod transfer;

pub use archive::{
    ArchiveError, ArchiveRunReport, ArchiveService, ArchiveSettings, CandidateOutcome,
    FailedTransfer,
};
pub use cleanup::{CleanupError, OriginalCleanup};
pub use inventory::{InventoryError, MediaCandidate, parse_inventory};
pub use ledger::{ArchiveLedger, ArchivedItem, FileBackup, LedgerError};
pub use logging::{LogFormat, init_tracing};
pub use plex::{InventorySource, PlexClient};
pub use reconcile::reconcile;
pub use transfer::{
    ArchiveDestination, BackupLayout, BackupLocation, FileTransfer, ScpTransfer, TransferError,
};
