//! Copying originals to the archive host
//!
//! Files are pushed with `scp` using a dedicated private key. Every copy is
//! bounded by a time budget; when it runs out the copy process is killed.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Errors from a single file transfer
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer of '{path}' exceeded {budget:?}")]
    Timeout { path: PathBuf, budget: Duration },

    #[error("source file '{0}' does not exist")]
    SourceMissing(PathBuf),

    #[error("transfer of '{path}' failed: {reason}")]
    Io { path: PathBuf, reason: String },
}

/// Login, host and base directory on the archive host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveDestination {
    pub user: String,
    pub host: String,
    pub base_path: String,
}

impl ArchiveDestination {
    /// `user@host:remote_path`
    pub fn spec(&self, remote_path: &str) -> String {
        format!("{}@{}:{}", self.user, self.host, remote_path)
    }
}

/// How remote paths are composed for backups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupLayout {
    /// `{base}/{item hash}-{file name}`, one remote path per file
    PerFile,
    /// Every file is copied into `{base}` and recorded as `{base}`
    SharedDirectory,
}

impl BackupLayout {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "per-file" | "per_file" | "perfile" => Some(Self::PerFile),
            "shared-directory" | "shared_directory" | "shared" => Some(Self::SharedDirectory),
            _ => None,
        }
    }
}

/// Where a file ended up on the archive host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupLocation {
    /// Path on the archive host
    pub remote_path: String,
    /// Fully qualified `user@host:path`, as stored in the ledger
    pub spec: String,
}

/// Moves a single original to the archive
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Copy `source` (belonging to item `item_id`) to the archive. The
    /// source is left in place.
    async fn transfer(&self, item_id: &str, source: &Path) -> Result<BackupLocation, TransferError>;
}

/// Run `fut`, giving up after `budget`.
///
/// Returns `None` on timeout; the future is dropped at that point.
pub async fn with_timeout<F, T>(budget: Duration, fut: F) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(budget, fut).await.ok()
}

/// Remote path for `source` under `destination` according to `layout`.
pub fn backup_location(
    destination: &ArchiveDestination,
    layout: BackupLayout,
    item_id: &str,
    source: &Path,
) -> BackupLocation {
    let remote_path = match layout {
        BackupLayout::SharedDirectory => destination.base_path.clone(),
        BackupLayout::PerFile => {
            let file_name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string());
            let file_name: String = sanitize_filename::sanitize(file_name)
                .chars()
                .map(|c| if c.is_whitespace() { '_' } else { c })
                .collect();

            format!(
                "{}/{}-{}",
                destination.base_path.trim_end_matches('/'),
                file_hash(item_id, source),
                file_name
            )
        }
    };

    BackupLocation {
        spec: destination.spec(&remote_path),
        remote_path,
    }
}

/// First 12 hex chars of the SHA-256 of an item id and the full source path.
///
/// Parts of one item often share a file name (`v1/Heat.mkv`, `v2/Heat.mkv`),
/// so the name alone cannot tell them apart.
fn file_hash(item_id: &str, source: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(item_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(source.as_os_str().as_encoded_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..12].to_string()
}

/// Transfer over `scp`
pub struct ScpTransfer {
    program: String,
    ssh_key_path: PathBuf,
    destination: ArchiveDestination,
    layout: BackupLayout,
    budget: Duration,
}

impl ScpTransfer {
    pub fn new(
        ssh_key_path: PathBuf,
        destination: ArchiveDestination,
        layout: BackupLayout,
        budget: Duration,
    ) -> Self {
        Self {
            program: "scp".to_string(),
            ssh_key_path,
            destination,
            layout,
            budget,
        }
    }

    /// Use a different copy program (same argument convention as scp)
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl FileTransfer for ScpTransfer {
    async fn transfer(&self, item_id: &str, source: &Path) -> Result<BackupLocation, TransferError> {
        match tokio::fs::try_exists(source).await {
            Ok(true) => {}
            Ok(false) => return Err(TransferError::SourceMissing(source.to_path_buf())),
            Err(e) => {
                return Err(TransferError::Io {
                    path: source.to_path_buf(),
                    reason: format!("cannot inspect source: {}", e),
                });
            }
        }

        let location = backup_location(&self.destination, self.layout, item_id, source);
        debug!(
            path = %source.display(),
            backup = %location.spec,
            "Starting copy to archive"
        );

        let child = Command::new(&self.program)
            .arg("-i")
            .arg(&self.ssh_key_path)
            .args(["-o", "BatchMode=yes"])
            .arg(source)
            .arg(&location.spec)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransferError::Io {
                path: source.to_path_buf(),
                reason: format!("failed to start {}: {}", self.program, e),
            })?;

        // Dropping the child on timeout kills it
        let output = with_timeout(self.budget, child.wait_with_output())
            .await
            .ok_or_else(|| TransferError::Timeout {
                path: source.to_path_buf(),
                budget: self.budget,
            })?
            .map_err(|e| TransferError::Io {
                path: source.to_path_buf(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(TransferError::Io {
                path: source.to_path_buf(),
                reason: format!(
                    "{} exited with code {}: {}",
                    self.program,
                    exit_code,
                    if stderr.trim().is_empty() {
                        "no error output"
                    } else {
                        stderr.trim()
                    }
                ),
            });
        }

        info!(
            path = %source.display(),
            backup = %location.spec,
            "Copied file to archive"
        );
        Ok(location)
    }
}
