//! Application configuration management

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::services::logging::LogFormat;
use crate::services::transfer::{ArchiveDestination, BackupLayout};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite ledger location (path or `sqlite:` URL)
    pub database_url: String,

    /// Maximum connections in the ledger pool
    pub database_max_connections: u32,

    /// Six-field cron expression for the archive job
    pub schedule: String,

    /// Log output format
    pub log_format: LogFormat,

    /// Plex server settings
    pub plex: PlexConfig,

    /// Archive host and transfer settings
    pub archive: ArchiveConfig,
}

/// Connection settings for the Plex media server
#[derive(Debug, Clone)]
pub struct PlexConfig {
    pub hostname: String,
    pub port: u16,
    pub token: String,
    /// Library section that holds the movies
    pub section_id: u32,
    /// Items last viewed more than this many days ago are candidates
    pub unwatched_days: i64,
    pub request_timeout: Duration,
}

/// Where and how original files are archived
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub destination: ArchiveDestination,

    /// Private key handed to the copy program
    pub ssh_key_path: PathBuf,

    /// Copy program, `scp` unless overridden
    pub scp_program: String,

    /// Budget for copying a single file
    pub copy_timeout: Duration,

    /// Budget for deleting a single original
    pub delete_timeout: Duration,

    /// Candidates processed in parallel
    pub max_concurrent: usize,

    pub backup_layout: BackupLayout,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_PATH")
            .or_else(|_| env::var("DATABASE_URL"))
            .unwrap_or_else(|_| "sqlite:./data/plex-archiver.db".to_string());

        let plex = PlexConfig {
            hostname: required("PLEX_HOSTNAME")?,
            port: parsed_or("PLEX_PORT", 32400)?,
            token: required("PLEX_TOKEN")?,
            section_id: parsed_or("PLEX_SECTION_ID", 2)?,
            unwatched_days: parsed_or("PLEX_UNWATCHED_DAYS", 365)?,
            request_timeout: Duration::from_secs(parsed_or("PLEX_REQUEST_TIMEOUT_SECS", 60)?),
        };

        let destination = ArchiveDestination {
            user: required("ARCHIVE_HOST_USER")?,
            host: required("ARCHIVE_HOST_NAME")?,
            base_path: required("ARCHIVE_PATH")?,
        };

        let backup_layout = match env::var("ARCHIVE_BACKUP_LAYOUT") {
            Ok(value) => BackupLayout::from_name(&value)
                .with_context(|| format!("Invalid ARCHIVE_BACKUP_LAYOUT '{}'", value))?,
            Err(_) => BackupLayout::PerFile,
        };

        let max_concurrent: usize = parsed_or("ARCHIVE_MAX_CONCURRENT", 1)?;
        if max_concurrent == 0 {
            bail!("ARCHIVE_MAX_CONCURRENT must be at least 1");
        }

        let archive = ArchiveConfig {
            destination,
            ssh_key_path: PathBuf::from(required("SSH_KEY_PATH")?),
            scp_program: env::var("ARCHIVE_SCP_PROGRAM").unwrap_or_else(|_| "scp".to_string()),
            copy_timeout: Duration::from_secs(parsed_or("ARCHIVE_COPY_TIMEOUT_SECS", 15 * 60)?),
            delete_timeout: Duration::from_secs(parsed_or("ARCHIVE_DELETE_TIMEOUT_SECS", 60)?),
            max_concurrent,
            backup_layout,
        };

        let log_format = match env::var("LOG_FORMAT") {
            Ok(value) => LogFormat::from_name(&value)
                .with_context(|| format!("Invalid LOG_FORMAT '{}'", value))?,
            Err(_) => LogFormat::Json,
        };

        Ok(Self {
            database_url,

            database_max_connections: parsed_or("DATABASE_MAX_CONNECTIONS", 5)?,

            schedule: env::var("ARCHIVE_SCHEDULE").unwrap_or_else(|_| "0 0 3 * * *".to_string()),

            log_format,

            plex,

            archive,
        })
    }
}

fn required(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("{} is required", key))
}

fn parsed_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", key)),
        Err(_) => Ok(default),
    }
}
