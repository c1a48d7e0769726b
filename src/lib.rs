//! Plex Archiver
//!
//! Moves media that has not been watched for a long time off primary
//! storage: copies it to an archive host, records the copy in a SQLite
//! ledger and deletes the original.

pub mod cli;
pub mod config;
pub mod db;
pub mod jobs;
pub mod services;
