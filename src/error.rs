use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::EntryId;

#[derive(Debug, Error, Diagnostic)]
pub enum MalqError {
    #[error("entry {id} is already in the list ({name})")]
    DuplicateEntry { id: EntryId, name: String },

    #[error("entry not tracked: {0}")]
    NotTracked(String),

    #[error("invalid input: {0}")]
    MalformedInput(String),

    #[error("malformed catalog record: {0}")]
    MalformedRecord(String),

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("search service request failed: {0}")]
    SearchHttp(String),

    #[error("search service returned status {status}: {message}")]
    SearchStatus { status: u16, message: String },

    #[error("search service is not configured (check QBITTORRENTAPI_HOST and credentials)")]
    SearchUnavailable,

    #[error("search job {0} failed")]
    SearchJobFailed(i64),

    #[error("search job {0} already reached a terminal state")]
    SearchJobClosed(i64),

    #[error("failed to read token file at {0}")]
    TokenRead(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("progress renderer error: {0}")]
    Progress(String),

    #[error("terminal I/O failed: {0}")]
    Terminal(String),
}

impl MalqError {
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MalqError::CatalogHttp(_)
                | MalqError::CatalogStatus { .. }
                | MalqError::SearchHttp(_)
                | MalqError::SearchStatus { .. }
                | MalqError::SearchUnavailable
        )
    }
}
