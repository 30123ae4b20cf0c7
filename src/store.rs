use std::collections::HashSet;
use std::fs;
use std::io::{self, Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tempfile::Builder;
use tracing::{debug, info, warn};

use crate::catalog::CatalogClient;
use crate::domain::{Entry, EntryId, sort_by_rating};
use crate::error::MalqError;
use crate::progress::ProgressSink;

pub const CACHE_FILE_NAME: &str = "cache.bin";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    saved_at: DateTime<Utc>,
    entries: Vec<Entry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub eligible: usize,
    pub fetched: usize,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    path: Utf8PathBuf,
    entries: Vec<Entry>,
}

impl CacheStore {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            entries: Vec::new(),
        }
    }

    pub fn default_path() -> Result<Utf8PathBuf, MalqError> {
        ProjectDirs::from("", "", "malq")
            .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.data_dir().join(CACHE_FILE_NAME)).ok())
            .ok_or_else(|| MalqError::Filesystem("unable to resolve data directory".to_string()))
    }

    pub fn load(path: Utf8PathBuf) -> Result<Self, MalqError> {
        let file = match fs::File::open(path.as_std_path()) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(path = %path, "no cache file found, starting empty");
                return Ok(Self::new(path));
            }
            Err(err) => return Err(MalqError::Filesystem(format!("open {path}: {err}"))),
        };

        let mut json = Vec::new();
        GzDecoder::new(file)
            .read_to_end(&mut json)
            .map_err(|err| MalqError::Filesystem(format!("decompress {path}: {err}")))?;
        let envelope: Envelope = serde_json::from_slice(&json)
            .map_err(|err| MalqError::Filesystem(format!("parse {path}: {err}")))?;
        if envelope.version != FORMAT_VERSION {
            return Err(MalqError::Filesystem(format!(
                "unsupported cache version {} in {path}",
                envelope.version
            )));
        }

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(envelope.entries.len());
        for entry in envelope.entries {
            if seen.insert(entry.id) {
                entries.push(entry);
            } else {
                warn!(id = %entry.id, "dropping duplicate cached entry");
            }
        }
        info!(
            count = entries.len(),
            saved_at = %envelope.saved_at,
            "loaded cached entries"
        );
        Ok(Self { path, entries })
    }

    pub fn save(&self) -> Result<(), MalqError> {
        let envelope = Envelope {
            version: FORMAT_VERSION,
            saved_at: Utc::now(),
            entries: self.entries.iter().map(Entry::without_related).collect(),
        };
        let json = serde_json::to_vec(&envelope)
            .map_err(|err| MalqError::Filesystem(err.to_string()))?;
        write_gzip_atomic(&self.path, &json)?;
        info!(count = self.entries.len(), path = %self.path, "saved cache");
        Ok(())
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: EntryId) -> Option<&Entry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.get(id).is_some()
    }

    pub fn add_unique(&mut self, entry: Entry) -> Result<(), MalqError> {
        if let Some(existing) = self.get(entry.id) {
            return Err(MalqError::DuplicateEntry {
                id: existing.id,
                name: existing.name.clone(),
            });
        }
        self.entries.push(entry.without_related());
        Ok(())
    }

    pub fn remove(&mut self, id: EntryId) -> Result<Entry, MalqError> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.id == id)
            .ok_or_else(|| MalqError::NotTracked(id.to_string()))?;
        Ok(self.entries.remove(index))
    }

    /// Re-fetches stale entries in place, then sorts by rating.
    ///
    /// Complete entries are only fetched when `all` is set. A failed fetch
    /// aborts the refresh and leaves the failing entry untouched.
    pub fn refresh<C: CatalogClient + ?Sized>(
        &mut self,
        client: &C,
        all: bool,
        sink: &dyn ProgressSink,
        prefix: &str,
    ) -> Result<RefreshReport, MalqError> {
        let stale: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| all || !entry.is_complete)
            .map(|(index, _)| index)
            .collect();
        let eligible = stale.len();
        info!(eligible, total = self.entries.len(), all, "refreshing entries");

        let mut progress = sink.open(prefix, eligible as i64);
        let mut fetched = 0usize;
        for index in stale {
            let id = self.entries[index].id;
            debug!(%id, "refreshing entry");
            let raw = client.fetch_entry(id, false)?;
            let entry = Entry::from_record(&raw, false)?;
            if entry.id != id {
                return Err(MalqError::MalformedRecord(format!(
                    "requested entry {id}, catalog returned {}",
                    entry.id
                )));
            }
            self.entries[index] = entry;
            fetched += 1;
            progress.advance();
        }
        progress.finish();

        sort_by_rating(&mut self.entries);
        Ok(RefreshReport { eligible, fetched })
    }

    pub fn search(&self, query: &str) -> Vec<&Entry> {
        let needle = query.trim().to_lowercase();
        self.entries
            .iter()
            .filter(|entry| entry.to_string().to_lowercase().contains(&needle))
            .collect()
    }

    pub fn completed(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|entry| entry.is_complete)
    }
}

fn write_gzip_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), MalqError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
        _ => Utf8PathBuf::from("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| MalqError::Filesystem(err.to_string()))?;
    let temp = Builder::new()
        .prefix("malq-cache")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| MalqError::Filesystem(err.to_string()))?;
    let mut encoder = GzEncoder::new(temp, Compression::default());
    encoder
        .write_all(content)
        .map_err(|err| MalqError::Filesystem(err.to_string()))?;
    let temp = encoder
        .finish()
        .map_err(|err| MalqError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| MalqError::Filesystem(err.to_string()))?;
    Ok(())
}
