#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use camino::Utf8PathBuf;
use serde_json::{Value, json};

use malq::catalog::CatalogClient;
use malq::domain::{Entry, EntryId, NO_RATING};
use malq::error::MalqError;
use malq::progress::{ProgressChannel, ProgressSink, Snapshot};
use malq::search::{JobHandle, JobStatus, SearchService};

pub fn record(id: u64, status: &str, mean: Option<f64>) -> Value {
    let mut value = json!({
        "id": id,
        "title": format!("Show {id}"),
        "alternative_titles": { "en": "" },
        "status": status,
        "num_episodes": 12
    });
    if let Some(mean) = mean {
        value["mean"] = json!(mean);
    }
    value
}

pub fn entry(id: u64, is_complete: bool, rating: f64) -> Entry {
    Entry {
        id: EntryId::new(id),
        name: format!("Show {id}"),
        is_complete,
        length: Some(12),
        rating,
        start_period: None,
        tags: Vec::new(),
        related_entries: Vec::new(),
    }
}

pub fn unrated(id: u64) -> Entry {
    entry(id, false, NO_RATING)
}

pub fn cache_path(dir: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join("cache.bin")).unwrap()
}

#[derive(Default)]
pub struct MockCatalog {
    records: Mutex<HashMap<u64, Value>>,
    search: Vec<Value>,
    failing: Vec<u64>,
    pub calls: Mutex<Vec<(u64, bool)>>,
}

impl MockCatalog {
    pub fn with_records(records: impl IntoIterator<Item = Value>) -> Self {
        let map = records
            .into_iter()
            .map(|record| (record["id"].as_u64().unwrap(), record))
            .collect();
        Self {
            records: Mutex::new(map),
            ..Self::default()
        }
    }

    pub fn with_search(mut self, results: Vec<Value>) -> Self {
        self.search = results;
        self
    }

    pub fn failing_on(mut self, id: u64) -> Self {
        self.failing.push(id);
        self
    }

    pub fn set_record(&self, record: Value) {
        let id = record["id"].as_u64().unwrap();
        self.records.lock().unwrap().insert(id, record);
    }

    pub fn fetched_ids(&self) -> Vec<u64> {
        self.calls.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }
}

impl CatalogClient for MockCatalog {
    fn fetch_entry(&self, id: EntryId, with_related: bool) -> Result<Value, MalqError> {
        self.calls.lock().unwrap().push((id.get(), with_related));
        if self.failing.contains(&id.get()) {
            return Err(MalqError::CatalogHttp("connection reset".to_string()));
        }
        self.records
            .lock()
            .unwrap()
            .get(&id.get())
            .cloned()
            .ok_or(MalqError::CatalogStatus {
                status: 404,
                message: "not found".to_string(),
            })
    }

    fn search_entries(&self, _query: &str, limit: usize) -> Result<Vec<Value>, MalqError> {
        Ok(self.search.iter().take(limit).cloned().collect())
    }
}

pub struct MockSearch {
    statuses: Mutex<VecDeque<JobStatus>>,
    results: Vec<Value>,
    pub started: Mutex<Vec<(String, String, String)>>,
    pub status_calls: Mutex<usize>,
    pub result_calls: Mutex<usize>,
    pub submitted: Mutex<Vec<String>>,
}

impl MockSearch {
    pub fn new(statuses: Vec<JobStatus>, results: Vec<Value>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            results,
            started: Mutex::new(Vec::new()),
            status_calls: Mutex::new(0),
            result_calls: Mutex::new(0),
            submitted: Mutex::new(Vec::new()),
        }
    }
}

impl SearchService for MockSearch {
    fn start_job(&self, query: &str, plugin: &str, category: &str) -> Result<JobHandle, MalqError> {
        self.started
            .lock()
            .unwrap()
            .push((query.to_string(), plugin.to_string(), category.to_string()));
        Ok(JobHandle(7))
    }

    fn job_status(&self, _handle: JobHandle) -> Result<JobStatus, MalqError> {
        *self.status_calls.lock().unwrap() += 1;
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(JobStatus::Done))
    }

    fn job_results(&self, _handle: JobHandle) -> Result<Vec<Value>, MalqError> {
        *self.result_calls.lock().unwrap() += 1;
        Ok(self.results.clone())
    }

    fn submit_transfer(&self, url: &str) -> Result<(), MalqError> {
        self.submitted.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

pub fn torrent(name: &str, seeders: i64) -> Value {
    json!({
        "descrLink": format!("https://nyaa.si/view/{name}"),
        "fileUrl": format!("https://nyaa.si/download/{name}.torrent"),
        "nbSeeders": seeders,
        "fileSize": 1_073_741_824i64,
        "fileName": name
    })
}

#[derive(Clone, Default)]
pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Captures every snapshot a channel sends, across all sessions it opens.
#[derive(Default)]
pub struct RecordingSink {
    buf: SharedBuf,
    pub opened: Mutex<Vec<(String, i64)>>,
}

impl RecordingSink {
    pub fn snapshots(&self) -> Vec<Snapshot> {
        let bytes = self.buf.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn open(&self, prefix: &str, total: i64) -> ProgressChannel {
        self.opened.lock().unwrap().push((prefix.to_string(), total));
        ProgressChannel::with_writer(prefix, total, Box::new(self.buf.clone()))
    }
}
