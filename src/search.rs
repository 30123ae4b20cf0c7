use std::fmt;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, REFERER, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::MalqError;

pub const DEFAULT_PLUGIN: &str = "nyaasi";
pub const DEFAULT_CATEGORY: &str = "all";
pub const DEFAULT_MAX_RESULTS: usize = 10;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchScope {
    pub plugin: String,
    pub category: String,
}

impl Default for SearchScope {
    fn default() -> Self {
        Self {
            plugin: DEFAULT_PLUGIN.to_string(),
            category: DEFAULT_CATEGORY.to_string(),
        }
    }
}

pub trait SearchService: Send + Sync {
    fn start_job(&self, query: &str, plugin: &str, category: &str) -> Result<JobHandle, MalqError>;
    fn job_status(&self, handle: JobHandle) -> Result<JobStatus, MalqError>;
    fn job_results(&self, handle: JobHandle) -> Result<Vec<Value>, MalqError>;
    fn submit_transfer(&self, url: &str) -> Result<(), MalqError>;

    fn end_session(&self) -> Result<(), MalqError> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RawSearchResult {
    #[serde(rename = "descrLink", default)]
    descr_link: String,
    #[serde(rename = "fileUrl")]
    file_url: String,
    #[serde(rename = "nbSeeders", default)]
    nb_seeders: i64,
    #[serde(rename = "fileSize", default)]
    file_size: i64,
    #[serde(rename = "fileName")]
    file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResultEntry {
    pub description_url: String,
    pub transfer_url: String,
    pub seeder_count: u64,
    pub size_bytes: u64,
    pub display_name: String,
}

impl SearchResultEntry {
    pub fn from_raw(raw: &Value) -> Result<Self, MalqError> {
        let parsed = RawSearchResult::deserialize(raw)
            .map_err(|err| MalqError::MalformedRecord(format!("search result: {err}")))?;
        // The service reports -1 for unknown counts.
        Ok(Self {
            description_url: parsed.descr_link,
            transfer_url: parsed.file_url,
            seeder_count: u64::try_from(parsed.nb_seeders).unwrap_or(0),
            size_bytes: u64::try_from(parsed.file_size).unwrap_or(0),
            display_name: parsed.file_name,
        })
    }
}

impl fmt::Display for SearchResultEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{}\" | {} | {} seeders",
            self.display_name,
            human_size(self.size_bytes),
            self.seeder_count
        )
    }
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value > 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// Seeders descending, stable for ties, at most `limit` entries.
pub fn rank_results(mut results: Vec<SearchResultEntry>, limit: usize) -> Vec<SearchResultEntry> {
    results.sort_by(|a, b| b.seeder_count.cmp(&a.seeder_count));
    results.truncate(limit);
    results
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Started,
    Running,
    Done,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Done | JobPhase::Failed)
    }
}

#[derive(Debug)]
pub struct SearchJob {
    handle: JobHandle,
    query: String,
    phase: JobPhase,
    polls: usize,
}

impl SearchJob {
    pub fn handle(&self) -> JobHandle {
        self.handle
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    pub fn polls(&self) -> usize {
        self.polls
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Running,
    Done(Vec<SearchResultEntry>),
}

pub struct JobPoller<'a, S: SearchService + ?Sized> {
    service: &'a S,
    interval: Duration,
    max_results: usize,
}

impl<'a, S: SearchService + ?Sized> JobPoller<'a, S> {
    pub fn new(service: &'a S) -> Self {
        Self {
            service,
            interval: DEFAULT_POLL_INTERVAL,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn start(&self, query: &str, scope: &SearchScope) -> Result<SearchJob, MalqError> {
        let handle = self
            .service
            .start_job(query, &scope.plugin, &scope.category)?;
        info!(job = handle.0, query, plugin = %scope.plugin, "search job started");
        Ok(SearchJob {
            handle,
            query: query.to_string(),
            phase: JobPhase::Started,
            polls: 0,
        })
    }

    /// One status query. Results are fetched, ranked and truncated only once
    /// the job reports done.
    pub fn poll(&self, job: &mut SearchJob) -> Result<PollOutcome, MalqError> {
        if job.phase.is_terminal() {
            return Err(MalqError::SearchJobClosed(job.handle.0));
        }
        job.polls += 1;
        match self.service.job_status(job.handle)? {
            JobStatus::Running => {
                job.phase = JobPhase::Running;
                Ok(PollOutcome::Running)
            }
            JobStatus::Failed => {
                job.phase = JobPhase::Failed;
                warn!(job = job.handle.0, "search job failed");
                Err(MalqError::SearchJobFailed(job.handle.0))
            }
            JobStatus::Done => {
                let raw = self.service.job_results(job.handle)?;
                let mut results = Vec::with_capacity(raw.len());
                for item in &raw {
                    match SearchResultEntry::from_raw(item) {
                        Ok(result) => results.push(result),
                        Err(err) => debug!(error = %err, "skipping search result"),
                    }
                }
                job.phase = JobPhase::Done;
                info!(job = job.handle.0, results = results.len(), polls = job.polls, "search job done");
                Ok(PollOutcome::Done(rank_results(results, self.max_results)))
            }
        }
    }

    pub fn wait(&self, job: &mut SearchJob) -> Result<Vec<SearchResultEntry>, MalqError> {
        loop {
            match self.poll(job)? {
                PollOutcome::Done(results) => return Ok(results),
                PollOutcome::Running => thread::sleep(self.interval),
            }
        }
    }
}

pub struct QbittorrentClient {
    client: Client,
    base_url: String,
}

impl QbittorrentClient {
    pub fn new(host: &str, timeout: Duration) -> Result<Self, MalqError> {
        let base_url = normalize_host(host);
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("malq/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| MalqError::SearchHttp(err.to_string()))?,
        );
        // The WebUI rejects requests whose Referer does not match its origin.
        headers.insert(
            REFERER,
            HeaderValue::from_str(&base_url).map_err(|err| MalqError::SearchHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(|err| MalqError::SearchHttp(err.to_string()))?;
        Ok(Self { client, base_url })
    }

    pub fn login(&self, username: &str, password: &str) -> Result<(), MalqError> {
        let response = self
            .client
            .post(self.url("auth/login"))
            .form(&[("username", username), ("password", password)])
            .send()
            .map_err(|err| MalqError::SearchHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let body = response
            .text()
            .map_err(|err| MalqError::SearchHttp(err.to_string()))?;
        if body.trim() != "Ok." {
            return Err(MalqError::SearchStatus {
                status: 403,
                message: format!("login rejected: {}", body.trim()),
            });
        }
        info!(host = %self.base_url, "logged in to search service");
        Ok(())
    }

    pub fn logout(&self) -> Result<(), MalqError> {
        let response = self
            .client
            .post(self.url("auth/logout"))
            .send()
            .map_err(|err| MalqError::SearchHttp(err.to_string()))?;
        Self::handle_status(response)?;
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v2/{path}", self.base_url)
    }

    fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, MalqError> {
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .map_err(|err| MalqError::SearchHttp(err.to_string()))?;
        Self::handle_status(response)?
            .json::<Value>()
            .map_err(|err| MalqError::SearchHttp(err.to_string()))
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, MalqError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "search service request failed".to_string());
        Err(MalqError::SearchStatus { status, message })
    }
}

impl SearchService for QbittorrentClient {
    fn start_job(&self, query: &str, plugin: &str, category: &str) -> Result<JobHandle, MalqError> {
        let response = self
            .client
            .post(self.url("search/start"))
            .form(&[("pattern", query), ("plugins", plugin), ("category", category)])
            .send()
            .map_err(|err| MalqError::SearchHttp(err.to_string()))?;
        let body: Value = Self::handle_status(response)?
            .json()
            .map_err(|err| MalqError::SearchHttp(err.to_string()))?;
        body.get("id")
            .and_then(Value::as_i64)
            .map(JobHandle)
            .ok_or_else(|| MalqError::MalformedRecord("search/start without id".to_string()))
    }

    fn job_status(&self, handle: JobHandle) -> Result<JobStatus, MalqError> {
        let body = self.get_json("search/status", &[("id", handle.0.to_string())])?;
        Ok(parse_job_status(&body))
    }

    fn job_results(&self, handle: JobHandle) -> Result<Vec<Value>, MalqError> {
        let body = self.get_json("search/results", &[("id", handle.0.to_string())])?;
        match body.get("results") {
            Some(Value::Array(items)) => Ok(items.clone()),
            _ => Ok(Vec::new()),
        }
    }

    fn submit_transfer(&self, url: &str) -> Result<(), MalqError> {
        let response = self
            .client
            .post(self.url("torrents/add"))
            .form(&[("urls", url)])
            .send()
            .map_err(|err| MalqError::SearchHttp(err.to_string()))?;
        Self::handle_status(response)?;
        info!(url, "transfer submitted");
        Ok(())
    }

    fn end_session(&self) -> Result<(), MalqError> {
        self.logout()
    }
}

/// `search/status` returns a list with one object per job; an unknown job
/// yields an empty list.
pub fn parse_job_status(body: &Value) -> JobStatus {
    let status = body
        .as_array()
        .and_then(|jobs| jobs.first())
        .and_then(|job| job.get("status"))
        .and_then(Value::as_str);
    match status {
        Some("Running") => JobStatus::Running,
        Some("Stopped") => JobStatus::Done,
        _ => JobStatus::Failed,
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_status_variants() {
        assert_eq!(
            parse_job_status(&json!([{ "id": 1, "status": "Running", "total": 3 }])),
            JobStatus::Running
        );
        assert_eq!(
            parse_job_status(&json!([{ "id": 1, "status": "Stopped", "total": 3 }])),
            JobStatus::Done
        );
        assert_eq!(parse_job_status(&json!([])), JobStatus::Failed);
    }

    #[test]
    fn raw_result_clamps_unknown_counts() {
        let raw = json!({
            "descrLink": "https://nyaa.si/view/1",
            "fileUrl": "https://nyaa.si/download/1.torrent",
            "nbSeeders": -1,
            "fileSize": -1,
            "fileName": "[Group] Show - 01"
        });
        let result = SearchResultEntry::from_raw(&raw).unwrap();
        assert_eq!(result.seeder_count, 0);
        assert_eq!(result.size_bytes, 0);
    }

    #[test]
    fn human_size_scales_units() {
        assert_eq!(human_size(512), "512.00 B");
        assert_eq!(human_size(1536), "1.50 KB");
        assert_eq!(human_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn host_gets_scheme() {
        assert_eq!(normalize_host("127.0.0.1:8080/"), "http://127.0.0.1:8080");
        assert_eq!(normalize_host("https://qb.local"), "https://qb.local");
    }
}
