use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::debug;

use crate::domain::EntryId;
use crate::error::MalqError;

pub const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(500);

pub const DEFAULT_CATALOG_URL: &str = "https://api.myanimelist.net/v2";

const ENTRY_FIELDS: &str =
    "id,title,alternative_titles,status,num_episodes,mean,start_season,genres";

pub trait CatalogClient: Send + Sync {
    fn fetch_entry(&self, id: EntryId, with_related: bool) -> Result<Value, MalqError>;
    fn search_entries(&self, query: &str, limit: usize) -> Result<Vec<Value>, MalqError>;
}

#[derive(Debug)]
pub struct RateGovernor {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateGovernor {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub fn wait(&self) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let remaining = self.min_interval - elapsed;
                debug!(wait_ms = remaining.as_millis() as u64, "rate governor sleeping");
                thread::sleep(remaining);
            }
        }
        *last = Some(Instant::now());
    }
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new(MIN_REQUEST_INTERVAL)
    }
}

pub struct MalHttpClient {
    client: Client,
    base_url: String,
    access_token: String,
    governor: RateGovernor,
}

impl MalHttpClient {
    pub fn new(
        access_token: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MalqError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("malq/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| MalqError::CatalogHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| MalqError::CatalogHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            governor: RateGovernor::default(),
        })
    }

    fn entry_url(&self, id: EntryId) -> String {
        format!("{}/anime/{}", self.base_url, id)
    }

    fn search_url(&self) -> String {
        format!("{}/anime", self.base_url)
    }

    fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, MalqError> {
        self.governor.wait();
        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .map_err(|err| MalqError::CatalogHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let value = response
            .json::<Value>()
            .map_err(|err| MalqError::CatalogHttp(err.to_string()))?;
        debug!(url, latency_ms = start.elapsed().as_millis() as u64, "catalog response");
        Ok(value)
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
            .unwrap_or_else(|_| "catalog request failed".to_string());
        Err(MalqError::CatalogStatus { status, message })
    }
}

impl CatalogClient for MalHttpClient {
    fn fetch_entry(&self, id: EntryId, with_related: bool) -> Result<Value, MalqError> {
        let fields = if with_related {
            format!("{ENTRY_FIELDS},related_anime")
        } else {
            ENTRY_FIELDS.to_string()
        };
        self.get_json(&self.entry_url(id), &[("fields", fields)])
    }

    fn search_entries(&self, query: &str, limit: usize) -> Result<Vec<Value>, MalqError> {
        let body = self.get_json(
            &self.search_url(),
            &[
                ("q", query.to_string()),
                ("limit", limit.to_string()),
                ("fields", ENTRY_FIELDS.to_string()),
            ],
        )?;
        Ok(search_nodes(body))
    }
}

/// Unwraps `{"data": [{"node": {...}}, ...]}` into the node records, in rank order.
pub fn search_nodes(body: Value) -> Vec<Value> {
    match body {
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|mut item| item.get_mut("node").map(Value::take))
                .collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}
