use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::CatalogClient;
use crate::domain::{Entry, EntryId};
use crate::error::MalqError;
use crate::progress::{INDETERMINATE, ProgressSink};
use crate::search::{
    DEFAULT_MAX_RESULTS, DEFAULT_POLL_INTERVAL, JobPoller, SearchResultEntry, SearchScope,
    SearchService,
};
use crate::store::{CacheStore, RefreshReport};

pub const CATALOG_SEARCH_LIMIT: usize = 10;

const STARTUP_PREFIX: &str = "Refreshing data for entries that are still airing... ";
const REFRESH_ALL_PREFIX: &str = "Refreshing data for all entries... ";
const SEARCH_PREFIX: &str = "Searching with qBittorrent... ";

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub scope: SearchScope,
    pub poll_interval: Duration,
    pub max_results: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            scope: SearchScope::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub entries: Vec<Entry>,
}

pub struct App<C: CatalogClient, S: SearchService> {
    store: CacheStore,
    catalog: C,
    search: Option<S>,
    settings: SearchSettings,
}

impl<C: CatalogClient, S: SearchService> App<C, S> {
    pub fn new(store: CacheStore, catalog: C, search: Option<S>, settings: SearchSettings) -> Self {
        Self {
            store,
            catalog,
            search,
            settings,
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn search_service(&self) -> Option<&S> {
        self.search.as_ref()
    }

    pub fn has_search(&self) -> bool {
        self.search.is_some()
    }

    pub fn startup(&mut self, sink: &dyn ProgressSink) -> Result<RefreshReport, MalqError> {
        self.store.refresh(&self.catalog, false, sink, STARTUP_PREFIX)
    }

    pub fn refresh(&mut self, all: bool, sink: &dyn ProgressSink) -> Result<RefreshReport, MalqError> {
        let prefix = if all { REFRESH_ALL_PREFIX } else { STARTUP_PREFIX };
        self.store.refresh(&self.catalog, all, sink, prefix)
    }

    pub fn search_catalog(&self, query: &str) -> Result<Vec<Entry>, MalqError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(MalqError::MalformedInput("empty search query".to_string()));
        }
        let records = self.catalog.search_entries(query, CATALOG_SEARCH_LIMIT)?;
        records
            .iter()
            .map(|record| Entry::from_record(record, false))
            .collect()
    }

    pub fn add(&mut self, entry: Entry) -> Result<(), MalqError> {
        let id = entry.id;
        self.store.add_unique(entry)?;
        info!(%id, "entry added");
        Ok(())
    }

    pub fn remove(&mut self, id: EntryId) -> Result<Entry, MalqError> {
        let removed = self.store.remove(id)?;
        info!(%id, "entry removed");
        Ok(removed)
    }

    pub fn remove_at(&mut self, index: usize) -> Result<Entry, MalqError> {
        let id = self
            .store
            .entries()
            .get(index)
            .map(|entry| entry.id)
            .ok_or_else(|| MalqError::NotTracked(format!("index {index}")))?;
        self.remove(id)
    }

    pub fn search_list(&self, query: &str) -> Vec<&Entry> {
        self.store.search(query)
    }

    pub fn check_list(&self) -> ListResult {
        ListResult {
            entries: self.store.entries().to_vec(),
        }
    }

    pub fn completed(&self) -> Vec<&Entry> {
        self.store.completed().collect()
    }

    pub fn details(&self, id: EntryId) -> Result<Entry, MalqError> {
        let raw = self.catalog.fetch_entry(id, true)?;
        Entry::from_record(&raw, true)
    }

    pub fn search_transfers(
        &self,
        entry: &Entry,
        extra_query: &str,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<SearchResultEntry>, MalqError> {
        let service = self.search.as_ref().ok_or(MalqError::SearchUnavailable)?;
        let extra_query = extra_query.trim();
        let query = if extra_query.is_empty() {
            entry.name.clone()
        } else {
            format!("{} {extra_query}", entry.name)
        };

        let poller = JobPoller::new(service)
            .with_interval(self.settings.poll_interval)
            .with_max_results(self.settings.max_results);
        let mut job = poller.start(&query, &self.settings.scope)?;
        let mut progress = sink.open(SEARCH_PREFIX, INDETERMINATE);
        let results = poller.wait(&mut job);
        progress.finish();
        results
    }

    pub fn submit_transfer(&self, result: &SearchResultEntry) -> Result<(), MalqError> {
        let service = self.search.as_ref().ok_or(MalqError::SearchUnavailable)?;
        service.submit_transfer(&result.transfer_url)
    }

    pub fn save(&self) -> Result<(), MalqError> {
        self.store.save()
    }

    pub fn shutdown(&self) -> Result<(), MalqError> {
        self.store.save()?;
        if let Some(service) = &self.search {
            if let Err(err) = service.end_session() {
                warn!(error = %err, "search service logout failed");
            }
        }
        Ok(())
    }
}
