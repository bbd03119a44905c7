//! Connection state shared by every IRW operation.
//!
//! A [`Session`] connects to the platform on first use, reuses that handle
//! for later calls, and caches the metadata tables it downloads. `close()`
//! drops both; the next call reconnects.

use std::cell::{OnceCell, RefCell};
use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::bibtex::{CitationLookup, DoiHttpClient};
use crate::config::ResolvedConfig;
use crate::domain::{DatasetRef, Source};
use crate::error::IrwError;
use crate::platform::{DatasetProperties, Platform, RedivisHttpClient, TableEntry};
use crate::table::Table;

pub type Connector = Box<dyn Fn(&ResolvedConfig) -> Result<Box<dyn Platform>, IrwError>>;

/// Version-aware cache of metadata downloads.
///
/// An entry is served only when the dataset version it was stored under
/// matches the version requested.
#[derive(Debug, Default)]
pub struct MetadataCache {
    tables: HashMap<String, (Option<String>, Table)>,
    listings: HashMap<String, Vec<TableEntry>>,
    properties: HashMap<String, DatasetProperties>,
}

impl MetadataCache {
    pub fn table(&self, key: &str, version: Option<&str>) -> Option<&Table> {
        self.tables
            .get(key)
            .filter(|(stored, _)| stored.as_deref() == version)
            .map(|(_, table)| table)
    }

    pub fn store_table(&mut self, key: &str, version: Option<&str>, table: Table) {
        self.tables
            .insert(key.to_string(), (version.map(str::to_string), table));
    }

    pub fn clear(&mut self) {
        self.tables.clear();
        self.listings.clear();
        self.properties.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.listings.is_empty() && self.properties.is_empty()
    }
}

pub struct Session {
    config: ResolvedConfig,
    connector: Connector,
    platform: OnceCell<Box<dyn Platform>>,
    citations: OnceCell<Box<dyn CitationLookup>>,
    cache: RefCell<MetadataCache>,
}

impl Session {
    /// A session against the Redivis API described by `config`.
    pub fn new(config: ResolvedConfig) -> Self {
        Self::with_connector(config, |config| {
            let client = RedivisHttpClient::new(&config.platform_settings()?)?;
            Ok(Box::new(client) as Box<dyn Platform>)
        })
    }

    pub fn with_connector<F>(config: ResolvedConfig, connector: F) -> Self
    where
        F: Fn(&ResolvedConfig) -> Result<Box<dyn Platform>, IrwError> + 'static,
    {
        Self {
            config,
            connector: Box::new(connector),
            platform: OnceCell::new(),
            citations: OnceCell::new(),
            cache: RefCell::new(MetadataCache::default()),
        }
    }

    pub fn with_citation_lookup(self, lookup: impl CitationLookup + 'static) -> Self {
        let _ = self.citations.set(Box::new(lookup));
        self
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.platform.get().is_some()
    }

    /// The platform handle, connecting on first use.
    pub fn platform(&self) -> Result<&dyn Platform, IrwError> {
        if self.platform.get().is_none() {
            debug!("connecting to {}", self.config.api_base);
            let handle = (self.connector)(&self.config)?;
            let _ = self.platform.set(handle);
        }
        self.platform
            .get()
            .map(|handle| &**handle)
            .ok_or_else(|| IrwError::PlatformHttp("platform connection unavailable".to_string()))
    }

    pub fn citation_lookup(&self) -> Result<&dyn CitationLookup, IrwError> {
        if self.citations.get().is_none() {
            let client = DoiHttpClient::new(self.config.timeout)?;
            let _ = self.citations.set(Box::new(client));
        }
        self.citations
            .get()
            .map(|lookup| &**lookup)
            .ok_or_else(|| IrwError::CitationHttp("citation lookup unavailable".to_string()))
    }

    /// Drops the platform handle and every cached download.
    pub fn close(&mut self) {
        if self.platform.take().is_some() {
            info!("session closed");
        }
        self.cache.get_mut().clear();
    }

    pub fn datasets(&self, source: Source) -> &[DatasetRef] {
        self.config.datasets(source)
    }

    pub fn dataset_properties(&self, dataset: &DatasetRef) -> Result<DatasetProperties, IrwError> {
        let key = dataset.qualified();
        if let Some(props) = self.cache.borrow().properties.get(&key) {
            return Ok(props.clone());
        }
        let props = self.platform()?.dataset_properties(dataset)?;
        self.cache
            .borrow_mut()
            .properties
            .insert(key, props.clone());
        Ok(props)
    }

    /// Tables of one dataset, listed once per session.
    pub fn dataset_tables(&self, dataset: &DatasetRef) -> Result<Vec<TableEntry>, IrwError> {
        let key = dataset.qualified();
        if let Some(listing) = self.cache.borrow().listings.get(&key) {
            return Ok(listing.clone());
        }
        let listing = self.platform()?.list_tables(dataset)?;
        self.cache.borrow_mut().listings.insert(key, listing.clone());
        Ok(listing)
    }

    /// Lowercase names of every table in the source's datasets.
    ///
    /// Datasets that fail to list are skipped.
    pub fn existing_tables(&self, source: Source) -> Result<HashSet<String>, IrwError> {
        let mut names = HashSet::new();
        for dataset in self.datasets(source) {
            match self.dataset_tables(dataset) {
                Ok(listing) => names.extend(listing.into_iter().map(|t| t.name.to_lowercase())),
                Err(err @ IrwError::Authentication(_)) => return Err(err),
                Err(err) => info!("listing {dataset} failed: {err}"),
            }
        }
        Ok(names)
    }

    /// A metadata table from the meta dataset, refreshed when the dataset version changes.
    pub fn meta_table(&self, table: &str) -> Result<Table, IrwError> {
        let meta = self.config.meta.dataset.clone();
        let version = self.dataset_properties(&meta)?.version_tag().map(str::to_string);
        let key = meta.table_ref(table);
        if let Some(cached) = self.cache.borrow().table(&key, version.as_deref()) {
            return Ok(cached.clone());
        }
        let fetched = self.platform()?.fetch_table(&meta, table)?;
        self.cache
            .borrow_mut()
            .store_table(&key, version.as_deref(), fetched.clone());
        Ok(fetched)
    }

    /// Fetches `table` from the first dataset of `source` that has it.
    pub fn fetch_raw(&self, source: Source, table: &str) -> Result<Table, IrwError> {
        let platform = self.platform()?;
        let mut last_err = None;
        for dataset in self.datasets(source) {
            match platform.fetch_table(dataset, table) {
                Ok(found) => return Ok(found),
                Err(err @ IrwError::NotFound(_)) => last_err = Some(err),
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| IrwError::NotFound(table.to_string())))
    }

    pub(crate) fn cached_derived(&self, key: &str) -> Option<Table> {
        self.cache.borrow().table(key, None).cloned()
    }

    pub(crate) fn store_derived(&self, key: &str, table: Table) {
        self.cache.borrow_mut().store_table(key, None, table);
    }

    pub fn cache_is_empty(&self) -> bool {
        self.cache.borrow().is_empty()
    }
}
