//! The hosting platform seam and its Redivis REST implementation.

use std::io::{self, Read};
use std::time::Duration;

use camino::Utf8Path;
use reqwest::blocking::{Client, Response};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::DatasetRef;
use crate::error::IrwError;
use crate::fs_util;
use crate::table::Table;

pub const DEFAULT_API_BASE: &str = "https://redivis.com/api/v1";
const PAGE_SIZE: u32 = 100;

/// Dataset-level properties reported by the platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatasetProperties {
    pub name: Option<String>,
    pub table_count: u64,
    pub total_num_bytes: u64,
    /// Milliseconds since the Unix epoch.
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub version: Option<DatasetVersion>,
}

impl DatasetProperties {
    pub fn version_tag(&self) -> Option<&str> {
        self.version.as_ref().and_then(|v| v.tag.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetVersion {
    pub tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableEntry {
    pub name: String,
    #[serde(default)]
    pub num_rows: Option<u64>,
    #[serde(default)]
    pub variable_count: Option<u64>,
}

/// Operations the client needs from the hosting platform.
pub trait Platform {
    fn dataset_properties(&self, dataset: &DatasetRef) -> Result<DatasetProperties, IrwError>;
    fn list_tables(&self, dataset: &DatasetRef) -> Result<Vec<TableEntry>, IrwError>;
    fn fetch_table(&self, dataset: &DatasetRef, table: &str) -> Result<Table, IrwError>;
    fn download_table(
        &self,
        dataset: &DatasetRef,
        table: &str,
        destination: &Utf8Path,
        overwrite: bool,
    ) -> Result<(), IrwError>;
}

#[derive(Debug, Clone)]
pub struct PlatformSettings {
    pub api_base: String,
    pub token: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct RedivisHttpClient {
    client: Client,
    api_base: String,
}

impl RedivisHttpClient {
    pub fn new(settings: &PlatformSettings) -> Result<Self, IrwError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("irw/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| IrwError::PlatformHttp(err.to_string()))?,
        );
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", settings.token.trim()))
            .map_err(|_| {
                IrwError::Authentication("API token is not a valid header value".to_string())
            })?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| IrwError::PlatformHttp(err.to_string()))?;
        Ok(Self {
            client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
        })
    }

    fn dataset_url(&self, dataset: &DatasetRef) -> String {
        format!("{}/datasets/{}", self.api_base, encode_path(&dataset.qualified()))
    }

    fn rows_url(&self, dataset: &DatasetRef, table: &str) -> String {
        format!(
            "{}/tables/{}/rows?format=csv",
            self.api_base,
            encode_path(&dataset.table_ref(table))
        )
    }

    fn get(&self, url: &str, subject: &str) -> Result<Response, IrwError> {
        debug!(%url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| IrwError::PlatformHttp(err.to_string()))?;
        handle_status(response, subject)
    }
}

fn handle_status(response: Response, subject: &str) -> Result<Response, IrwError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| "Redivis request failed".to_string());
    Err(match status {
        401 | 403 => IrwError::Authentication(format!("{subject}: {}", message.trim())),
        404 => IrwError::NotFound(subject.to_string()),
        _ => IrwError::PlatformStatus { status, message },
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TablePage {
    #[serde(default)]
    results: Vec<TableEntry>,
    next_page_token: Option<String>,
}

impl Platform for RedivisHttpClient {
    fn dataset_properties(&self, dataset: &DatasetRef) -> Result<DatasetProperties, IrwError> {
        let response = self.get(&self.dataset_url(dataset), &dataset.qualified())?;
        response
            .json()
            .map_err(|err| IrwError::PlatformHttp(err.to_string()))
    }

    fn list_tables(&self, dataset: &DatasetRef) -> Result<Vec<TableEntry>, IrwError> {
        let base = format!("{}/tables?maxResults={PAGE_SIZE}", self.dataset_url(dataset));
        let mut tables = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let url = match &page_token {
                Some(token) => format!("{base}&pageToken={}", encode_path(token)),
                None => base.clone(),
            };
            let page: TablePage = self
                .get(&url, &dataset.qualified())?
                .json()
                .map_err(|err| IrwError::PlatformHttp(err.to_string()))?;
            tables.extend(page.results);
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(tables)
    }

    fn fetch_table(&self, dataset: &DatasetRef, table: &str) -> Result<Table, IrwError> {
        let response = self.get(&self.rows_url(dataset, table), table)?;
        Table::from_csv_reader(response)
    }

    fn download_table(
        &self,
        dataset: &DatasetRef,
        table: &str,
        destination: &Utf8Path,
        overwrite: bool,
    ) -> Result<(), IrwError> {
        if destination.as_std_path().exists() && !overwrite {
            return Err(IrwError::FileExists(destination.as_std_path().to_path_buf()));
        }
        let mut response = self.get(&self.rows_url(dataset, table), table)?;
        fs_util::write_atomic(destination, overwrite, |out| {
            copy_body(&mut response, out)
        })
    }
}

fn copy_body(body: &mut dyn Read, out: &mut dyn io::Write) -> Result<(), IrwError> {
    io::copy(body, out)
        .map(|_| ())
        .map_err(|err| IrwError::PlatformHttp(err.to_string()))
}

/// Percent-encodes everything outside the unreserved set plus `.` and `:`,
/// which Redivis references use as separators.
fn encode_path(value: &str) -> String {
    let mut out = String::new();
    for byte in value.as_bytes() {
        let ch = *byte as char;
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '~' | ':') {
            out.push(ch);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
