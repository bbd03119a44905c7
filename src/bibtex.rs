//! BibTeX citation assembly for IRW tables.
//!
//! Each table's citation comes from the curated `BibTex` cell of the
//! bibliography table when it holds a usable entry, and otherwise from a
//! DOI content-negotiation lookup. The entry key is rewritten to the table
//! name so citations line up with the data they describe.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use camino::Utf8Path;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::IrwError;
use crate::fs_util;
use crate::table::Table;

pub const BIBTEX_COLUMN: &str = "BibTex";
pub const DOI_COLUMN: &str = "DOI__for_paper_";
const DOI_BASE: &str = "https://doi.org";

static ENTRY_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@(\w+)\s*\{\s*[^,{}\s]*\s*([,}])").expect("entry header regex is valid")
});

/// Resolves a DOI to a BibTeX entry.
pub trait CitationLookup {
    /// `Ok(None)` when the DOI resolves but yields nothing usable.
    fn bibtex_for_doi(&self, doi: &str) -> Result<Option<String>, IrwError>;
}

#[derive(Debug, Clone)]
pub struct DoiHttpClient {
    client: Client,
}

impl DoiHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, IrwError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("irw/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| IrwError::CitationHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/x-bibtex"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| IrwError::CitationHttp(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn doi_url(doi: &str) -> String {
        format!("{DOI_BASE}/{}", normalize_doi(doi))
    }
}

impl CitationLookup for DoiHttpClient {
    fn bibtex_for_doi(&self, doi: &str) -> Result<Option<String>, IrwError> {
        let url = Self::doi_url(doi);
        debug!(%url, "resolving DOI");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| IrwError::CitationHttp(err.to_string()))?;
        if !response.status().is_success() {
            return Err(IrwError::CitationHttp(format!(
                "{url} returned status {}",
                response.status().as_u16()
            )));
        }
        let body = response
            .text()
            .map_err(|err| IrwError::CitationHttp(err.to_string()))?;
        let body = body.trim();
        Ok(body.contains('@').then(|| body.to_string()))
    }
}

/// Strips resolver prefixes so `https://doi.org/10.1/x` and `doi:10.1/x` both become `10.1/x`.
pub fn normalize_doi(doi: &str) -> &str {
    let doi = doi.trim();
    ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "doi:"]
        .iter()
        .find_map(|prefix| doi.strip_prefix(prefix))
        .unwrap_or(doi)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BibtexEntry {
    pub table: String,
    pub key: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CitationFailure {
    pub table: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BibtexReport {
    pub entries: Vec<BibtexEntry>,
    /// Names that are not IRW tables.
    pub not_found: Vec<String>,
    /// Tables without a curated entry or a resolvable DOI.
    pub missing: Vec<String>,
    pub failures: Vec<CitationFailure>,
}

impl BibtexReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.text);
            out.push_str("\n\n");
        }
        out
    }

    /// Writes every entry, each followed by a blank line.
    pub fn write_to(&self, path: &Utf8Path) -> Result<(), IrwError> {
        let rendered = self.render();
        fs_util::write_atomic(path, true, |out| {
            out.write_all(rendered.as_bytes())
                .map_err(|err| IrwError::Filesystem(err.to_string()))
        })
    }
}

/// Assembles citations for `names`.
///
/// `existing` holds the lowercase names of every IRW table and `biblio` is
/// the bibliography table keyed by its `table` column. Duplicate requests
/// are skipped after the first occurrence.
pub fn assemble<S: AsRef<str>>(
    names: &[S],
    existing: &HashSet<String>,
    biblio: &Table,
    lookup: &dyn CitationLookup,
) -> BibtexReport {
    let mut report = BibtexReport::default();
    let mut seen = HashSet::new();
    let mut keys = KeyAllocator::default();

    for name in names {
        let name = name.as_ref().trim();
        if !seen.insert(name.to_lowercase()) {
            continue;
        }
        if !existing.contains(&name.to_lowercase()) {
            report.not_found.push(name.to_string());
            continue;
        }

        let Some(row) = biblio_row(biblio, name) else {
            report.missing.push(name.to_string());
            continue;
        };
        let curated = cell(biblio, row, BIBTEX_COLUMN).filter(|text| text.contains('@'));
        let text = match curated {
            Some(text) => Some(text),
            None => match cell(biblio, row, DOI_COLUMN) {
                Some(doi) => match lookup.bibtex_for_doi(&doi) {
                    Ok(found) => found,
                    Err(err) => {
                        warn!("citation lookup for '{name}' failed: {err}");
                        report.failures.push(CitationFailure {
                            table: name.to_string(),
                            reason: err.to_string(),
                        });
                        continue;
                    }
                },
                None => None,
            },
        };

        match text {
            Some(text) if !ENTRY_HEAD.is_match(text.trim()) => {
                warn!("citation for '{name}' has no entry header; skipping it");
                report.missing.push(name.to_string());
            }
            Some(text) => {
                let key = keys.allocate(name);
                report.entries.push(BibtexEntry {
                    table: name.to_string(),
                    text: rekey(&text, &key),
                    key,
                });
            }
            None => report.missing.push(name.to_string()),
        }
    }
    report
}

fn biblio_row(biblio: &Table, name: &str) -> Option<usize> {
    let idx = biblio.column_index("table")?;
    let wanted = name.to_lowercase();
    biblio
        .rows()
        .iter()
        .position(|row| row[idx].to_string().to_lowercase() == wanted)
}

fn cell(table: &Table, row: usize, column: &str) -> Option<String> {
    table
        .get(row, column)
        .filter(|value| !value.is_null())
        .map(|value| value.to_string().trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Replaces the key of the first entry header with `key`. Both
/// `@type{key,` and field-less `@type{key}` headers are rewritten.
pub fn rekey(entry: &str, key: &str) -> String {
    ENTRY_HEAD
        .replacen(entry.trim(), 1, |caps: &regex::Captures<'_>| {
            format!("@{}{{{key}{}", &caps[1], &caps[2])
        })
        .into_owned()
}

/// Maps a table name to BibTeX key characters.
pub fn sanitize_key(name: &str) -> String {
    let key: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | ':' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if key.is_empty() { "irw".to_string() } else { key }
}

#[derive(Debug, Default)]
struct KeyAllocator {
    used: HashSet<String>,
}

impl KeyAllocator {
    fn allocate(&mut self, name: &str) -> String {
        let base = sanitize_key(name);
        if self.used.insert(base.clone()) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}_{n}");
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}
