use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IrwError {
    #[error("schema error: {0}")]
    #[diagnostic(help("long-format tables need respondent, item and response columns (default: id, item, resp)"))]
    Schema(String),

    #[error("unsupported aggregation method: {0}")]
    #[diagnostic(help("choose one of: mean, median, first, last, max, min, mode"))]
    UnsupportedAggregation(String),

    #[error("invalid filter: {0}")]
    #[diagnostic(help("run `irw filters` to list the available filters"))]
    Filter(String),

    #[error("table not found: {0}")]
    NotFound(String),

    #[error("authentication failed: {0}")]
    #[diagnostic(help("set REDIVIS_API_TOKEN (or the variable named by `token_env` in irw.json)"))]
    Authentication(String),

    #[error("invalid table name: {0}")]
    InvalidTableName(String),

    #[error("invalid dataset reference: {0}")]
    InvalidDatasetRef(String),

    #[error("unknown source '{0}', expected one of: main, sim, comp")]
    InvalidSource(String),

    #[error("Redivis request failed: {0}")]
    PlatformHttp(String),

    #[error("Redivis returned status {status}: {message}")]
    PlatformStatus { status: u16, message: String },

    #[error("citation lookup failed: {0}")]
    CitationHttp(String),

    #[error("invalid CSV data: {0}")]
    InvalidCsv(String),

    #[error("file already exists: {0} (pass overwrite to replace it)")]
    FileExists(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
