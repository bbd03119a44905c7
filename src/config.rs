use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{AggMethod, DatasetRef, Source, WavePolicy};
use crate::error::IrwError;
use crate::platform::{DEFAULT_API_BASE, PlatformSettings};
use crate::reshape::DEFAULT_ID_DENSITY_THRESHOLD;

pub const CONFIG_FILE: &str = "irw.json";
pub const DEFAULT_TOKEN_ENV: &str = "REDIVIS_API_TOKEN";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub meta: Option<MetaConfig>,
    #[serde(default)]
    pub itemtext: Option<DatasetEntry>,
    #[serde(default)]
    pub reshape: ReshapeConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub main: Option<Vec<DatasetEntry>>,
    #[serde(default)]
    pub sim: Option<Vec<DatasetEntry>>,
    #[serde(default)]
    pub comp: Option<Vec<DatasetEntry>>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DatasetEntry {
    Shorthand(String),
    Detailed(DatasetEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatasetEntryObject {
    pub owner: String,
    pub dataset: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MetaConfig {
    pub dataset: DatasetEntry,
    #[serde(default)]
    pub metadata_table: Option<String>,
    #[serde(default)]
    pub tags_table: Option<String>,
    #[serde(default)]
    pub biblio_table: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ReshapeConfig {
    #[serde(default)]
    pub id_density_threshold: Option<f64>,
    #[serde(default)]
    pub agg: Option<AggMethod>,
    #[serde(default)]
    pub wave_policy: Option<WavePolicy>,
}

/// Where the precomputed table metadata lives.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaTables {
    pub dataset: DatasetRef,
    pub metadata: String,
    pub tags: String,
    pub biblio: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReshapeDefaults {
    pub id_density_threshold: f64,
    pub agg: AggMethod,
    pub wave_policy: WavePolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub api_base: String,
    pub token_env: String,
    pub timeout: Duration,
    pub main: Vec<DatasetRef>,
    pub sim: Vec<DatasetRef>,
    pub comp: Vec<DatasetRef>,
    pub meta: MetaTables,
    pub itemtext: DatasetRef,
    pub reshape: ReshapeDefaults,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            api_base: DEFAULT_API_BASE.to_string(),
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            main: default_main(),
            sim: vec![DatasetRef::new("bdomingu", "irw_simsyn:0btg")],
            comp: vec![DatasetRef::new("bdomingu", "irw_competitions:cmd7")],
            meta: default_meta(),
            itemtext: DatasetRef::new("bdomingu", "irw_text:07b6"),
            reshape: ReshapeDefaults {
                id_density_threshold: DEFAULT_ID_DENSITY_THRESHOLD,
                agg: AggMethod::default(),
                wave_policy: WavePolicy::default(),
            },
        }
    }
}

impl ResolvedConfig {
    /// Datasets searched, in order, for a source.
    pub fn datasets(&self, source: Source) -> &[DatasetRef] {
        match source {
            Source::Main => &self.main,
            Source::Sim => &self.sim,
            Source::Comp => &self.comp,
        }
    }

    /// Reads the API token from the configured environment variable.
    pub fn token(&self) -> Result<String, IrwError> {
        match std::env::var(&self.token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(IrwError::Authentication(format!(
                "environment variable {} is not set",
                self.token_env
            ))),
        }
    }

    pub fn platform_settings(&self) -> Result<PlatformSettings, IrwError> {
        Ok(PlatformSettings {
            api_base: self.api_base.clone(),
            token: self.token()?,
            timeout: self.timeout,
        })
    }
}

fn default_main() -> Vec<DatasetRef> {
    vec![
        DatasetRef::new("datapages", "item_response_warehouse:as2e"),
        DatasetRef::new("datapages", "item_response_warehouse_2:epbx"),
    ]
}

fn default_meta() -> MetaTables {
    MetaTables {
        dataset: DatasetRef::new("bdomingu", "irw_meta:bdxt"),
        metadata: "metadata:h5gs".to_string(),
        tags: "tags:7nkh".to_string(),
        biblio: "biblio:qahg".to_string(),
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, else `./irw.json`, else the user config directory, else built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, IrwError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::discover(),
        };
        let Some(config_path) = config_path else {
            debug!("no {CONFIG_FILE} found; using defaults");
            return Self::resolve_config(Config::default());
        };

        debug!("loading config from {}", config_path.display());
        let content = fs::read_to_string(&config_path)
            .map_err(|_| IrwError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| IrwError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("", "", "irw")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
            .filter(|path| path.exists())
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, IrwError> {
        let defaults = ResolvedConfig::default();

        let sources = config.sources;
        let main = resolve_entries(sources.main)?.unwrap_or(defaults.main);
        let sim = resolve_entries(sources.sim)?.unwrap_or(defaults.sim);
        let comp = resolve_entries(sources.comp)?.unwrap_or(defaults.comp);

        let meta = match config.meta {
            Some(meta) => MetaTables {
                dataset: resolve_entry(meta.dataset)?,
                metadata: meta.metadata_table.unwrap_or(defaults.meta.metadata),
                tags: meta.tags_table.unwrap_or(defaults.meta.tags),
                biblio: meta.biblio_table.unwrap_or(defaults.meta.biblio),
            },
            None => defaults.meta,
        };
        let itemtext = config
            .itemtext
            .map(resolve_entry)
            .transpose()?
            .unwrap_or(defaults.itemtext);

        let id_density_threshold = config
            .reshape
            .id_density_threshold
            .unwrap_or(defaults.reshape.id_density_threshold);
        if !(0.0..=1.0).contains(&id_density_threshold) {
            return Err(IrwError::ConfigParse(format!(
                "reshape.id_density_threshold must lie in [0, 1], got {id_density_threshold}"
            )));
        }

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            api_base: config.api_base.unwrap_or(defaults.api_base),
            token_env: config.token_env.unwrap_or(defaults.token_env),
            timeout: config
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            main,
            sim,
            comp,
            meta,
            itemtext,
            reshape: ReshapeDefaults {
                id_density_threshold,
                agg: config.reshape.agg.unwrap_or(defaults.reshape.agg),
                wave_policy: config
                    .reshape
                    .wave_policy
                    .unwrap_or(defaults.reshape.wave_policy),
            },
        })
    }
}

fn resolve_entry(entry: DatasetEntry) -> Result<DatasetRef, IrwError> {
    match entry {
        DatasetEntry::Shorthand(value) => value.parse(),
        DatasetEntry::Detailed(obj) => format!("{}.{}", obj.owner, obj.dataset).parse(),
    }
}

fn resolve_entries(
    entries: Option<Vec<DatasetEntry>>,
) -> Result<Option<Vec<DatasetRef>>, IrwError> {
    entries
        .map(|entries| {
            entries
                .into_iter()
                .map(resolve_entry)
                .collect::<Result<Vec<_>, IrwError>>()
        })
        .transpose()
}
