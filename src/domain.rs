use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::IrwError;

/// Which family of IRW datasets a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[default]
    Main,
    Sim,
    Comp,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Main, Source::Sim, Source::Comp];

    pub fn title(self) -> &'static str {
        match self {
            Source::Main => "IRW Database Information",
            Source::Sim => "IRW Simulation Database Information",
            Source::Comp => "IRW Competition Database Information",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Main => write!(f, "main"),
            Source::Sim => write!(f, "sim"),
            Source::Comp => write!(f, "comp"),
        }
    }
}

impl FromStr for Source {
    type Err = IrwError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "main" => Ok(Source::Main),
            "sim" => Ok(Source::Sim),
            "comp" => Ok(Source::Comp),
            _ => Err(IrwError::InvalidSource(value.to_string())),
        }
    }
}

/// An IRW table identifier, e.g. `agn_kay_2025`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName(String);

impl TableName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_lowercase(&self) -> String {
        self.0.to_lowercase()
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TableName {
    type Err = IrwError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed
                .chars()
                .all(|ch| !ch.is_control() && ch != '/' && ch != '\\');
        if !is_valid {
            return Err(IrwError::InvalidTableName(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// A Redivis dataset reference: `owner.dataset[:version-id]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetRef {
    pub owner: String,
    pub dataset: String,
}

impl DatasetRef {
    pub fn new(owner: &str, dataset: &str) -> Self {
        Self {
            owner: owner.to_string(),
            dataset: dataset.to_string(),
        }
    }

    /// Fully qualified `owner.dataset` form used in API paths.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.owner, self.dataset)
    }

    pub fn table_ref(&self, table: &str) -> String {
        format!("{}.{}", self.qualified(), table)
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified())
    }
}

impl FromStr for DatasetRef {
    type Err = IrwError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (owner, dataset) = trimmed
            .split_once('.')
            .ok_or_else(|| IrwError::InvalidDatasetRef(value.to_string()))?;
        if owner.is_empty() || dataset.is_empty() || dataset.contains('.') {
            return Err(IrwError::InvalidDatasetRef(value.to_string()));
        }
        Ok(Self::new(owner, dataset))
    }
}

/// Reducer applied when several responses share a (respondent, item) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum AggMethod {
    #[default]
    Mean,
    Median,
    First,
    Last,
    Max,
    Min,
    Mode,
}

impl AggMethod {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            AggMethod::Mean | AggMethod::Median | AggMethod::Max | AggMethod::Min
        )
    }
}

impl fmt::Display for AggMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggMethod::Mean => "mean",
            AggMethod::Median => "median",
            AggMethod::First => "first",
            AggMethod::Last => "last",
            AggMethod::Max => "max",
            AggMethod::Min => "min",
            AggMethod::Mode => "mode",
        };
        write!(f, "{name}")
    }
}

impl FromStr for AggMethod {
    type Err = IrwError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(AggMethod::Mean),
            "median" => Ok(AggMethod::Median),
            "first" => Ok(AggMethod::First),
            "last" => Ok(AggMethod::Last),
            "max" => Ok(AggMethod::Max),
            "min" => Ok(AggMethod::Min),
            "mode" => Ok(AggMethod::Mode),
            _ => Err(IrwError::UnsupportedAggregation(value.to_string())),
        }
    }
}

/// What to do with multi-wave data when no wave is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WavePolicy {
    /// Keep only the wave with the most rows (ties go to the first seen).
    #[default]
    MostFrequent,
    /// Pool every wave and let the aggregation method resolve duplicates.
    All,
    /// Refuse to guess.
    Error,
}
