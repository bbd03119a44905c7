//! Predicate filtering over the IRW metadata catalogue.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::info;

use crate::error::IrwError;
use crate::table::{Table, Value};

pub const DEFAULT_DENSITY: (f64, f64) = (0.5, 1.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Numeric,
    Tag,
    Variables,
    Flag,
}

#[derive(Debug, Clone, Copy)]
pub struct FilterSpec {
    pub name: &'static str,
    pub column: &'static str,
    pub kind: FilterKind,
    pub description: &'static str,
}

const RANGE_HELP: &str = "Use a single number for exact match, or a range [min, max] (null/None for an open end, e.g. [1000, null] for >= 1000).";

pub const FILTERS: &[FilterSpec] = &[
    FilterSpec {
        name: "n_responses",
        column: "n_responses",
        kind: FilterKind::Numeric,
        description: "Total number of responses in the dataset.",
    },
    FilterSpec {
        name: "n_categories",
        column: "n_categories",
        kind: FilterKind::Numeric,
        description: "Number of unique response categories.",
    },
    FilterSpec {
        name: "n_participants",
        column: "n_participants",
        kind: FilterKind::Numeric,
        description: "Number of unique participants (id) in the dataset.",
    },
    FilterSpec {
        name: "n_items",
        column: "n_items",
        kind: FilterKind::Numeric,
        description: "Number of unique items.",
    },
    FilterSpec {
        name: "responses_per_participant",
        column: "responses_per_participant",
        kind: FilterKind::Numeric,
        description: "Average number of responses per participant.",
    },
    FilterSpec {
        name: "responses_per_item",
        column: "responses_per_item",
        kind: FilterKind::Numeric,
        description: "Average number of responses per item.",
    },
    FilterSpec {
        name: "density",
        column: "density",
        kind: FilterKind::Numeric,
        description: "Matrix density: the proportion of person-item cells with a valid response. 1 means every person answered every item.",
    },
    FilterSpec {
        name: "var",
        column: "variables",
        kind: FilterKind::Variables,
        description: "Presence of variables in the dataset. Exact names (\"rt\", \"wave\") or prefixes (\"cov_\" matches any variable starting with \"cov_\"). All listed variables must be present.",
    },
    FilterSpec {
        name: "age_range",
        column: "age_range",
        kind: FilterKind::Tag,
        description: "Participant age group (e.g. \"Adult (18+)\"). Several values match with OR.",
    },
    FilterSpec {
        name: "child_age",
        column: "child_age",
        kind: FilterKind::Tag,
        description: "Child age subgroup, for child-focused studies. Several values match with OR.",
    },
    FilterSpec {
        name: "construct_type",
        column: "construct_type",
        kind: FilterKind::Tag,
        description: "High-level construct category (e.g. \"Affective/mental health\"). Several values match with OR.",
    },
    FilterSpec {
        name: "construct_name",
        column: "construct_name",
        kind: FilterKind::Tag,
        description: "Specific construct name (e.g. \"Big Five\"). Several values match with OR.",
    },
    FilterSpec {
        name: "sample",
        column: "sample",
        kind: FilterKind::Tag,
        description: "Sample type or recruitment method (e.g. \"Educational\", \"Clinical\"). Several values match with OR.",
    },
    FilterSpec {
        name: "measurement_tool",
        column: "measurement_tool",
        kind: FilterKind::Tag,
        description: "Instrument type (e.g. \"Survey/questionnaire\"). Several values match with OR.",
    },
    FilterSpec {
        name: "item_format",
        column: "item_format",
        kind: FilterKind::Tag,
        description: "Item format (e.g. \"Likert Scale/selected response\"). Several values match with OR.",
    },
    FilterSpec {
        name: "language",
        column: "language",
        kind: FilterKind::Tag,
        description: "Primary language (e.g. \"eng\"). Several values match with OR.",
    },
    FilterSpec {
        name: "longitudinal",
        column: "longitudinal",
        kind: FilterKind::Flag,
        description: "Whether the dataset is longitudinal (has wave or date variables).",
    },
    FilterSpec {
        name: "license",
        column: "license",
        kind: FilterKind::Tag,
        description: "Dataset license (e.g. \"CC BY 4.0\"). Several values match with OR.",
    },
];

/// Names of every supported filter.
pub fn get_filters() -> Vec<&'static str> {
    FILTERS.iter().map(|spec| spec.name).collect()
}

pub fn lookup(name: &str) -> Result<&'static FilterSpec, IrwError> {
    FILTERS
        .iter()
        .find(|spec| spec.name == name)
        .ok_or_else(|| IrwError::Filter(format!("unknown filter '{name}'")))
}

/// A single filter criterion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Criterion {
    Exact(Value),
    /// Inclusive bounds; `None` leaves that side open.
    Range(Option<f64>, Option<f64>),
    AnyOf(Vec<String>),
    Flag(bool),
}

impl Criterion {
    pub fn at_least(min: f64) -> Self {
        Criterion::Range(Some(min), None)
    }

    /// Interprets the loosely typed JSON forms: `5`, `[1, null]`, `"x"`, `["x", "y"]`, `true`.
    pub fn from_json(value: &JsonValue) -> Result<Self, IrwError> {
        match value {
            JsonValue::Number(number) => number
                .as_f64()
                .map(|n| Criterion::Exact(Value::from_f64(n)))
                .ok_or_else(|| IrwError::Filter(format!("unsupported number {number}"))),
            JsonValue::String(text) => Ok(Criterion::AnyOf(vec![text.clone()])),
            JsonValue::Bool(flag) => Ok(Criterion::Flag(*flag)),
            JsonValue::Array(items) if items.iter().all(JsonValue::is_string) => {
                Ok(Criterion::AnyOf(
                    items
                        .iter()
                        .filter_map(|item| item.as_str().map(str::to_string))
                        .collect(),
                ))
            }
            JsonValue::Array(items) => {
                let bound = |item: &JsonValue| -> Result<Option<f64>, IrwError> {
                    match item {
                        JsonValue::Null => Ok(None),
                        JsonValue::Number(n) => Ok(n.as_f64()),
                        other => Err(IrwError::Filter(format!("invalid range bound {other}"))),
                    }
                };
                match items.as_slice() {
                    [single] => bound(single)?
                        .map(|n| Criterion::Exact(Value::from_f64(n)))
                        .ok_or_else(|| IrwError::Filter("empty exact match".to_string())),
                    [min, max] => Ok(Criterion::Range(bound(min)?, bound(max)?)),
                    _ => Err(IrwError::Filter(format!(
                        "ranges take one or two bounds, got {}",
                        items.len()
                    ))),
                }
            }
            JsonValue::Null | JsonValue::Object(_) => {
                Err(IrwError::Filter(format!("unsupported criterion {value}")))
            }
        }
    }

    /// Parses command-line syntax: `1000..`, `..50`, `10..50`, `5`, `true`, or `a,b`.
    pub fn parse_for(spec: &FilterSpec, raw: &str) -> Result<Self, IrwError> {
        let raw = raw.trim();
        match spec.kind {
            FilterKind::Numeric => {
                if let Some((min, max)) = raw.split_once("..") {
                    Ok(Criterion::Range(parse_bound(spec, min)?, parse_bound(spec, max)?))
                } else {
                    let number = parse_bound(spec, raw)?.ok_or_else(|| {
                        IrwError::Filter(format!("{} needs a number or range", spec.name))
                    })?;
                    Ok(Criterion::Exact(Value::from_f64(number)))
                }
            }
            FilterKind::Flag => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" => Ok(Criterion::Flag(true)),
                "false" | "no" => Ok(Criterion::Flag(false)),
                _ => Err(IrwError::Filter(format!("{} expects true or false", spec.name))),
            },
            FilterKind::Tag | FilterKind::Variables => Ok(Criterion::AnyOf(
                raw.split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
        }
    }

    fn validate(&self, spec: &FilterSpec) -> Result<(), IrwError> {
        let ok = match (spec.kind, self) {
            (FilterKind::Numeric, Criterion::Exact(value)) => value.as_f64().is_some(),
            (FilterKind::Numeric, Criterion::Range(min, max)) => {
                if let (Some(min), Some(max)) = (min, max) {
                    if min > max {
                        return Err(IrwError::Filter(format!(
                            "{}: range minimum {min} exceeds maximum {max}",
                            spec.name
                        )));
                    }
                }
                true
            }
            (FilterKind::Tag | FilterKind::Variables, Criterion::AnyOf(values)) => {
                !values.is_empty()
            }
            (FilterKind::Tag | FilterKind::Variables, Criterion::Exact(Value::Text(_))) => true,
            (FilterKind::Flag, Criterion::Flag(_)) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(IrwError::Filter(format!(
                "{} does not accept {:?}",
                spec.name, self
            )))
        }
    }

    fn matches(&self, spec: &FilterSpec, cell: &Value) -> bool {
        match self {
            Criterion::Exact(expected) => match (cell.as_f64(), expected.as_f64()) {
                (Some(actual), Some(expected)) => actual == expected,
                _ => tag_values(cell).iter().any(|tag| *tag == expected.to_string()),
            },
            Criterion::Range(min, max) => cell.as_f64().is_some_and(|value| {
                min.is_none_or(|min| value >= min) && max.is_none_or(|max| value <= max)
            }),
            Criterion::AnyOf(wanted) if spec.kind == FilterKind::Variables => {
                let present = variable_values(cell);
                wanted.iter().all(|var| {
                    let var = var.to_lowercase();
                    if var.contains('_') {
                        let prefix = var.trim_end_matches('_');
                        present.iter().any(|v| v.starts_with(prefix))
                    } else {
                        present.contains(&var)
                    }
                })
            }
            Criterion::AnyOf(wanted) => {
                let tags = tag_values(cell);
                tags.iter().any(|tag| wanted.iter().any(|w| w == tag))
            }
            Criterion::Flag(flag) => cell.as_bool() == Some(*flag),
        }
    }
}

fn parse_bound(spec: &FilterSpec, raw: &str) -> Result<Option<f64>, IrwError> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("none") || raw.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| IrwError::Filter(format!("{}: '{raw}' is not a number", spec.name)))
}

/// Tag cells may hold several comma-separated values.
fn tag_values(cell: &Value) -> Vec<String> {
    if cell.is_null() {
        return Vec::new();
    }
    cell.to_string()
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// The `variables` column lists names separated by `|`.
fn variable_values(cell: &Value) -> Vec<String> {
    if cell.is_null() {
        return Vec::new();
    }
    cell.to_string()
        .split('|')
        .map(|part| part.trim().to_lowercase())
        .filter(|part| !part.is_empty())
        .collect()
}

/// Named criteria combined with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    criteria: BTreeMap<String, Criterion>,
    default_density: bool,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, criterion: Criterion) -> Result<Self, IrwError> {
        self.insert(name, criterion)?;
        Ok(self)
    }

    pub fn insert(&mut self, name: &str, criterion: Criterion) -> Result<(), IrwError> {
        let spec = lookup(name)?;
        criterion.validate(spec)?;
        self.criteria.insert(name.to_string(), criterion);
        Ok(())
    }

    /// Builds a set from a JSON object such as `{"n_responses": [1000, null]}`.
    pub fn from_json(value: &JsonValue) -> Result<Self, IrwError> {
        let object = value
            .as_object()
            .ok_or_else(|| IrwError::Filter("filters must be a JSON object".to_string()))?;
        let mut set = Self::new();
        for (name, raw) in object {
            if raw.is_null() {
                lookup(name)?;
                continue;
            }
            set.insert(name, Criterion::from_json(raw)?)?;
        }
        Ok(set)
    }

    /// Adds `density` in [0.5, 1] unless a density criterion is already present.
    pub fn with_default_density(mut self) -> Self {
        if !self.criteria.contains_key("density") {
            self.criteria.insert(
                "density".to_string(),
                Criterion::Range(Some(DEFAULT_DENSITY.0), Some(DEFAULT_DENSITY.1)),
            );
            self.default_density = true;
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn criteria(&self) -> impl Iterator<Item = (&str, &Criterion)> {
        self.criteria.iter().map(|(name, c)| (name.as_str(), c))
    }

    /// Sorted names of the tables matching every criterion.
    ///
    /// A criterion whose column is absent from the metadata is skipped.
    pub fn apply(&self, metadata: &Table) -> Result<Vec<String>, IrwError> {
        let outcome = self.evaluate(metadata)?;
        if outcome.removed_by_default_density > 0 {
            info!(
                "default density filter (0.5-1) removed {} dataset(s); \
                 pass an explicit density to change it",
                outcome.removed_by_default_density
            );
        }
        Ok(outcome.names)
    }

    fn evaluate(&self, metadata: &Table) -> Result<Outcome, IrwError> {
        let name_idx = metadata
            .column_index("name")
            .ok_or_else(|| IrwError::Schema("metadata has no 'name' column".to_string()))?;

        let mut active = Vec::new();
        for (name, criterion) in &self.criteria {
            let spec = lookup(name)?;
            match metadata.column_index(spec.column) {
                Some(idx) => active.push((spec, criterion, idx)),
                None => info!("metadata has no '{}' column; filter skipped", spec.column),
            }
        }

        // Density is judged after the other numeric filters.
        let mut outcome = Outcome::default();
        for row in metadata.rows() {
            let (mut numeric_ok, mut density_ok, mut rest_ok) = (true, true, true);
            for (spec, criterion, idx) in &active {
                if criterion.matches(spec, &row[*idx]) {
                    continue;
                }
                if spec.name == "density" {
                    density_ok = false;
                } else if spec.kind == FilterKind::Numeric {
                    numeric_ok = false;
                } else {
                    rest_ok = false;
                }
            }
            if numeric_ok && !density_ok && self.default_density {
                outcome.removed_by_default_density += 1;
            }
            if numeric_ok && density_ok && rest_ok {
                outcome.names.push(row[name_idx].to_string());
            }
        }
        outcome.names.sort();
        outcome.names.dedup();
        Ok(outcome)
    }
}

#[derive(Debug, Default)]
struct Outcome {
    names: Vec<String>,
    removed_by_default_density: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub count: usize,
    pub null_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterValues {
    Numeric(NumericSummary),
    Counts(Vec<(String, usize)>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterDescription {
    pub name: String,
    pub kind: FilterKind,
    pub description: String,
    pub values: Option<FilterValues>,
}

impl fmt::Display for FilterDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(f, "  {}", self.description)?;
        match &self.values {
            Some(FilterValues::Numeric(summary)) => {
                writeln!(
                    f,
                    "  min {:.2}  max {:.2}  mean {:.2}  median {:.2}  std {:.2}",
                    summary.min, summary.max, summary.mean, summary.median, summary.std
                )?;
                writeln!(f, "  {} value(s), {} missing", summary.count, summary.null_count)
            }
            Some(FilterValues::Counts(counts)) => {
                for (value, count) in counts {
                    writeln!(f, "  {value:<40} {count}")?;
                }
                Ok(())
            }
            None => writeln!(f, "  (no values in metadata)"),
        }
    }
}

/// Describes a filter and summarises the values it can take in `metadata`.
pub fn describe_filter(name: &str, metadata: &Table) -> Result<FilterDescription, IrwError> {
    let spec = lookup(name)?;
    let description = match spec.kind {
        FilterKind::Numeric => format!("{} {RANGE_HELP}", spec.description),
        FilterKind::Flag => format!("{} Use true or false.", spec.description),
        _ => spec.description.to_string(),
    };
    let values = metadata.column_index(spec.column).and_then(|idx| {
        let cells = metadata.column_values(idx);
        match spec.kind {
            FilterKind::Numeric => summarize(cells).map(FilterValues::Numeric),
            FilterKind::Tag => Some(FilterValues::Counts(value_counts(
                cells.filter(|cell| !cell.is_null()).map(|cell| cell.to_string()),
            ))),
            FilterKind::Variables => Some(FilterValues::Counts(value_counts(
                cells.flat_map(variable_values),
            ))),
            FilterKind::Flag => Some(FilterValues::Counts(value_counts(
                cells.filter_map(Value::as_bool).map(|flag| flag.to_string()),
            ))),
        }
    });
    Ok(FilterDescription {
        name: spec.name.to_string(),
        kind: spec.kind,
        description,
        values,
    })
}

fn summarize<'a>(cells: impl Iterator<Item = &'a Value>) -> Option<NumericSummary> {
    let mut numbers = Vec::new();
    let mut null_count = 0usize;
    for cell in cells {
        match cell.as_f64() {
            Some(number) => numbers.push(number),
            None => null_count += 1,
        }
    }
    if numbers.is_empty() {
        return None;
    }
    numbers.sort_by(|a, b| a.total_cmp(b));
    let count = numbers.len();
    let mean = numbers.iter().sum::<f64>() / count as f64;
    let median = if count % 2 == 0 {
        (numbers[count / 2 - 1] + numbers[count / 2]) / 2.0
    } else {
        numbers[count / 2]
    };
    let std = if count > 1 {
        let var = numbers.iter().map(|n| (n - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
        var.sqrt()
    } else {
        f64::NAN
    };
    Some(NumericSummary {
        min: numbers[0],
        max: numbers[count - 1],
        mean,
        median,
        std,
        count,
        null_count,
    })
}

/// Counts sorted by descending frequency, then ascending value.
fn value_counts(values: impl Iterator<Item = String>) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }
    let mut counts = counts.into_iter().collect::<Vec<_>>();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts
}
