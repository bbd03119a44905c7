//! Table listings, per-table metadata and database summaries.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::info;

use crate::bibtex::{self, BibtexReport};
use crate::domain::Source;
use crate::error::IrwError;
use crate::filter::{self, FilterDescription, FilterSet};
use crate::itemtext;
use crate::session::Session;
use crate::table::{Table, Value};

const DERIVED_METADATA_KEY: &str = "derived:table_info";
const DERIVED_LISTING_KEY: &str = "derived:list_tables";

const EXCLUDED_COLUMNS: &[&str] = &["name_lower", "table", "numRows", "variableCount"];

const RENAMES: &[(&str, &str)] = &[
    ("child_age__for_child_focused_studies_", "child_age"),
    ("primary_language_s_", "language"),
    ("dataset", "source_redivis_dataset"),
    ("Description", "description"),
    ("Reference_x", "reference"),
    ("Reference", "reference"),
    ("DOI__for_paper_", "doi"),
    ("URL__for_data_", "url"),
    ("Derived_License", "license"),
    ("BibTex", "bibtex"),
];

const STATS_COLUMNS: &[&str] = &[
    "n_responses",
    "n_participants",
    "n_items",
    "responses_per_participant",
    "responses_per_item",
    "density",
];

const TAG_COLUMNS: &[&str] = &[
    "construct_type",
    "construct_name",
    "age_range",
    "child_age",
    "sample",
    "item_format",
    "measurement_tool",
    "n_categories",
    "variables",
    "language",
    "source_redivis_dataset",
    "has_item_text",
];

/// `name`, `numRows` and `variableCount` for every table of `source`, sorted by name.
///
/// Datasets that fail to list are skipped.
pub fn list_tables(session: &Session, source: Source) -> Result<Table, IrwError> {
    let mut out = Table::new(["name", "numRows", "variableCount"]);
    for dataset in session.datasets(source) {
        let listing = match session.dataset_tables(dataset) {
            Ok(listing) => listing,
            Err(err @ IrwError::Authentication(_)) => return Err(err),
            Err(err) => {
                info!("skipping {dataset}: {err}");
                continue;
            }
        };
        for entry in listing {
            out.push_row(vec![
                Value::from(entry.name),
                entry.num_rows.map_or(Value::Null, |n| Value::Int(n as i64)),
                entry
                    .variable_count
                    .map_or(Value::Null, |n| Value::Int(n as i64)),
            ])?;
        }
    }
    out.sort_by_column("name");
    Ok(out)
}

/// Main-source listing joined with statistics, tags, bibliography and item-text availability.
///
/// Falls back to a bare name listing when the metadata cannot be assembled.
pub fn list_tables_enriched(session: &Session) -> Result<Table, IrwError> {
    if let Some(cached) = session.cached_derived(DERIVED_LISTING_KEY) {
        return Ok(cached);
    }
    let basic = list_tables(session, Source::Main)?;
    let base = basic.select(&["name"])?;
    match enrich(session, &base) {
        Ok(enriched) => {
            session.store_derived(DERIVED_LISTING_KEY, enriched.clone());
            Ok(enriched)
        }
        Err(err @ IrwError::Authentication(_)) => Err(err),
        Err(err) => {
            info!("metadata merge failed; returning basic listing: {err}");
            Ok(base)
        }
    }
}

fn enrich(session: &Session, base: &Table) -> Result<Table, IrwError> {
    let metadata = table_metadata(session)?;
    if metadata.is_empty() {
        return Ok(base.clone());
    }
    let merged = base.left_join("name", &metadata, "table");

    let keep = merged
        .columns()
        .iter()
        .map(String::as_str)
        .filter(|column| !EXCLUDED_COLUMNS.contains(column))
        .collect::<Vec<_>>();
    let mut result = merged.select(&keep)?;

    let mut seen = HashSet::new();
    let name_idx = result
        .column_index("name")
        .ok_or_else(|| IrwError::Schema("listing lost its name column".to_string()))?;
    result = result.filter_rows(|row| seen.insert(row[name_idx].to_string()));

    for (from, to) in RENAMES {
        if !result.has_column(to) {
            result.rename_column(from, to);
        }
    }

    let available = itemtext::available_tables(session).unwrap_or_else(|err| {
        info!("item text availability unknown: {err}");
        HashSet::new()
    });
    let flags = result
        .column_values(name_idx)
        .map(|name| Value::Bool(available.contains(&name.to_string().to_lowercase())))
        .collect();
    result.push_column("has_item_text", flags)?;

    order_columns(&result)
}

/// Groups columns as name, statistics, tags, then bibliography and everything else.
fn order_columns(table: &Table) -> Result<Table, IrwError> {
    let columns = table.columns();
    let mut ordered: Vec<&str> = columns
        .iter()
        .map(String::as_str)
        .filter(|c| *c == "name")
        .collect();
    ordered.extend(
        columns
            .iter()
            .map(String::as_str)
            .filter(|c| STATS_COLUMNS.contains(c)),
    );
    ordered.extend(
        columns
            .iter()
            .map(String::as_str)
            .filter(|c| TAG_COLUMNS.contains(c)),
    );
    ordered.extend(columns.iter().map(String::as_str).filter(|c| {
        *c != "name" && !STATS_COLUMNS.contains(c) && !TAG_COLUMNS.contains(c)
    }));
    table.select(&ordered)
}

/// Statistics joined with tags and bibliography, keyed by the raw `table` column.
///
/// Tags and bibliography rows are restricted to tables that exist in the main source.
pub fn table_metadata(session: &Session) -> Result<Table, IrwError> {
    if let Some(cached) = session.cached_derived(DERIVED_METADATA_KEY) {
        return Ok(cached);
    }
    let meta = &session.config().meta;
    let stats = session.meta_table(&meta.metadata)?;
    let existing = session.existing_tables(Source::Main)?;
    let tags = restrict_to(&session.meta_table(&meta.tags)?, &existing);
    let biblio = restrict_to(&session.meta_table(&meta.biblio)?, &existing);

    let mut combined = stats.left_join("table", &tags, "table");
    if !biblio.is_empty() {
        combined = combined.left_join("table", &biblio, "table");
    }
    session.store_derived(DERIVED_METADATA_KEY, combined.clone());
    Ok(combined)
}

fn restrict_to(table: &Table, existing: &HashSet<String>) -> Table {
    match table.column_index("table") {
        Some(idx) => {
            table.filter_rows(|row| existing.contains(&row[idx].to_string().to_lowercase()))
        }
        None => table.clone(),
    }
}

/// Bibliography rows for tables in the main source.
pub fn biblio_table(session: &Session) -> Result<Table, IrwError> {
    let existing = session.existing_tables(Source::Main)?;
    Ok(restrict_to(
        &session.meta_table(&session.config().meta.biblio)?,
        &existing,
    ))
}

/// Names of main-source tables matching every criterion in `filters`.
pub fn filter_tables(session: &Session, filters: &FilterSet) -> Result<Vec<String>, IrwError> {
    let listing = list_tables_enriched(session)?;
    if listing.is_empty() || !listing.has_column("name") {
        return Ok(Vec::new());
    }
    filters.apply(&listing)
}

pub fn describe_filter(session: &Session, name: &str) -> Result<FilterDescription, IrwError> {
    filter::lookup(name)?;
    let listing = list_tables_enriched(session)?;
    filter::describe_filter(name, &listing)
}

/// Citations for `names`, keyed by table name.
pub fn save_bibtex<S: AsRef<str>>(
    session: &Session,
    names: &[S],
) -> Result<BibtexReport, IrwError> {
    let existing = session.existing_tables(Source::Main)?;
    let biblio = biblio_table(session)?;
    let lookup = session.citation_lookup()?;
    let report = bibtex::assemble(names, &existing, &biblio, lookup);
    if !report.not_found.is_empty() {
        info!("not IRW tables: {}", report.not_found.join(", "));
    }
    if !report.missing.is_empty() {
        info!("no citation available for: {}", report.missing.join(", "));
    }
    Ok(report)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableStats {
    pub n_responses: Option<f64>,
    pub n_categories: Option<f64>,
    pub n_participants: Option<f64>,
    pub n_items: Option<f64>,
    pub responses_per_participant: Option<f64>,
    pub responses_per_item: Option<f64>,
    pub density: Option<f64>,
    pub variables: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableTags {
    pub age_range: Option<String>,
    pub child_age: Option<String>,
    pub sample: Option<String>,
    pub construct_type: Option<String>,
    pub construct_name: Option<String>,
    pub measurement_tool: Option<String>,
    pub item_format: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableBiblio {
    pub description: Option<String>,
    pub reference: Option<String>,
    pub doi: Option<String>,
    pub url: Option<String>,
    pub license: Option<String>,
    pub bibtex: Option<String>,
}

/// Everything known about one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub stats: TableStats,
    pub tags: TableTags,
    pub biblio: TableBiblio,
    pub item_text: bool,
    pub dataset: Option<String>,
}

/// Metadata for `name` (case-insensitive), or `None` when the table has none.
pub fn table_info(session: &Session, name: &str) -> Result<Option<TableInfo>, IrwError> {
    let metadata = table_metadata(session)?;
    let Some(idx) = metadata.column_index("table") else {
        return Ok(None);
    };
    let wanted = name.to_lowercase();
    let Some(row) = metadata
        .rows()
        .iter()
        .position(|row| row[idx].to_string().to_lowercase() == wanted)
    else {
        return Ok(None);
    };

    let number = |column: &str| metadata.get(row, column).and_then(Value::as_f64);
    let text = |column: &str| {
        metadata
            .get(row, column)
            .filter(|value| !value.is_null())
            .map(|value| value.to_string())
            .filter(|value| !value.trim().is_empty())
    };
    let item_text = itemtext::available_tables(session)
        .map(|available| available.contains(&wanted))
        .unwrap_or(false);

    Ok(Some(TableInfo {
        name: name.to_string(),
        stats: TableStats {
            n_responses: number("n_responses"),
            n_categories: number("n_categories"),
            n_participants: number("n_participants"),
            n_items: number("n_items"),
            responses_per_participant: number("responses_per_participant"),
            responses_per_item: number("responses_per_item"),
            density: number("density"),
            variables: text("variables"),
        },
        tags: TableTags {
            age_range: text("age_range"),
            child_age: text("child_age__for_child_focused_studies_"),
            sample: text("sample"),
            construct_type: text("construct_type"),
            construct_name: text("construct_name"),
            measurement_tool: text("measurement_tool"),
            item_format: text("item_format"),
            language: text("primary_language_s_"),
        },
        biblio: TableBiblio {
            description: text("Description"),
            reference: text("Reference_x").or_else(|| text("Reference")),
            doi: text("DOI__for_paper_"),
            url: text("URL__for_data_"),
            license: text("Derived_License"),
            bibtex: text("BibTex"),
        },
        item_text,
        dataset: text("dataset"),
    }))
}

const RULE_WIDTH: usize = 60;

impl fmt::Display for TableInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(RULE_WIDTH);
        let thin = "-".repeat(RULE_WIDTH);
        writeln!(f, "{rule}")?;
        writeln!(f, "IRW Table: {}", self.name)?;
        writeln!(f, "{rule}")?;

        if let Some(description) = &self.biblio.description {
            writeln!(f, "\nDescription:\n{thin}")?;
            for line in wrap(description, RULE_WIDTH - 4) {
                writeln!(f, "  {line}")?;
            }
        }

        let stats = &self.stats;
        writeln!(f, "\nSummary Statistics:\n{thin}")?;
        writeln!(f, "  Responses: {}", or_na(stats.n_responses.map(group_thousands)))?;
        writeln!(f, "  Participants: {}", or_na(stats.n_participants.map(group_thousands)))?;
        writeln!(f, "  Items: {}", or_na(stats.n_items.map(group_thousands)))?;
        let categories = stats.n_categories.map(|n| Value::from_f64(n).to_string());
        writeln!(f, "  Categories: {}", or_na(categories))?;
        writeln!(f, "  Density: {}", or_na(stats.density.map(|d| format!("{d:.3}"))))?;
        writeln!(
            f,
            "  Responses per participant: {}",
            or_na(stats.responses_per_participant.map(|r| format!("{r:.2}")))
        )?;
        writeln!(
            f,
            "  Responses per item: {}",
            or_na(stats.responses_per_item.map(|r| format!("{r:.2}")))
        )?;
        writeln!(f, "  Variables: {}", or_na(stats.variables.clone()))?;

        let tags = &self.tags;
        writeln!(f, "\nMeasurement Information:\n{thin}")?;
        writeln!(f, "  Construct Type: {}", or_na(tags.construct_type.clone()))?;
        writeln!(f, "  Construct Name: {}", or_na(tags.construct_name.clone()))?;
        writeln!(f, "  Sample: {}", or_na(tags.sample.clone()))?;
        writeln!(f, "  Age Range: {}", or_na(tags.age_range.clone()))?;
        writeln!(f, "  Child Age: {}", or_na(tags.child_age.clone()))?;
        writeln!(f, "  Measurement Tool: {}", or_na(tags.measurement_tool.clone()))?;
        writeln!(f, "  Item Format: {}", or_na(tags.item_format.clone()))?;
        writeln!(f, "  Language: {}", or_na(tags.language.clone()))?;

        let biblio = &self.biblio;
        writeln!(f, "\nBibliography:\n{thin}")?;
        writeln!(f, "  Reference: {}", or_na(biblio.reference.clone()))?;
        writeln!(f, "  DOI: {}", or_na(biblio.doi.clone()))?;
        writeln!(f, "  URL: {}", or_na(biblio.url.clone()))?;
        writeln!(f, "  License: {}", or_na(biblio.license.clone()))?;
        if biblio.bibtex.is_some() {
            writeln!(f, "  BibTeX: Available (use `irw bibtex` to save)")?;
        } else {
            writeln!(f, "  BibTeX: N/A")?;
        }

        writeln!(f, "\nAdditional Information:\n{thin}")?;
        if self.item_text {
            writeln!(f, "  Item-level text: Available (use `irw itemtext` to retrieve)")?;
        } else {
            writeln!(f, "  Item-level text: Not available")?;
        }
        writeln!(f, "  Source Dataset: {}", or_na(self.dataset.clone()))?;
        write!(f, "\n{rule}")
    }
}

fn or_na(value: Option<String>) -> String {
    value.unwrap_or_else(|| "N/A".to_string())
}

fn group_thousands(value: f64) -> String {
    if value.fract() != 0.0 || !value.is_finite() {
        return value.to_string();
    }
    let digits = format!("{}", value.abs() as u64);
    let mut out = String::new();
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if value < 0.0 {
        out.insert(0, '-');
    }
    out
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            if !current.is_empty() && current.len() + 1 + word.len() > width {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        lines.push(current);
    }
    lines
}

/// Totals across the datasets of one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseInfo {
    pub title: String,
    pub table_count: u64,
    pub total_bytes: u64,
    pub earliest_created: Option<DateTime<Local>>,
    pub latest_updated: Option<DateTime<Local>>,
}

impl DatabaseInfo {
    pub fn size_gb(&self) -> f64 {
        self.total_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

pub fn database_info(session: &Session, source: Source) -> Result<DatabaseInfo, IrwError> {
    let mut info = DatabaseInfo {
        title: source.title().to_string(),
        table_count: 0,
        total_bytes: 0,
        earliest_created: None,
        latest_updated: None,
    };
    for dataset in session.datasets(source) {
        let props = session.dataset_properties(dataset)?;
        info.table_count += props.table_count;
        info.total_bytes += props.total_num_bytes;
        let created = props.created_at.and_then(to_local);
        let updated = props.updated_at.and_then(to_local);
        info.earliest_created = match (info.earliest_created, created) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        info.latest_updated = match (info.latest_updated, updated) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
    Ok(info)
}

fn to_local(millis: i64) -> Option<DateTime<Local>> {
    DateTime::from_timestamp_millis(millis).map(|utc| utc.with_timezone(&Local))
}

impl fmt::Display for DatabaseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "-".repeat(50);
        let stamp = |value: Option<DateTime<Local>>| {
            value.map_or_else(
                || "N/A".to_string(),
                |ts| ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            )
        };
        writeln!(f, "{rule}\n{}\n{rule}", self.title)?;
        writeln!(f, "{:<25} {}", "Total Table Count:", self.table_count)?;
        writeln!(f, "{:<25} {:.2} GB", "Total Data Size:", self.size_gb())?;
        writeln!(f, "{:<25} {}", "Earliest Created At:", stamp(self.earliest_created))?;
        writeln!(f, "{:<25} {}", "Latest Updated At:", stamp(self.latest_updated))?;
        writeln!(f, "{rule}")?;
        writeln!(f, "{:<25} https://datapages.github.io/irw/", "Data Website:")?;
        writeln!(
            f,
            "{:<25} Tables harmonized as per https://datapages.github.io/irw/standard.html",
            "Methodology:"
        )?;
        writeln!(
            f,
            "{:<25} License & citation info: https://datapages.github.io/irw/docs.html",
            "Usage Information:"
        )?;
        write!(f, "{rule}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thousands_are_grouped() {
        assert_eq!(group_thousands(1234567.0), "1,234,567");
        assert_eq!(group_thousands(999.0), "999");
        assert_eq!(group_thousands(12.5), "12.5");
    }

    #[test]
    fn long_descriptions_wrap() {
        let lines = wrap("one two three four five", 9);
        assert_eq!(lines, vec!["one two", "three", "four five"]);
    }

    #[test]
    fn columns_are_grouped() {
        let table = Table::new(["doi", "construct_type", "name", "density"]);
        let ordered = order_columns(&table).unwrap();
        assert_eq!(ordered.columns(), ["name", "density", "construct_type", "doi"]);
    }
}
