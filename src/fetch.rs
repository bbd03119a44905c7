//! Retrieval of IRW tables, with the light clean-up every fetch applies.

use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{Source, TableName};
use crate::error::IrwError;
use crate::reshape::{Reshaped, Reshaper};
use crate::session::Session;
use crate::table::{Table, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub source: Source,
    /// Keep one row per (id, item[, wave]).
    pub dedup: bool,
    /// Return the response matrix instead of the long table.
    pub wide: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Fetched {
    Long(Table),
    Wide(Reshaped),
}

impl Fetched {
    pub fn to_table(&self) -> Table {
        match self {
            Fetched::Long(table) => table.clone(),
            Fetched::Wide(reshaped) => reshaped.matrix.to_table(),
        }
    }
}

#[derive(Debug)]
pub struct FetchFailure {
    pub name: String,
    pub error: IrwError,
}

/// Outcome of a multi-table fetch, in request order.
#[derive(Debug, Default)]
pub struct FetchBatch {
    pub tables: Vec<(String, Fetched)>,
    pub failures: Vec<FetchFailure>,
}

impl FetchBatch {
    pub fn get(&self, name: &str) -> Option<&Fetched> {
        self.tables
            .iter()
            .find(|(fetched, _)| fetched == name)
            .map(|(_, table)| table)
    }
}

/// Fetches one table, searching the source's datasets in order.
pub fn fetch(session: &Session, name: &str, options: &FetchOptions) -> Result<Fetched, IrwError> {
    let name: TableName = name.parse()?;
    let mut table = session.fetch_raw(options.source, name.as_str())?;
    coerce_responses(&mut table, name.as_str());
    if options.dedup {
        table = dedup(&table, name.as_str());
    }
    if !options.wide {
        return Ok(Fetched::Long(table));
    }
    let defaults = &session.config().reshape;
    let reshaped = Reshaper::new()
        .id_density_threshold(defaults.id_density_threshold)?
        .agg(defaults.agg)
        .wave_policy(defaults.wave_policy)
        .reshape(&table)?;
    Ok(Fetched::Wide(reshaped))
}

/// Fetches several tables; a failing name is recorded and the rest continue.
///
/// Authentication failures abort the whole batch.
pub fn fetch_many<S: AsRef<str>>(
    session: &Session,
    names: &[S],
    options: &FetchOptions,
) -> Result<FetchBatch, IrwError> {
    if names.is_empty() {
        return Err(IrwError::InvalidTableName("no table names given".to_string()));
    }
    let mut batch = FetchBatch::default();
    for name in names {
        let name = name.as_ref();
        match fetch(session, name, options) {
            Ok(fetched) => batch.tables.push((name.to_string(), fetched)),
            Err(err @ IrwError::Authentication(_)) => return Err(err),
            Err(error) => {
                match &error {
                    IrwError::NotFound(_) => {
                        warn!("table '{name}' does not exist in the IRW database")
                    }
                    other => warn!("error fetching '{name}': {other}"),
                }
                batch.failures.push(FetchFailure {
                    name: name.to_string(),
                    error,
                });
            }
        }
    }
    Ok(batch)
}

/// Replaces non-numeric `resp` cells with missing values and returns how many were replaced.
pub fn coerce_responses(table: &mut Table, name: &str) -> usize {
    let Some(idx) = table.column_index("resp") else {
        return 0;
    };
    let mut coerced = 0usize;
    table.map_column(idx, |value| match value {
        Value::Null | Value::Int(_) | Value::Float(_) => value.clone(),
        _ => {
            coerced += 1;
            Value::Null
        }
    });
    if coerced > 0 {
        warn!(
            "In dataset '{name}': 'resp' column contained non-numeric values that could not be coerced. Some NAs were introduced."
        );
    }
    coerced
}

/// Keeps the first row for each (id, item[, wave]) key.
///
/// Tables with a `date` column hold timestamped repeats and are left alone,
/// as are tables without `id` and `item`.
pub fn dedup(table: &Table, name: &str) -> Table {
    if table.has_column("date") {
        info!("deduplication skipped for '{name}': 'date' column detected (timestamped responses)");
        return table.clone();
    }
    let (Some(id), Some(item)) = (table.column_index("id"), table.column_index("item")) else {
        return table.clone();
    };
    let wave = table.column_index("wave");

    let mut seen = HashSet::new();
    let deduped = table.filter_rows(|row| {
        let key = (
            row[id].key(),
            row[item].key(),
            wave.map(|idx| row[idx].key()),
        );
        seen.insert(key)
    });
    let removed = table.len() - deduped.len();
    if removed > 0 {
        let group = if wave.is_some() { "(id, item, wave) group" } else { "(id, item) pair" };
        info!("deduplicated '{name}': kept the first response per {group}, dropped {removed} row(s)");
    } else {
        info!("deduplication not needed for '{name}': no duplicate responses found");
    }
    deduped
}

/// Saves a table as CSV, searching main, then sim, then comp.
///
/// Defaults to `./{name}.csv`.
pub fn download(
    session: &Session,
    name: &str,
    path: Option<&Utf8Path>,
    overwrite: bool,
) -> Result<Utf8PathBuf, IrwError> {
    let name: TableName = name.parse()?;
    let destination = path
        .map(Utf8Path::to_path_buf)
        .unwrap_or_else(|| Utf8PathBuf::from(format!("{name}.csv")));
    if destination.as_std_path().exists() && !overwrite {
        return Err(IrwError::FileExists(destination.into_std_path_buf()));
    }

    let platform = session.platform()?;
    for source in Source::ALL {
        for dataset in session.datasets(source) {
            match platform.download_table(dataset, name.as_str(), &destination, overwrite) {
                Ok(()) => {
                    info!("downloaded {} to {destination}", dataset.table_ref(name.as_str()));
                    return Ok(destination);
                }
                Err(IrwError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }
    }
    Err(IrwError::NotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long(rows: Vec<Vec<Value>>) -> Table {
        Table::from_rows(["id", "item", "resp"], rows).unwrap()
    }

    #[test]
    fn text_responses_become_missing() {
        let mut table = long(vec![
            vec![Value::Int(1), "a".into(), Value::Int(1)],
            vec![Value::Int(1), "b".into(), "skipped".into()],
            vec![Value::Int(2), "a".into(), Value::Null],
        ]);
        assert_eq!(coerce_responses(&mut table, "t"), 1);
        assert_eq!(table.get(1, "resp"), Some(&Value::Null));
        assert_eq!(table.get(0, "resp"), Some(&Value::Int(1)));
    }

    #[test]
    fn dedup_keeps_first_response() {
        let table = long(vec![
            vec![Value::Int(1), "a".into(), Value::Int(1)],
            vec![Value::Int(1), "a".into(), Value::Int(0)],
            vec![Value::Int(1), "b".into(), Value::Int(1)],
        ]);
        let deduped = dedup(&table, "t");
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped.get(0, "resp"), Some(&Value::Int(1)));
    }

    #[test]
    fn dedup_skips_timestamped_tables() {
        let table = Table::from_rows(
            ["id", "item", "resp", "date"],
            vec![
                vec![Value::Int(1), "a".into(), Value::Int(1), "2020-01-01".into()],
                vec![Value::Int(1), "a".into(), Value::Int(0), "2020-02-01".into()],
            ],
        )
        .unwrap();
        assert_eq!(dedup(&table, "t").len(), 2);
    }
}
