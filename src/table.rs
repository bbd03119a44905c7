use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::IrwError;

/// A single cell of a [`Table`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Parses a raw CSV cell, treating blank, `NA`, `NaN` and `NULL` as missing.
    pub fn parse_cell(raw: &str) -> Self {
        let trimmed = raw.trim();
        if is_missing_marker(trimmed) {
            return Value::Null;
        }
        match trimmed {
            "true" | "TRUE" | "True" => return Value::Bool(true),
            "false" | "FALSE" | "False" => return Value::Bool(false),
            _ => {}
        }
        if let Ok(value) = trimmed.parse::<i64>() {
            return Value::Int(value);
        }
        if let Ok(value) = trimmed.parse::<f64>() {
            if value.is_finite() {
                return Value::Float(value);
            }
        }
        Value::Text(raw.to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the cell; text is parsed when it looks like a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Null => None,
            Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            Value::Int(value) => Some(*value as f64),
            Value::Float(value) if value.is_nan() => None,
            Value::Float(value) => Some(*value),
            Value::Text(text) => text.trim().parse::<f64>().ok().filter(|v| !v.is_nan()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(flag) => Some(*flag),
            Value::Int(value) => Some(*value != 0),
            Value::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Builds a numeric cell, keeping whole numbers as integers.
    pub fn from_f64(value: f64) -> Self {
        if value.is_nan() {
            Value::Null
        } else if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
            Value::Int(value as i64)
        } else {
            Value::Float(value)
        }
    }

    /// Grouping key under which `Int(1)` and `Float(1.0)` coincide.
    pub fn key(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(flag) => format!("b:{flag}"),
            Value::Int(value) => format!("n:{value}"),
            Value::Float(value) if value.fract() == 0.0 && value.abs() < i64::MAX as f64 => {
                format!("n:{}", *value as i64)
            }
            Value::Float(value) => format!("n:{value}"),
            Value::Text(text) => format!("s:{text}"),
        }
    }

    fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(flag) => JsonValue::Bool(*flag),
            Value::Int(value) => JsonValue::from(*value),
            Value::Float(value) => serde_json::Number::from_f64(*value)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Text(text) => JsonValue::String(text.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(flag) => write!(f, "{flag}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Text(text) => write!(f, "{text}"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

pub fn is_missing_marker(raw: &str) -> bool {
    let upper = raw.trim().to_ascii_uppercase();
    matches!(upper.as_str(), "" | "NA" | "NAN" | "NULL")
}

/// Rows of dynamically typed cells under named columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn from_rows<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        rows: Vec<Vec<Value>>,
    ) -> Result<Self, IrwError> {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), IrwError> {
        if row.len() != self.columns.len() {
            return Err(IrwError::Schema(format!(
                "row {} has {} cells, expected {}",
                self.rows.len(),
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|cells| cells.get(idx))
    }

    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &Value> + '_ {
        self.rows.iter().map(move |row| &row[idx])
    }

    pub fn distinct_count(&self, idx: usize) -> usize {
        self.column_values(idx)
            .filter(|value| !value.is_null())
            .map(Value::key)
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn filter_rows<F>(&self, mut keep: F) -> Table
    where
        F: FnMut(&[Value]) -> bool,
    {
        Table {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| keep(row))
                .cloned()
                .collect(),
        }
    }

    pub fn map_column<F>(&mut self, idx: usize, mut f: F)
    where
        F: FnMut(&Value) -> Value,
    {
        for row in &mut self.rows {
            row[idx] = f(&row[idx]);
        }
    }

    pub fn rename_column(&mut self, from: &str, to: &str) {
        if let Some(idx) = self.column_index(from) {
            self.columns[idx] = to.to_string();
        }
    }

    pub fn push_column(&mut self, name: &str, values: Vec<Value>) -> Result<(), IrwError> {
        if values.len() != self.rows.len() {
            return Err(IrwError::Schema(format!(
                "column '{name}' has {} cells, expected {}",
                values.len(),
                self.rows.len()
            )));
        }
        self.columns.push(name.to_string());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(())
    }

    /// Keeps only the named columns, in the given order.
    pub fn select(&self, names: &[&str]) -> Result<Table, IrwError> {
        let indices = names
            .iter()
            .map(|name| {
                self.column_index(name)
                    .ok_or_else(|| IrwError::Schema(format!("missing column '{name}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Table {
            columns: names.iter().map(|name| name.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&idx| row[idx].clone()).collect())
                .collect(),
        })
    }

    /// Left join on case-insensitive text keys; clashing right-hand columns get a `_y` suffix.
    pub fn left_join(&self, left_key: &str, right: &Table, right_key: &str) -> Table {
        let Some(left_idx) = self.column_index(left_key) else {
            return self.clone();
        };
        let Some(right_idx) = right.column_index(right_key) else {
            return self.clone();
        };
        let right_columns = right
            .columns
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != right_idx)
            .map(|(idx, name)| {
                let name = if self.has_column(name) {
                    format!("{name}_y")
                } else {
                    name.clone()
                };
                (idx, name)
            })
            .collect::<Vec<_>>();

        let mut lookup = std::collections::HashMap::new();
        for (row_idx, row) in right.rows.iter().enumerate() {
            lookup
                .entry(row[right_idx].to_string().to_lowercase())
                .or_insert(row_idx);
        }

        let mut columns = self.columns.clone();
        columns.extend(right_columns.iter().map(|(_, name)| name.clone()));
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut out = row.clone();
                let matched = lookup.get(&row[left_idx].to_string().to_lowercase());
                for (idx, _) in &right_columns {
                    out.push(
                        matched
                            .map(|&m| right.rows[m][*idx].clone())
                            .unwrap_or(Value::Null),
                    );
                }
                out
            })
            .collect();
        Table { columns, rows }
    }

    /// Stable sort by the text form of one column.
    pub fn sort_by_column(&mut self, name: &str) {
        if let Some(idx) = self.column_index(name) {
            self.rows.sort_by_key(|row| row[idx].to_string());
        }
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, IrwError> {
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers = reader
            .headers()
            .map_err(|err| IrwError::InvalidCsv(err.to_string()))?
            .iter()
            .map(|header| header.trim().trim_matches('\u{feff}').to_string())
            .collect::<Vec<_>>();
        let mut table = Table::new(headers);
        for record in reader.records() {
            let record = record.map_err(|err| IrwError::InvalidCsv(err.to_string()))?;
            table.push_row(record.iter().map(Value::parse_cell).collect())?;
        }
        Ok(table)
    }

    pub fn from_csv_path(path: &Path) -> Result<Self, IrwError> {
        let file = File::open(path)
            .map_err(|err| IrwError::Filesystem(format!("open {}: {err}", path.display())))?;
        Self::from_csv_reader(file)
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), IrwError> {
        let mut writer = WriterBuilder::new().from_writer(writer);
        writer
            .write_record(&self.columns)
            .map_err(|err| IrwError::InvalidCsv(err.to_string()))?;
        for row in &self.rows {
            writer
                .write_record(row.iter().map(|value| value.to_string()))
                .map_err(|err| IrwError::InvalidCsv(err.to_string()))?;
        }
        writer
            .flush()
            .map_err(|err| IrwError::Filesystem(err.to_string()))
    }

    /// One JSON object per row.
    pub fn to_json_records(&self) -> JsonValue {
        JsonValue::Array(
            self.rows
                .iter()
                .map(|row| {
                    let mut object = Map::new();
                    for (name, value) in self.columns.iter().zip(row) {
                        object.insert(name.clone(), value.to_json());
                    }
                    JsonValue::Object(object)
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cells() {
        assert_eq!(Value::parse_cell(" 3 "), Value::Int(3));
        assert_eq!(Value::parse_cell("0.5"), Value::Float(0.5));
        assert_eq!(Value::parse_cell("NA"), Value::Null);
        assert_eq!(Value::parse_cell("nan"), Value::Null);
        assert_eq!(Value::parse_cell("TRUE"), Value::Bool(true));
        assert_eq!(Value::parse_cell("q1"), Value::Text("q1".to_string()));
    }

    #[test]
    fn numeric_keys_coincide() {
        assert_eq!(Value::Int(1).key(), Value::Float(1.0).key());
        assert_ne!(Value::Int(1).key(), Value::Text("1".to_string()).key());
    }

    #[test]
    fn csv_roundtrip_preserves_cells() {
        let csv = "id,item,resp\n1,q1,1\n2,q2,NA\n";
        let table = Table::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.columns(), &["id", "item", "resp"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1, "resp"), Some(&Value::Null));

        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "id,item,resp\n1,q1,1\n2,q2,\n");
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let mut table = Table::new(["a", "b"]);
        assert!(table.push_row(vec![Value::Int(1)]).is_err());
    }

    #[test]
    fn left_join_matches_case_insensitively() {
        let left = Table::from_rows(["name"], vec![vec!["Alpha".into()], vec!["beta".into()]])
            .unwrap();
        let right = Table::from_rows(
            ["table", "n_items"],
            vec![vec!["alpha".into(), Value::Int(10)]],
        )
        .unwrap();
        let joined = left.left_join("name", &right, "table");
        assert_eq!(joined.columns(), &["name", "n_items"]);
        assert_eq!(joined.get(0, "n_items"), Some(&Value::Int(10)));
        assert_eq!(joined.get(1, "n_items"), Some(&Value::Null));
    }
}
