//! Long-format to wide response-matrix conversion.
//!
//! IRW tables are stored long: one row per (respondent, item[, wave])
//! observation with the standard columns `id`, `item` and `resp`. Most
//! psychometric tooling wants the wide matrix instead, one row per respondent
//! and one column per item. [`Reshaper`] performs that pivot and reports what
//! it had to decide along the way in [`ReshapeDiagnostics`].

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{AggMethod, WavePolicy};
use crate::error::IrwError;
use crate::table::{Table, Value};

pub const DEFAULT_ID_DENSITY_THRESHOLD: f64 = 0.1;

/// Column names the reshaper looks for before falling back to inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnNames {
    pub id: String,
    pub item: String,
    pub resp: String,
    pub wave: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            item: "item".to_string(),
            resp: "resp".to_string(),
            wave: "wave".to_string(),
        }
    }
}

/// Column roles as resolved against a concrete table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedColumns {
    pub id: String,
    pub item: String,
    pub resp: String,
    pub wave: Option<String>,
    pub inferred: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReshapeDiagnostics {
    pub columns: Option<ResolvedColumns>,
    pub selected_wave: Option<Value>,
    pub rows_dropped_by_wave: usize,
    pub duplicate_pairs: usize,
    pub duplicate_responses: usize,
    pub coerced_to_missing: usize,
    pub raters: Option<usize>,
    pub removed_respondents: Vec<Value>,
    pub notes: Vec<String>,
}

impl ReshapeDiagnostics {
    fn note(&mut self, message: String) {
        info!("{message}");
        self.notes.push(message);
    }
}

/// Respondents × items. Missing combinations hold [`Value::Null`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WideMatrix {
    id_column: String,
    respondents: Vec<Value>,
    items: Vec<String>,
    cells: Vec<Vec<Value>>,
}

impl WideMatrix {
    pub fn new(
        id_column: &str,
        respondents: Vec<Value>,
        items: Vec<String>,
        cells: Vec<Vec<Value>>,
    ) -> Result<Self, IrwError> {
        if id_column.is_empty() || id_column == "item" || id_column == "resp" {
            return Err(IrwError::Schema(format!(
                "'{id_column}' cannot name the respondent column"
            )));
        }
        if respondents.iter().any(Value::is_null) {
            return Err(IrwError::Schema(
                "matrix respondents must not be missing".to_string(),
            ));
        }
        if cells.len() != respondents.len() || cells.iter().any(|row| row.len() != items.len()) {
            return Err(IrwError::Schema(format!(
                "matrix cells do not match {} respondents x {} items",
                respondents.len(),
                items.len()
            )));
        }
        let distinct_respondents = respondents.iter().map(Value::key).collect::<HashSet<_>>();
        let distinct_items = items.iter().collect::<HashSet<_>>();
        if distinct_respondents.len() != respondents.len() || distinct_items.len() != items.len()
        {
            return Err(IrwError::Schema(
                "matrix respondents and items must be unique".to_string(),
            ));
        }
        Ok(Self {
            id_column: id_column.to_string(),
            respondents,
            items,
            cells,
        })
    }

    fn empty(id_column: &str) -> Self {
        Self {
            id_column: id_column.to_string(),
            respondents: Vec::new(),
            items: Vec::new(),
            cells: Vec::new(),
        }
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn respondents(&self) -> &[Value] {
        &self.respondents
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn cells(&self) -> &[Vec<Value>] {
        &self.cells
    }

    /// (respondents, items)
    pub fn shape(&self) -> (usize, usize) {
        (self.respondents.len(), self.items.len())
    }

    pub fn is_empty(&self) -> bool {
        self.respondents.is_empty()
    }

    pub fn get(&self, respondent: &Value, item: &str) -> Option<&Value> {
        let key = respondent.key();
        let row = self.respondents.iter().position(|r| r.key() == key)?;
        let col = self.items.iter().position(|i| i == item)?;
        Some(&self.cells[row][col])
    }

    /// The matrix as a table: the id column followed by one column per item.
    pub fn to_table(&self) -> Table {
        let mut columns = vec![self.id_column.clone()];
        columns.extend(self.items.iter().cloned());
        let rows = self
            .respondents
            .iter()
            .zip(&self.cells)
            .map(|(respondent, cells)| {
                let mut row = Vec::with_capacity(cells.len() + 1);
                row.push(respondent.clone());
                row.extend(cells.iter().cloned());
                row
            })
            .collect();
        Table::from_rows(columns, rows).unwrap_or_default()
    }

    /// Back to long format, one row per cell. The first column keeps
    /// [`WideMatrix::id_column`] as its name.
    pub fn to_long(&self) -> Table {
        resp2long(self)
    }

    /// Inverse of [`WideMatrix::to_long`] for a long table whose respondent
    /// column is `id_column`.
    pub fn from_long(table: &Table, id_column: &str) -> Result<Self, IrwError> {
        let columns = ColumnNames {
            id: id_column.to_string(),
            ..ColumnNames::default()
        };
        Ok(Reshaper::new().columns(columns).reshape(table)?.matrix)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reshaped {
    pub matrix: WideMatrix,
    pub diagnostics: ReshapeDiagnostics,
}

/// Configurable long-to-wide pivot.
#[derive(Debug, Clone)]
pub struct Reshaper {
    columns: ColumnNames,
    wave: Option<Value>,
    wave_policy: WavePolicy,
    id_density_threshold: f64,
    agg: AggMethod,
    min_response_density: Option<f64>,
}

impl Default for Reshaper {
    fn default() -> Self {
        Self {
            columns: ColumnNames::default(),
            wave: None,
            wave_policy: WavePolicy::default(),
            id_density_threshold: DEFAULT_ID_DENSITY_THRESHOLD,
            agg: AggMethod::default(),
            min_response_density: None,
        }
    }
}

impl Reshaper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns(mut self, columns: ColumnNames) -> Self {
        self.columns = columns;
        self
    }

    pub fn wave(mut self, wave: Option<Value>) -> Self {
        self.wave = wave;
        self
    }

    pub fn wave_policy(mut self, policy: WavePolicy) -> Self {
        self.wave_policy = policy;
        self
    }

    pub fn id_density_threshold(mut self, threshold: f64) -> Result<Self, IrwError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(IrwError::Schema(format!(
                "id_density_threshold must lie in [0, 1], got {threshold}"
            )));
        }
        self.id_density_threshold = threshold;
        Ok(self)
    }

    pub fn agg(mut self, agg: AggMethod) -> Self {
        self.agg = agg;
        self
    }

    pub fn agg_name(self, name: &str) -> Result<Self, IrwError> {
        Ok(self.agg(name.parse()?))
    }

    /// Drops respondents who answered fewer than this share of the items.
    pub fn min_response_density(mut self, density: Option<f64>) -> Self {
        self.min_response_density = density;
        self
    }

    pub fn reshape(&self, table: &Table) -> Result<Reshaped, IrwError> {
        let mut diagnostics = ReshapeDiagnostics::default();

        if table.is_empty() {
            warn!("long2resp received an empty table; returning an empty matrix");
            diagnostics
                .notes
                .push("input table is empty; returning an empty matrix".to_string());
            return Ok(Reshaped {
                matrix: WideMatrix::empty(&self.columns.id),
                diagnostics,
            });
        }

        let resolved = self.resolve_columns(table)?;
        if resolved.inferred {
            diagnostics.note(format!(
                "inferred columns: id='{}', item='{}', resp='{}'",
                resolved.id, resolved.item, resolved.resp
            ));
        }
        let id_idx = column(table, &resolved.id)?;
        let item_idx = column(table, &resolved.item)?;
        let resp_idx = column(table, &resolved.resp)?;
        let wave_idx = resolved.wave.as_deref().and_then(|w| table.column_index(w));

        if let Some(rater_idx) = table.column_index("rater") {
            let raters = table.distinct_count(rater_idx);
            diagnostics.raters = Some(raters);
            diagnostics.note(format!(
                "dataset contains 'rater' information with {raters} unique raters"
            ));
        }

        let mut rows = table.rows().iter().map(Vec::as_slice).collect::<Vec<_>>();
        match wave_idx {
            Some(wave_idx) => {
                rows = self.select_wave(rows, wave_idx, &mut diagnostics)?;
            }
            None if self.wave.is_some() => {
                diagnostics.note("no wave column present; wave selector ignored".to_string());
            }
            None => {}
        }

        let before = rows.len();
        rows.retain(|row| !row[id_idx].is_null() && !row[item_idx].is_null());
        let unkeyed = before - rows.len();
        if unkeyed > 0 {
            diagnostics.note(format!("{unkeyed} rows without an id or item were dropped"));
        }

        if let Some(threshold) = self.min_response_density {
            rows = filter_sparse_respondents(
                rows,
                id_idx,
                item_idx,
                resp_idx,
                threshold,
                &mut diagnostics,
            );
        }

        let matrix = self.pivot(&rows, &resolved.id, id_idx, item_idx, resp_idx, &mut diagnostics);
        diagnostics.columns = Some(resolved);
        Ok(Reshaped {
            matrix,
            diagnostics,
        })
    }

    fn resolve_columns(&self, table: &Table) -> Result<ResolvedColumns, IrwError> {
        let names = &self.columns;
        let reserved = [&names.id, &names.item, &names.resp, &names.wave];
        if table.has_column("date") && !reserved.iter().any(|name| name.as_str() == "date") {
            return Err(IrwError::Schema(
                "timestamped responses ('date' column) are not supported".to_string(),
            ));
        }

        let wave = table.has_column(&names.wave).then(|| names.wave.clone());
        let mut id = table.has_column(&names.id).then(|| names.id.clone());
        let mut item = table.has_column(&names.item).then(|| names.item.clone());
        let mut resp = table.has_column(&names.resp).then(|| names.resp.clone());
        if let (Some(id), Some(item), Some(resp)) = (&id, &item, &resp) {
            return Ok(ResolvedColumns {
                id: id.clone(),
                item: item.clone(),
                resp: resp.clone(),
                wave,
                inferred: false,
            });
        }

        let taken = [&id, &item, &resp, &wave]
            .into_iter()
            .flatten()
            .cloned()
            .collect::<HashSet<_>>();
        let rows = table.len() as f64;
        let mut identifier_like = Vec::new();
        let mut response_bearing = Vec::new();
        for (idx, name) in table.columns().iter().enumerate() {
            if taken.contains(name) {
                continue;
            }
            let distinct = table.distinct_count(idx);
            let ratio = distinct as f64 / rows;
            if ratio < self.id_density_threshold {
                identifier_like.push((name.clone(), distinct));
            } else {
                response_bearing.push(name.clone());
            }
        }
        // Respondents outnumber items in any usable response table.
        identifier_like.sort_by(|a, b| b.1.cmp(&a.1));

        if resp.is_none() {
            if response_bearing.len() != 1 {
                return Err(IrwError::Schema(format!(
                    "cannot identify the response column: {} response-bearing candidates {:?}",
                    response_bearing.len(),
                    response_bearing
                )));
            }
            resp = response_bearing.pop();
        }

        let missing_ids = usize::from(id.is_none()) + usize::from(item.is_none());
        if missing_ids > 0 {
            if identifier_like.len() != missing_ids {
                return Err(IrwError::Schema(format!(
                    "cannot identify respondent/item columns: expected {missing_ids} identifier-like candidates, found {:?}",
                    identifier_like
                        .iter()
                        .map(|(name, _)| name.as_str())
                        .collect::<Vec<_>>()
                )));
            }
            let mut candidates = identifier_like.into_iter().map(|(name, _)| name);
            if id.is_none() {
                id = candidates.next();
            }
            if item.is_none() {
                item = candidates.next();
            }
        }

        match (id, item, resp) {
            (Some(id), Some(item), Some(resp)) => Ok(ResolvedColumns {
                id,
                item,
                resp,
                wave,
                inferred: true,
            }),
            _ => Err(IrwError::Schema(
                "required columns id, item and resp could not be identified".to_string(),
            )),
        }
    }

    fn select_wave<'a>(
        &self,
        rows: Vec<&'a [Value]>,
        wave_idx: usize,
        diagnostics: &mut ReshapeDiagnostics,
    ) -> Result<Vec<&'a [Value]>, IrwError> {
        let target = match &self.wave {
            Some(wave) => Some(wave.clone()),
            None => {
                let counts = first_seen_counts(
                    rows.iter()
                        .map(|row| &row[wave_idx])
                        .filter(|wave| !wave.is_null()),
                );
                if counts.is_empty() {
                    return Ok(rows);
                }
                if counts.len() == 1 {
                    let only = counts.into_iter().next().map(|(value, _)| value);
                    return Ok(keep_wave(rows, wave_idx, only, diagnostics));
                }
                match self.wave_policy {
                    WavePolicy::MostFrequent => {
                        let (wave, _) = most_frequent(counts);
                        diagnostics.note(format!("defaulting to the most frequent wave: {wave}"));
                        Some(wave)
                    }
                    WavePolicy::All => {
                        diagnostics.note(format!(
                            "pooling responses across {} waves",
                            counts.len()
                        ));
                        None
                    }
                    WavePolicy::Error => {
                        return Err(IrwError::Schema(format!(
                            "table holds {} waves; select one explicitly",
                            counts.len()
                        )));
                    }
                }
            }
        };

        Ok(keep_wave(rows, wave_idx, target, diagnostics))
    }

    fn pivot(
        &self,
        rows: &[&[Value]],
        id_column: &str,
        id_idx: usize,
        item_idx: usize,
        resp_idx: usize,
        diagnostics: &mut ReshapeDiagnostics,
    ) -> WideMatrix {
        let mut respondent_index = HashMap::new();
        let mut respondents = Vec::new();
        let mut item_index: HashMap<String, usize> = HashMap::new();
        let mut items: Vec<String> = Vec::new();
        let mut labels = HashSet::new();
        let mut relabeled = 0usize;
        let mut groups: HashMap<(usize, usize), Vec<Value>> = HashMap::new();

        for row in rows {
            let respondent = &row[id_idx];
            let r = *respondent_index.entry(respondent.key()).or_insert_with(|| {
                respondents.push(respondent.clone());
                respondents.len() - 1
            });
            let item = &row[item_idx];
            let i = match item_index.get(&item.key()) {
                Some(&i) => i,
                None => {
                    let display = item.to_string();
                    let label = unique_label(&display, &labels);
                    if label != display {
                        relabeled += 1;
                    }
                    labels.insert(label.clone());
                    items.push(label);
                    item_index.insert(item.key(), items.len() - 1);
                    items.len() - 1
                }
            };
            groups.entry((r, i)).or_default().push(row[resp_idx].clone());
        }

        let mut cells = vec![vec![Value::Null; items.len()]; respondents.len()];
        let mut coerced = 0usize;
        for ((r, i), values) in groups {
            cells[r][i] = if values.len() == 1 {
                values.into_iter().next().unwrap_or(Value::Null)
            } else {
                diagnostics.duplicate_pairs += 1;
                diagnostics.duplicate_responses += values.len() - 1;
                reduce(self.agg, &values, &mut coerced)
            };
        }

        if relabeled > 0 {
            diagnostics.note(format!(
                "{relabeled} item identifiers share a label with an item of another type; \
                 their columns were suffixed"
            ));
        }
        if diagnostics.duplicate_pairs > 0 {
            diagnostics.note(format!(
                "found {} extra responses across {} id-item pairs; aggregating with agg_method='{}'",
                diagnostics.duplicate_responses, diagnostics.duplicate_pairs, self.agg
            ));
        }
        if coerced > 0 {
            diagnostics.coerced_to_missing = coerced;
            diagnostics.note(format!(
                "{coerced} non-numeric responses were treated as missing during aggregation"
            ));
        }

        WideMatrix {
            id_column: id_column.to_string(),
            respondents,
            items,
            cells,
        }
    }
}

/// Pivots a long-format table into a response matrix.
///
/// `agg_method` is validated before any work is done, so an unknown name
/// fails with [`IrwError::UnsupportedAggregation`] and no partial result.
pub fn long2resp(
    table: &Table,
    wave: Option<Value>,
    id_density_threshold: f64,
    agg_method: &str,
) -> Result<Reshaped, IrwError> {
    Reshaper::new()
        .agg_name(agg_method)?
        .id_density_threshold(id_density_threshold)?
        .wave(wave)
        .reshape(table)
}

/// Flattens a response matrix into (id, `item`, `resp`) rows, cell by cell.
/// The id column is named after the matrix's own id column.
pub fn resp2long(matrix: &WideMatrix) -> Table {
    let mut rows = Vec::with_capacity(matrix.respondents.len() * matrix.items.len());
    for (respondent, cells) in matrix.respondents.iter().zip(&matrix.cells) {
        for (item, value) in matrix.items.iter().zip(cells) {
            rows.push(vec![
                respondent.clone(),
                Value::Text(item.clone()),
                value.clone(),
            ]);
        }
    }
    Table::from_rows([matrix.id_column.as_str(), "item", "resp"], rows).unwrap_or_default()
}

fn keep_wave<'a>(
    rows: Vec<&'a [Value]>,
    wave_idx: usize,
    target: Option<Value>,
    diagnostics: &mut ReshapeDiagnostics,
) -> Vec<&'a [Value]> {
    let Some(target) = target else {
        return rows;
    };
    let key = target.key();
    if !rows.iter().any(|row| row[wave_idx].key() == key) {
        diagnostics.note(format!("wave {target} not found in data; no filtering applied"));
        return rows;
    }
    let before = rows.len();
    let kept = rows
        .into_iter()
        .filter(|row| row[wave_idx].key() == key)
        .collect::<Vec<_>>();
    diagnostics.rows_dropped_by_wave = before - kept.len();
    if diagnostics.rows_dropped_by_wave > 0 {
        diagnostics.note(format!("keeping only responses from wave {target}"));
    }
    diagnostics.selected_wave = Some(target);
    kept
}

fn column(table: &Table, name: &str) -> Result<usize, IrwError> {
    table
        .column_index(name)
        .ok_or_else(|| IrwError::Schema(format!("missing column '{name}'")))
}

fn first_seen_counts<'a>(values: impl Iterator<Item = &'a Value>) -> Vec<(Value, usize)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut counts: Vec<(Value, usize)> = Vec::new();
    for value in values {
        match index.get(&value.key()) {
            Some(&slot) => counts[slot].1 += 1,
            None => {
                index.insert(value.key(), counts.len());
                counts.push((value.clone(), 1));
            }
        }
    }
    counts
}

/// `base`, or `base_2`, `base_3`, ... when `base` is already a column.
fn unique_label(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}_{n}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn most_frequent(counts: Vec<(Value, usize)>) -> (Value, usize) {
    let mut best: Option<(Value, usize)> = None;
    for (value, count) in counts {
        if best.as_ref().is_none_or(|(_, top)| count > *top) {
            best = Some((value, count));
        }
    }
    best.unwrap_or((Value::Null, 0))
}

fn filter_sparse_respondents<'a>(
    rows: Vec<&'a [Value]>,
    id_idx: usize,
    item_idx: usize,
    resp_idx: usize,
    threshold: f64,
    diagnostics: &mut ReshapeDiagnostics,
) -> Vec<&'a [Value]> {
    let total_items = rows
        .iter()
        .map(|row| row[item_idx].key())
        .collect::<HashSet<_>>()
        .len();
    if total_items == 0 {
        return rows;
    }

    let mut answered: Vec<(Value, usize)> = Vec::new();
    let mut index = HashMap::new();
    for row in &rows {
        let key = row[id_idx].key();
        let slot = *index.entry(key).or_insert_with(|| {
            answered.push((row[id_idx].clone(), 0));
            answered.len() - 1
        });
        if !row[resp_idx].is_null() {
            answered[slot].1 += 1;
        }
    }

    let removed = answered
        .into_iter()
        .filter(|(_, count)| (*count as f64 / total_items as f64) < threshold)
        .map(|(id, _)| id)
        .collect::<Vec<_>>();
    if removed.is_empty() {
        return rows;
    }

    let total = index.len();
    let removed_keys = removed.iter().map(Value::key).collect::<HashSet<_>>();
    diagnostics.note(format!(
        "{} of {total} ids removed ({:.2}%) due to response density below {threshold}",
        removed.len(),
        removed.len() as f64 / total as f64 * 100.0
    ));
    diagnostics.removed_respondents = removed;
    rows.into_iter()
        .filter(|row| !removed_keys.contains(&row[id_idx].key()))
        .collect()
}

fn reduce(agg: AggMethod, values: &[Value], coerced: &mut usize) -> Value {
    if agg.is_numeric() {
        let mut numbers = Vec::with_capacity(values.len());
        for value in values {
            match value.as_f64() {
                Some(number) => numbers.push(number),
                None if !value.is_null() => *coerced += 1,
                None => {}
            }
        }
        if numbers.is_empty() {
            return Value::Null;
        }
        return match agg {
            AggMethod::Mean => Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64),
            AggMethod::Median => {
                numbers.sort_by(|a, b| a.total_cmp(b));
                let mid = numbers.len() / 2;
                if numbers.len() % 2 == 0 {
                    Value::Float((numbers[mid - 1] + numbers[mid]) / 2.0)
                } else {
                    Value::Float(numbers[mid])
                }
            }
            AggMethod::Max => extreme(values, |candidate, best| candidate > best),
            AggMethod::Min => extreme(values, |candidate, best| candidate < best),
            _ => Value::Null,
        };
    }

    match agg {
        AggMethod::First => values.first().cloned().unwrap_or(Value::Null),
        AggMethod::Last => values.last().cloned().unwrap_or(Value::Null),
        AggMethod::Mode => {
            let counts = first_seen_counts(values.iter().filter(|value| !value.is_null()));
            most_frequent(counts).0
        }
        _ => Value::Null,
    }
}

/// Picks the original cell holding the extreme numeric value, keeping its type.
fn extreme(values: &[Value], better: impl Fn(f64, f64) -> bool) -> Value {
    let mut best: Option<(&Value, f64)> = None;
    for value in values {
        let Some(number) = value.as_f64() else {
            continue;
        };
        if best.is_none_or(|(_, top)| better(number, top)) {
            best = Some((value, number));
        }
    }
    best.map(|(value, _)| value.clone()).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn long(rows: &[(i64, &str, Value)]) -> Table {
        Table::from_rows(
            ["id", "item", "resp"],
            rows.iter()
                .map(|(id, item, resp)| vec![Value::Int(*id), Value::from(*item), resp.clone()])
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn reduce_median_even_and_odd() {
        let mut coerced = 0;
        let even = [Value::Int(1), Value::Int(4), Value::Int(2), Value::Int(3)];
        assert_eq!(reduce(AggMethod::Median, &even, &mut coerced), Value::Float(2.5));
        let odd = [Value::Int(5), Value::Int(1), Value::Int(3)];
        assert_eq!(reduce(AggMethod::Median, &odd, &mut coerced), Value::Float(3.0));
        assert_eq!(coerced, 0);
    }

    #[test]
    fn reduce_mode_breaks_ties_by_first_seen() {
        let mut coerced = 0;
        let values = [Value::Int(2), Value::Int(1), Value::Int(1), Value::Int(2), Value::Null];
        assert_eq!(reduce(AggMethod::Mode, &values, &mut coerced), Value::Int(2));
    }

    #[test]
    fn reduce_counts_non_numeric_values() {
        let mut coerced = 0;
        let values = [Value::Int(1), Value::from("skipped"), Value::Int(3)];
        assert_eq!(reduce(AggMethod::Mean, &values, &mut coerced), Value::Float(2.0));
        assert_eq!(coerced, 1);
    }

    #[test]
    fn max_and_min_keep_the_original_cell() {
        let mut coerced = 0;
        let values = [Value::Int(2), Value::Float(3.5), Value::Int(-1)];
        assert_eq!(reduce(AggMethod::Max, &values, &mut coerced), Value::Float(3.5));
        assert_eq!(reduce(AggMethod::Min, &values, &mut coerced), Value::Int(-1));
    }

    #[test]
    fn first_and_last_follow_row_order() {
        let table = long(&[(1, "q1", Value::Int(0)), (1, "q1", Value::Int(1))]);
        let first = Reshaper::new().agg(AggMethod::First).reshape(&table).unwrap();
        let last = Reshaper::new().agg(AggMethod::Last).reshape(&table).unwrap();
        assert_eq!(first.matrix.get(&Value::Int(1), "q1"), Some(&Value::Int(0)));
        assert_eq!(last.matrix.get(&Value::Int(1), "q1"), Some(&Value::Int(1)));
        assert_eq!(first.diagnostics.duplicate_pairs, 1);
        assert_eq!(first.diagnostics.duplicate_responses, 1);
    }

    #[test]
    fn date_column_is_rejected() {
        let table = Table::from_rows(
            ["id", "item", "resp", "date"],
            vec![vec![Value::Int(1), "q1".into(), Value::Int(1), "2020-01-01".into()]],
        )
        .unwrap();
        assert_matches!(Reshaper::new().reshape(&table), Err(IrwError::Schema(_)));
    }

    #[test]
    fn threshold_outside_unit_interval_is_rejected() {
        assert_matches!(
            Reshaper::new().id_density_threshold(1.5),
            Err(IrwError::Schema(_))
        );
    }

    #[test]
    fn sparse_respondents_are_dropped_when_requested() {
        let table = long(&[
            (1, "q1", Value::Int(1)),
            (1, "q2", Value::Int(0)),
            (1, "q3", Value::Int(1)),
            (1, "q4", Value::Int(1)),
            (2, "q1", Value::Int(0)),
        ]);
        let reshaped = Reshaper::new()
            .min_response_density(Some(0.5))
            .reshape(&table)
            .unwrap();
        assert_eq!(reshaped.matrix.respondents(), &[Value::Int(1)]);
        assert_eq!(reshaped.diagnostics.removed_respondents, vec![Value::Int(2)]);
    }

    #[test]
    fn raters_are_reported() {
        let table = Table::from_rows(
            ["id", "item", "resp", "rater"],
            vec![
                vec![Value::Int(1), "q1".into(), Value::Int(1), "a".into()],
                vec![Value::Int(1), "q1".into(), Value::Int(3), "b".into()],
            ],
        )
        .unwrap();
        let reshaped = Reshaper::new().reshape(&table).unwrap();
        assert_eq!(reshaped.diagnostics.raters, Some(2));
        assert_eq!(reshaped.matrix.get(&Value::Int(1), "q1"), Some(&Value::Float(2.0)));
    }

    #[test]
    fn matrix_constructor_rejects_duplicate_items() {
        let result = WideMatrix::new(
            "id",
            vec![Value::Int(1)],
            vec!["q1".to_string(), "q1".to_string()],
            vec![vec![Value::Int(1), Value::Int(0)]],
        );
        assert_matches!(result, Err(IrwError::Schema(_)));
    }
}
