use std::io::{self, Write};

use clap::ValueEnum;
use serde::Serialize;

use crate::bibtex::BibtexReport;
use crate::catalog::{DatabaseInfo, TableInfo};
use crate::error::IrwError;
use crate::filter::FilterDescription;
use crate::reshape::ReshapeDiagnostics;
use crate::table::Table;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Aligned text for terminals.
    #[default]
    Text,
    Csv,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_table(table: &Table) -> io::Result<()> {
        Self::print_json(&table.to_json_records())
    }

    pub fn print_names(names: &[String]) -> io::Result<()> {
        Self::print_json(&names)
    }

    pub fn print_table_info(info: &TableInfo) -> io::Result<()> {
        Self::print_json(info)
    }

    pub fn print_database_info(info: &DatabaseInfo) -> io::Result<()> {
        Self::print_json(info)
    }

    pub fn print_filter(description: &FilterDescription) -> io::Result<()> {
        Self::print_json(description)
    }

    pub fn print_bibtex(report: &BibtexReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_diagnostics(diagnostics: &ReshapeDiagnostics) -> io::Result<()> {
        Self::print_json(diagnostics)
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct CsvOutput;

impl CsvOutput {
    pub fn print_table(table: &Table) -> Result<(), IrwError> {
        table.write_csv(io::stdout().lock())
    }
}

pub struct TextOutput;

impl TextOutput {
    /// Prints at most `limit` rows with padded columns.
    pub fn print_table(table: &Table, limit: Option<usize>) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(render_table(table, limit).as_bytes())
    }
}

pub fn render_table(table: &Table, limit: Option<usize>) -> String {
    let shown = limit.unwrap_or(usize::MAX).min(table.len());
    let rows = table.rows()[..shown]
        .iter()
        .map(|row| row.iter().map(ToString::to_string).collect::<Vec<_>>())
        .collect::<Vec<_>>();
    let mut widths = table.columns().iter().map(|c| c.chars().count()).collect::<Vec<_>>();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let line = |cells: &mut dyn Iterator<Item = &str>, out: &mut String| {
        let padded = cells
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>();
        out.push_str(padded.join("  ").trim_end());
        out.push('\n');
    };
    line(&mut table.columns().iter().map(String::as_str), &mut out);
    for row in &rows {
        line(&mut row.iter().map(String::as_str), &mut out);
    }
    if shown < table.len() {
        out.push_str(&format!("... {} more row(s)\n", table.len() - shown));
    }
    out
}
