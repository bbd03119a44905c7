#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use camino::Utf8Path;

use irw::bibtex::CitationLookup;
use irw::config::ResolvedConfig;
use irw::domain::DatasetRef;
use irw::error::IrwError;
use irw::fs_util;
use irw::platform::{DatasetProperties, DatasetVersion, Platform, TableEntry};
use irw::session::Session;
use irw::table::{Table, Value};

#[derive(Default)]
struct FakeState {
    tables: HashMap<String, Vec<(String, Table)>>,
    properties: HashMap<String, DatasetProperties>,
    unreachable: Vec<String>,
    connects: usize,
    fetches: usize,
}

/// In-memory platform; clones share state so tests can inspect calls.
#[derive(Clone, Default)]
pub struct FakePlatform {
    state: Arc<Mutex<FakeState>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&self, dataset: &DatasetRef, name: &str, table: Table) {
        let mut state = self.state.lock().unwrap();
        let tables = state.tables.entry(dataset.qualified()).or_default();
        tables.retain(|(existing, _)| existing != name);
        tables.push((name.to_string(), table));
    }

    pub fn set_properties(&self, dataset: &DatasetRef, properties: DatasetProperties) {
        self.state
            .lock()
            .unwrap()
            .properties
            .insert(dataset.qualified(), properties);
    }

    pub fn set_version(&self, dataset: &DatasetRef, tag: &str) {
        let properties = DatasetProperties {
            version: Some(DatasetVersion {
                tag: Some(tag.to_string()),
            }),
            ..DatasetProperties::default()
        };
        self.set_properties(dataset, properties);
    }

    /// Every call against `dataset` fails with a 500.
    pub fn break_dataset(&self, dataset: &DatasetRef) {
        self.state
            .lock()
            .unwrap()
            .unreachable
            .push(dataset.qualified());
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn fetches(&self) -> usize {
        self.state.lock().unwrap().fetches
    }

    pub fn session(&self, config: ResolvedConfig) -> Session {
        let platform = self.clone();
        Session::with_connector(config, move |_| {
            platform.state.lock().unwrap().connects += 1;
            Ok(Box::new(platform.clone()) as Box<dyn Platform>)
        })
    }

    fn check(&self, dataset: &DatasetRef) -> Result<(), IrwError> {
        if self
            .state
            .lock()
            .unwrap()
            .unreachable
            .contains(&dataset.qualified())
        {
            return Err(IrwError::PlatformStatus {
                status: 500,
                message: format!("{dataset} unavailable"),
            });
        }
        Ok(())
    }

    fn lookup(&self, dataset: &DatasetRef, table: &str) -> Result<Table, IrwError> {
        self.check(dataset)?;
        let mut state = self.state.lock().unwrap();
        state.fetches += 1;
        state
            .tables
            .get(&dataset.qualified())
            .and_then(|tables| tables.iter().find(|(name, _)| name == table))
            .map(|(_, table)| table.clone())
            .ok_or_else(|| IrwError::NotFound(dataset.table_ref(table)))
    }
}

impl Platform for FakePlatform {
    fn dataset_properties(&self, dataset: &DatasetRef) -> Result<DatasetProperties, IrwError> {
        self.check(dataset)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .properties
            .get(&dataset.qualified())
            .cloned()
            .unwrap_or_default())
    }

    fn list_tables(&self, dataset: &DatasetRef) -> Result<Vec<TableEntry>, IrwError> {
        self.check(dataset)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .tables
            .get(&dataset.qualified())
            .map(|tables| {
                tables
                    .iter()
                    .map(|(name, table)| TableEntry {
                        name: name.clone(),
                        num_rows: Some(table.len() as u64),
                        variable_count: Some(table.columns().len() as u64),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn fetch_table(&self, dataset: &DatasetRef, table: &str) -> Result<Table, IrwError> {
        self.lookup(dataset, table)
    }

    fn download_table(
        &self,
        dataset: &DatasetRef,
        table: &str,
        destination: &Utf8Path,
        overwrite: bool,
    ) -> Result<(), IrwError> {
        let found = self.lookup(dataset, table)?;
        fs_util::write_atomic(destination, overwrite, |out| found.write_csv(out))
    }
}

/// DOI lookups answered from a fixed map; `fail` DOIs error out.
#[derive(Default)]
pub struct FakeCitations {
    pub known: HashMap<String, String>,
    pub fail: Vec<String>,
}

impl CitationLookup for FakeCitations {
    fn bibtex_for_doi(&self, doi: &str) -> Result<Option<String>, IrwError> {
        if self.fail.iter().any(|d| d == doi) {
            return Err(IrwError::CitationHttp(format!("lookup of {doi} timed out")));
        }
        Ok(self.known.get(doi).cloned())
    }
}

pub fn long_table(rows: &[(i64, &str, Value)]) -> Table {
    Table::from_rows(
        ["id", "item", "resp"],
        rows.iter()
            .map(|(id, item, resp)| vec![Value::Int(*id), Value::from(*item), resp.clone()])
            .collect(),
    )
    .unwrap()
}

pub fn main_dataset() -> DatasetRef {
    ResolvedConfig::default().main[0].clone()
}

pub fn second_main_dataset() -> DatasetRef {
    ResolvedConfig::default().main[1].clone()
}

/// Seeds the meta dataset and two main tables, `abortion` and `gilbert_meta_2`.
pub fn seeded_platform() -> FakePlatform {
    let config = ResolvedConfig::default();
    let platform = FakePlatform::new();

    platform.add_table(
        &main_dataset(),
        "abortion",
        long_table(&[(1, "q1", Value::Int(1)), (2, "q1", Value::Int(0))]),
    );
    platform.add_table(
        &second_main_dataset(),
        "gilbert_meta_2",
        long_table(&[(1, "q1", Value::Int(3))]),
    );

    let meta = &config.meta;
    platform.set_version(&meta.dataset, "v1");
    platform.add_table(
        &meta.dataset,
        &meta.metadata,
        Table::from_rows(
            ["table", "n_responses", "n_participants", "n_items", "density"],
            vec![
                vec![
                    "abortion".into(),
                    Value::Int(1500),
                    Value::Int(300),
                    Value::Int(5),
                    Value::Float(0.9),
                ],
                vec![
                    "gilbert_meta_2".into(),
                    Value::Int(200),
                    Value::Int(20),
                    Value::Int(10),
                    Value::Float(0.6),
                ],
                vec![
                    "retired_table".into(),
                    Value::Int(5000),
                    Value::Int(100),
                    Value::Int(50),
                    Value::Float(1.0),
                ],
            ],
        )
        .unwrap(),
    );
    platform.add_table(
        &meta.dataset,
        &meta.tags,
        Table::from_rows(
            ["table", "construct_type", "sample", "variables"],
            vec![
                vec![
                    "abortion".into(),
                    "Attitudes".into(),
                    "Adults".into(),
                    "id|item|resp|cov_age".into(),
                ],
                vec![
                    "gilbert_meta_2".into(),
                    "Affective/mental health".into(),
                    "Children".into(),
                    "id|item|resp|rater".into(),
                ],
            ],
        )
        .unwrap(),
    );
    platform.add_table(
        &meta.dataset,
        &meta.biblio,
        Table::from_rows(
            ["table", "Description", "Reference", "DOI__for_paper_", "BibTex", "Derived_License"],
            vec![
                vec![
                    "abortion".into(),
                    "Attitudes toward abortion".into(),
                    "Doe (2020)".into(),
                    "10.1/abc".into(),
                    "@article{doe2020, title={Abortion}}".into(),
                    "CC BY 4.0".into(),
                ],
                vec![
                    "gilbert_meta_2".into(),
                    Value::Null,
                    Value::Null,
                    "10.2/xyz".into(),
                    Value::Null,
                    Value::Null,
                ],
            ],
        )
        .unwrap(),
    );
    platform.add_table(
        &config.itemtext,
        "abortion__items",
        Table::from_rows(
            ["item", "item_text"],
            vec![vec!["q1".into(), "Should abortion be legal?".into()]],
        )
        .unwrap(),
    );
    platform
}
