//! Item-level text (question wording, response options) published alongside some tables.

use std::collections::HashSet;

use tracing::debug;

use crate::error::IrwError;
use crate::session::Session;
use crate::table::Table;

const ITEMS_SUFFIX: &str = "__items";

/// Lowercase names of tables that have item text.
pub fn available_tables(session: &Session) -> Result<HashSet<String>, IrwError> {
    let dataset = &session.config().itemtext;
    Ok(session
        .dataset_tables(dataset)?
        .into_iter()
        .filter_map(|entry| {
            entry
                .name
                .strip_suffix(ITEMS_SUFFIX)
                .map(|base| base.to_lowercase())
        })
        .collect())
}

pub fn list_tables_with_itemtext(session: &Session) -> Result<Vec<String>, IrwError> {
    let mut names = available_tables(session)?.into_iter().collect::<Vec<_>>();
    names.sort();
    Ok(names)
}

/// The item text table for `name`.
pub fn itemtext(session: &Session, name: &str) -> Result<Table, IrwError> {
    let dataset = session.config().itemtext.clone();
    let wanted = format!("{}{ITEMS_SUFFIX}", name.to_lowercase());
    let actual = session
        .dataset_tables(&dataset)?
        .into_iter()
        .map(|entry| entry.name)
        .find(|candidate| candidate.to_lowercase() == wanted)
        .ok_or_else(|| {
            IrwError::NotFound(format!("item-level text is not available for table '{name}'"))
        })?;
    debug!("fetching item text from {}", dataset.table_ref(&actual));
    session.platform()?.fetch_table(&dataset, &actual)
}
