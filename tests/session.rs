mod common;

use assert_matches::assert_matches;

use irw::config::ResolvedConfig;
use irw::domain::Source;
use irw::error::IrwError;
use irw::session::Session;

use common::{FakePlatform, seeded_platform};

#[test]
fn connects_lazily_and_reuses_the_handle() {
    let platform = seeded_platform();
    let session = platform.session(ResolvedConfig::default());
    assert!(!session.is_connected());
    assert_eq!(platform.connects(), 0);

    let meta = session.config().meta.clone();
    session.meta_table(&meta.metadata).unwrap();
    session.meta_table(&meta.tags).unwrap();

    assert!(session.is_connected());
    assert_eq!(platform.connects(), 1);
}

#[test]
fn metadata_is_fetched_once_per_session() {
    let platform = seeded_platform();
    let session = platform.session(ResolvedConfig::default());
    let meta = session.config().meta.clone();

    session.meta_table(&meta.metadata).unwrap();
    session.meta_table(&meta.metadata).unwrap();

    assert_eq!(platform.fetches(), 1);
}

#[test]
fn close_drops_cache_and_next_call_reconnects() {
    let platform = seeded_platform();
    let mut session = platform.session(ResolvedConfig::default());
    let meta = session.config().meta.clone();
    session.meta_table(&meta.metadata).unwrap();
    assert!(!session.cache_is_empty());

    session.close();
    assert!(!session.is_connected());
    assert!(session.cache_is_empty());

    session.meta_table(&meta.metadata).unwrap();
    assert_eq!(platform.connects(), 2);
    assert_eq!(platform.fetches(), 2);
}

#[test]
fn connection_failures_surface_from_the_first_call() {
    let session = Session::with_connector(ResolvedConfig::default(), |_| {
        Err(IrwError::Authentication("no token".to_string()))
    });

    let err = session.existing_tables(Source::Main).unwrap_err();

    assert_matches!(err, IrwError::Authentication(_));
    assert!(!session.is_connected());
}

#[test]
fn fetch_raw_searches_datasets_in_order() {
    let platform = seeded_platform();
    let session = platform.session(ResolvedConfig::default());

    let table = session
        .fetch_raw(Source::Main, "gilbert_meta_2")
        .unwrap();
    assert_eq!(table.len(), 1);

    let err = session
        .fetch_raw(Source::Main, "missing_table")
        .unwrap_err();
    assert_matches!(err, IrwError::NotFound(_));
}

#[test]
fn unreachable_datasets_are_skipped_when_listing() {
    let platform = seeded_platform();
    platform.break_dataset(&common::second_main_dataset());
    let session = platform.session(ResolvedConfig::default());

    let existing = session.existing_tables(Source::Main).unwrap();

    assert!(existing.contains("abortion"));
    assert!(!existing.contains("gilbert_meta_2"));
}

#[test]
fn empty_platform_lists_nothing() {
    let platform = FakePlatform::new();
    let session = platform.session(ResolvedConfig::default());
    assert!(session.existing_tables(Source::Sim).unwrap().is_empty());
}
