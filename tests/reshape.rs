mod common;

use assert_matches::assert_matches;
use proptest::prelude::*;

use irw::domain::{AggMethod, WavePolicy};
use irw::error::IrwError;
use irw::reshape::{ColumnNames, Reshaper, WideMatrix, long2resp, resp2long};
use irw::table::{Table, Value};

use common::long_table;

#[test]
fn two_by_two_example_leaves_missing_cell() {
    let table = Table::from_rows(
        ["resp", "item", "val"],
        vec![
            vec![Value::Int(1), "q1".into(), Value::Int(1)],
            vec![Value::Int(1), "q2".into(), Value::Int(0)],
            vec![Value::Int(2), "q1".into(), Value::Int(1)],
        ],
    )
    .unwrap();
    let columns = ColumnNames {
        id: "resp".to_string(),
        item: "item".to_string(),
        resp: "val".to_string(),
        ..ColumnNames::default()
    };

    let reshaped = Reshaper::new().columns(columns).reshape(&table).unwrap();
    let matrix = &reshaped.matrix;

    assert_eq!(matrix.shape(), (2, 2));
    assert_eq!(matrix.respondents(), [Value::Int(1), Value::Int(2)]);
    assert_eq!(matrix.items(), ["q1", "q2"]);
    assert_eq!(matrix.get(&Value::Int(2), "q2"), Some(&Value::Null));
    assert_eq!(matrix.get(&Value::Int(1), "q2"), Some(&Value::Int(0)));
}

#[test]
fn pure_pivot_keeps_every_response() {
    let table = long_table(&[
        (10, "a", Value::Int(1)),
        (10, "b", Value::Int(2)),
        (20, "a", Value::Int(3)),
        (20, "b", Value::Int(4)),
    ]);

    let reshaped = long2resp(&table, None, 0.1, "mean").unwrap();

    assert_eq!(reshaped.diagnostics.duplicate_pairs, 0);
    let expected = WideMatrix::new(
        "id",
        vec![Value::Int(10), Value::Int(20)],
        vec!["a".to_string(), "b".to_string()],
        vec![
            vec![Value::Int(1), Value::Int(2)],
            vec![Value::Int(3), Value::Int(4)],
        ],
    )
    .unwrap();
    assert_eq!(reshaped.matrix, expected);
}

#[test]
fn duplicate_pairs_are_averaged() {
    let table = long_table(&[
        (1, "q1", Value::Int(1)),
        (1, "q1", Value::Int(0)),
        (1, "q1", Value::Int(1)),
        (2, "q1", Value::Int(0)),
    ]);

    let reshaped = long2resp(&table, None, 0.1, "mean").unwrap();

    let cell = reshaped.matrix.get(&Value::Int(1), "q1").unwrap();
    let mean = cell.as_f64().unwrap();
    assert!((mean - 2.0 / 3.0).abs() < 1e-12);
    assert_eq!(reshaped.diagnostics.duplicate_pairs, 1);
    assert_eq!(reshaped.diagnostics.duplicate_responses, 2);
}

#[test]
fn unknown_aggregation_is_rejected_before_reshaping() {
    let table = long_table(&[(1, "q1", Value::Int(1))]);

    let err = long2resp(&table, None, 0.1, "bogus").unwrap_err();

    assert_matches!(err, IrwError::UnsupportedAggregation(name) if name == "bogus");
}

#[test]
fn most_frequent_wave_is_selected_by_default() {
    let table = Table::from_rows(
        ["id", "item", "resp", "wave"],
        vec![
            vec![Value::Int(1), "q1".into(), Value::Int(1), Value::Int(1)],
            vec![Value::Int(1), "q1".into(), Value::Int(0), Value::Int(2)],
            vec![Value::Int(2), "q1".into(), Value::Int(1), Value::Int(2)],
        ],
    )
    .unwrap();

    let reshaped = Reshaper::new().reshape(&table).unwrap();

    assert_eq!(reshaped.diagnostics.selected_wave, Some(Value::Int(2)));
    assert_eq!(reshaped.diagnostics.rows_dropped_by_wave, 1);
    assert_eq!(reshaped.matrix.get(&Value::Int(1), "q1"), Some(&Value::Int(0)));
}

#[test]
fn explicit_wave_overrides_policy() {
    let table = Table::from_rows(
        ["id", "item", "resp", "wave"],
        vec![
            vec![Value::Int(1), "q1".into(), Value::Int(1), Value::Int(1)],
            vec![Value::Int(1), "q1".into(), Value::Int(0), Value::Int(2)],
        ],
    )
    .unwrap();

    let reshaped = Reshaper::new()
        .wave_policy(WavePolicy::Error)
        .wave(Some(Value::Int(1)))
        .reshape(&table)
        .unwrap();

    assert_eq!(reshaped.matrix.get(&Value::Int(1), "q1"), Some(&Value::Int(1)));
}

#[test]
fn ambiguous_waves_fail_under_error_policy() {
    let table = Table::from_rows(
        ["id", "item", "resp", "wave"],
        vec![
            vec![Value::Int(1), "q1".into(), Value::Int(1), Value::Int(1)],
            vec![Value::Int(1), "q1".into(), Value::Int(0), Value::Int(2)],
        ],
    )
    .unwrap();

    let err = Reshaper::new()
        .wave_policy(WavePolicy::Error)
        .reshape(&table)
        .unwrap_err();

    assert_matches!(err, IrwError::Schema(_));
}

#[test]
fn columns_are_inferred_when_names_differ() {
    // person has a distinct ratio of 0.5, above the default threshold.
    let mut rows = Vec::new();
    for person in 0..40 {
        for question in ["q1", "q2"] {
            rows.push(vec![
                Value::Int(person),
                Value::from(question),
                Value::Float(person as f64 * 0.5 + if question == "q1" { 0.1 } else { 0.2 }),
            ]);
        }
    }
    let table = Table::from_rows(["person", "question", "score"], rows).unwrap();

    let reshaped = Reshaper::new()
        .id_density_threshold(0.6)
        .unwrap()
        .reshape(&table)
        .unwrap();

    let columns = reshaped.diagnostics.columns.unwrap();
    assert!(columns.inferred);
    assert_eq!(columns.id, "person");
    assert_eq!(columns.item, "question");
    assert_eq!(columns.resp, "score");
    assert_eq!(reshaped.matrix.shape(), (40, 2));
}

#[test]
fn timestamped_tables_are_rejected() {
    let table = Table::from_rows(
        ["id", "item", "resp", "date"],
        vec![vec![Value::Int(1), "q1".into(), Value::Int(1), "2021-01-01".into()]],
    )
    .unwrap();

    assert_matches!(long2resp(&table, None, 0.1, "mean"), Err(IrwError::Schema(_)));
}

#[test]
fn median_aggregation_via_builder() {
    let table = long_table(&[
        (1, "q1", Value::Int(1)),
        (1, "q1", Value::Int(5)),
        (1, "q1", Value::Int(3)),
    ]);

    let reshaped = Reshaper::new().agg(AggMethod::Median).reshape(&table).unwrap();

    assert_eq!(reshaped.matrix.get(&Value::Int(1), "q1"), Some(&Value::Float(3.0)));
}

#[test]
fn missing_waves_are_not_a_wave_of_their_own() {
    let table = Table::from_rows(
        ["id", "item", "resp", "wave"],
        vec![
            vec![Value::Int(1), "q1".into(), Value::Int(1), Value::Null],
            vec![Value::Int(2), "q1".into(), Value::Int(0), Value::Null],
            vec![Value::Int(3), "q1".into(), Value::Int(1), Value::Int(1)],
        ],
    )
    .unwrap();

    let reshaped = Reshaper::new().reshape(&table).unwrap();
    assert_eq!(reshaped.diagnostics.selected_wave, Some(Value::Int(1)));
    assert_eq!(reshaped.diagnostics.rows_dropped_by_wave, 2);
    assert_eq!(reshaped.matrix.respondents(), [Value::Int(3)]);

    let strict = Reshaper::new().wave_policy(WavePolicy::Error).reshape(&table);
    assert!(strict.is_ok());
}

#[test]
fn pooled_waves_are_aggregated_together() {
    let table = Table::from_rows(
        ["id", "item", "resp", "wave"],
        vec![
            vec![Value::Int(1), "q1".into(), Value::Int(1), Value::Int(1)],
            vec![Value::Int(1), "q1".into(), Value::Int(0), Value::Int(2)],
        ],
    )
    .unwrap();

    let reshaped = Reshaper::new().wave_policy(WavePolicy::All).reshape(&table).unwrap();

    assert_eq!(reshaped.diagnostics.selected_wave, None);
    assert_eq!(reshaped.diagnostics.rows_dropped_by_wave, 0);
    assert_eq!(reshaped.diagnostics.duplicate_pairs, 1);
    assert_eq!(reshaped.matrix.get(&Value::Int(1), "q1"), Some(&Value::Float(0.5)));
    assert!(reshaped.diagnostics.notes.iter().any(|note| note.contains("pooling")));
}

#[test]
fn absent_wave_leaves_rows_unfiltered() {
    let table = Table::from_rows(
        ["id", "item", "resp", "wave"],
        vec![
            vec![Value::Int(1), "q1".into(), Value::Int(1), Value::Int(1)],
            vec![Value::Int(2), "q1".into(), Value::Int(0), Value::Int(2)],
        ],
    )
    .unwrap();

    let reshaped = long2resp(&table, Some(Value::Int(9)), 0.1, "mean").unwrap();

    assert_eq!(reshaped.matrix.shape(), (2, 1));
    assert_eq!(reshaped.diagnostics.rows_dropped_by_wave, 0);
    assert!(reshaped.diagnostics.notes.iter().any(|note| note.contains("not found")));
}

#[test]
fn empty_input_gives_empty_matrix_with_note() {
    let table = Table::from_rows(["id", "item", "resp"], Vec::new()).unwrap();

    let reshaped = long2resp(&table, None, 0.1, "mean").unwrap();

    assert!(reshaped.matrix.is_empty());
    assert_eq!(reshaped.matrix.shape(), (0, 0));
    assert!(!reshaped.diagnostics.notes.is_empty());
}

#[test]
fn two_response_candidates_are_ambiguous() {
    let mut rows = Vec::new();
    for person in 0..40 {
        for question in ["q1", "q2"] {
            let base = person as f64 + if question == "q1" { 0.1 } else { 0.2 };
            rows.push(vec![
                Value::Int(person),
                Value::from(question),
                Value::Float(base),
                Value::Float(base * 3.0),
            ]);
        }
    }
    let table = Table::from_rows(["person", "question", "score", "rescored"], rows).unwrap();

    let err = Reshaper::new()
        .id_density_threshold(0.6)
        .unwrap()
        .reshape(&table)
        .unwrap_err();

    assert_matches!(err, IrwError::Schema(_));
}

#[test]
fn items_of_different_types_stay_separate() {
    let table = Table::from_rows(
        ["id", "item", "resp"],
        vec![
            vec![Value::Int(1), Value::Int(1), Value::Int(1)],
            vec![Value::Int(1), Value::from("1"), Value::Int(0)],
            vec![Value::Int(1), Value::Null, Value::Int(1)],
        ],
    )
    .unwrap();

    let reshaped = Reshaper::new().reshape(&table).unwrap();

    assert_eq!(reshaped.matrix.items(), ["1", "1_2"]);
    assert_eq!(reshaped.diagnostics.duplicate_pairs, 0);
    assert_eq!(reshaped.matrix.get(&Value::Int(1), "1"), Some(&Value::Int(1)));
    assert_eq!(reshaped.matrix.get(&Value::Int(1), "1_2"), Some(&Value::Int(0)));
}

#[test]
fn round_trip_keeps_the_id_column_name() {
    let matrix = WideMatrix::new(
        "person",
        vec![Value::Int(1), Value::Int(2)],
        vec!["q1".to_string()],
        vec![vec![Value::Int(1)], vec![Value::Null]],
    )
    .unwrap();

    let long = resp2long(&matrix);
    assert_eq!(long.columns(), ["person", "item", "resp"]);

    let back = WideMatrix::from_long(&long, matrix.id_column()).unwrap();
    assert_eq!(back, matrix);
}

fn matrix_strategy() -> impl Strategy<Value = WideMatrix> {
    let id_column = prop_oneof![Just("id"), Just("person"), Just("student_id")];
    (id_column, 1usize..6, 1usize..6).prop_flat_map(|(id_column, respondents, items)| {
        let cell = prop_oneof![
            Just(Value::Null),
            (-5i64..5).prop_map(Value::Int),
            (0u8..8).prop_map(|n| Value::Float(f64::from(n) + 0.25)),
        ];
        prop::collection::vec(prop::collection::vec(cell, items), respondents).prop_map(
            move |cells| {
                WideMatrix::new(
                    id_column,
                    (0..respondents as i64).map(|r| Value::Int(r * 7 + 1)).collect(),
                    (0..items).map(|i| format!("item_{i}")).collect(),
                    cells,
                )
                .unwrap()
            },
        )
    })
}

proptest! {
    #[test]
    fn wide_long_wide_round_trip(matrix in matrix_strategy()) {
        let long = matrix.to_long();
        prop_assert_eq!(long.len(), matrix.shape().0 * matrix.shape().1);
        let back = WideMatrix::from_long(&long, matrix.id_column()).unwrap();
        prop_assert_eq!(back, matrix);
    }
}
