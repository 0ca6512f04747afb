//! Unload path integration tests against an in-memory session

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{people_table, person, MemorySession};
use cqlbulk_common::BulkError;
use cqlbulk_engine::config::OutputFormat;
use cqlbulk_engine::record::RecordParser;
use cqlbulk_engine::session::Row;
use cqlbulk_engine::types::CqlValue;
use cqlbulk_engine::{run_unload, SchemaBinder, TableRef, TokenRange, TokenSpace, UnloadConfig, UnloadTask};
use num_bigint::BigInt;
use std::sync::Arc;

fn seeded() -> MemorySession {
    MemorySession::new(people_table()).with_rows(vec![
        (-500, person(1, Some("Ann"), &["a", "b"])),
        (0, person(2, None, &[])),
        (10, person(3, Some("line\nbreak"), &["x"])),
        (900, person(4, Some("Dee, Jr."), &["q"])),
    ])
}

async fn task_for(session: &Arc<MemorySession>, config: UnloadConfig) -> UnloadTask {
    let binder = SchemaBinder::new(session.clone(), config.parser.clone());
    let table = binder.bind(&TableRef::new("ks", "t"), None).await.unwrap();
    UnloadTask::new(session.clone(), table, config).unwrap()
}

fn bounded(begin: i64, end: i64) -> UnloadConfig {
    UnloadConfig {
        begin_token: Some(begin.to_string()),
        end_token: Some(end.to_string()),
        num_workers: 1,
        ..UnloadConfig::default()
    }
}

#[tokio::test]
async fn test_delimited_range_output_parses_back() {
    let session = Arc::new(seeded());
    let binder = SchemaBinder::new(session.clone(), Default::default());
    let table = binder.bind(&TableRef::new("ks", "t"), None).await.unwrap();
    let reader = RecordParser::new(table.columns.clone(), &Default::default());
    let task = UnloadTask::new(session.clone(), table, bounded(-1000, 1000)).unwrap();
    let mut out = Vec::new();

    let rows = task.process_range(&TokenRange::new(-1000, 1000), &mut out).await.unwrap();

    assert_eq!(rows, 4);
    assert_eq!(
        session.queries(),
        vec!["SELECT id, name, tags FROM ks.t WHERE Token(id) > -1000 AND Token(id) <= 1000"]
    );
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("1,Ann,\""));
    assert_eq!(lines[1], "2,,\"{}\"");
    assert!(lines[2].starts_with("3,line\\nbreak,"));
    assert!(lines[3].starts_with("4,\"Dee, Jr.\","));

    let expected = [
        person(1, Some("Ann"), &["a", "b"]),
        person(2, None, &[]),
        person(3, Some("line\nbreak"), &["x"]),
        person(4, Some("Dee, Jr."), &["q"]),
    ];
    for (line, row) in lines.iter().zip(expected) {
        assert_eq!(reader.parse_line(line, 1).unwrap().unwrap(), row.values);
    }
}

#[tokio::test]
async fn test_null_sentinel_round_trips_through_unload() {
    let session = Arc::new(seeded());
    let mut config = bounded(-1, 0);
    config.parser.null_string = "\\N".into();
    let task = task_for(&session, config).await;
    let mut out = Vec::new();

    task.process_range(&TokenRange::new(-1, 0), &mut out).await.unwrap();

    assert_eq!(String::from_utf8(out).unwrap(), "2,\\N,\"{}\"\n");
}

#[tokio::test]
async fn test_json_output_and_where_clause() {
    let session = Arc::new(seeded());
    let config = UnloadConfig {
        format: OutputFormat::Json,
        where_clause: Some("name = 'Ann' ALLOW FILTERING".into()),
        ..bounded(-1000, 0)
    };
    let task = task_for(&session, config).await;
    let mut out = Vec::new();

    task.process_range(&TokenRange::new(-1000, 0), &mut out).await.unwrap();

    assert_eq!(
        String::from_utf8(out).unwrap(),
        "{\"id\":1,\"name\":\"Ann\",\"tags\":[\"a\",\"b\"]}\n{\"id\":2,\"name\":null,\"tags\":[]}\n"
    );
    assert!(session.queries()[0].ends_with("AND Token(id) <= 0 AND name = 'Ann' ALLOW FILTERING"));
}

#[tokio::test]
async fn test_read_failure_is_fatal() {
    let session = Arc::new(seeded().with_read_error_after(1));
    let task = task_for(&session, bounded(-1000, 1000)).await;
    let mut out = Vec::new();

    let err = task.process_range(&TokenRange::new(-1000, 1000), &mut out).await.unwrap_err();

    assert!(matches!(err, BulkError::Connection(_)));
    assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);
}

#[tokio::test]
async fn test_unformattable_row_is_fatal() {
    let session = Arc::new(
        MemorySession::new(people_table()).with_rows(vec![(1, Row::new(vec![Some(CqlValue::Int(1))]))]),
    );
    let task = task_for(&session, bounded(0, 10)).await;

    let err = task.process_range(&TokenRange::new(0, 10), Vec::new()).await.unwrap_err();

    assert!(matches!(err, BulkError::Worker(_)));
}

#[tokio::test]
async fn test_table_without_partition_key_is_rejected() {
    let mut metadata = people_table();
    metadata.partition_key.clear();
    let session = Arc::new(MemorySession::new(metadata));
    let binder = SchemaBinder::new(session.clone(), Default::default());
    let table = binder.bind(&TableRef::new("ks", "t"), None).await.unwrap();

    assert!(matches!(
        UnloadTask::new(session.clone(), table, UnloadConfig::default()),
        Err(BulkError::Schema(_))
    ));
}

#[tokio::test]
async fn test_run_unload_splits_and_covers_every_row() {
    let session = Arc::new(seeded());
    let config = UnloadConfig { num_workers: 3, ..bounded(-1000, 1000) };
    let task = task_for(&session, config).await;
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_path_buf();

    let summary = run_unload(task, |index, _range| {
        Ok(tokio::fs::File::from_std(std::fs::File::create(base.join(format!("part-{index}.csv")))?))
    })
    .await
    .unwrap();

    assert_eq!(summary.counters.succeeded, 4);
    let ranges: Vec<&str> = summary.results.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(ranges, vec!["(-1000, -334]", "(-334, 332]", "(332, 1000]"]);
    let counts: Vec<i64> = summary.results.iter().map(|(_, rows)| *rows).collect();
    assert_eq!(counts, vec![1, 2, 1]);

    let middle = std::fs::read_to_string(dir.path().join("part-1.csv")).unwrap();
    assert!(middle.starts_with("2,,\"{}\"\n3,"));
}

#[tokio::test]
async fn test_full_ring_auto_split() {
    let session = Arc::new(seeded());
    let config = UnloadConfig { num_workers: 4, token_space: TokenSpace::Murmur3, ..UnloadConfig::default() };
    let task = task_for(&session, config).await;

    let ranges = task.ranges().unwrap();
    assert_eq!(ranges.len(), 4);
    assert_eq!(ranges[0].begin, BigInt::from(i64::MIN));
    assert_eq!(ranges[3].end, BigInt::from(i64::MAX));

    let summary = run_unload(task, |_, _| Ok(tokio::io::sink())).await.unwrap();
    assert_eq!(summary.counters.succeeded, 4);
    assert!(summary.is_success());
}
