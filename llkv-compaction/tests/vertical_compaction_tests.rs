//! End-to-end tests of vertical compaction over a MemPager-backed tablet.

use arrow::array::{ArrayRef, Int64Array, StringArray};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use llkv_compaction::utils::split_column_into_groups;
use llkv_compaction::{
    BackgroundWorkerSignal, CompactionConfig, CompactionRequest, CompactionStatePreloader,
    CompactionTaskContext, NoopCompactionStatePreloader, RowSourceMask, RowSourceMaskBuffer,
    TabletReader, TabletReaderParams, VerticalCompactionTask, compact_tablet,
};
use llkv_result::{Error, Result};
use llkv_storage::pager::{InstrumentedPager, MemPager, Pager};
use llkv_tablet::{
    ColumnType, KeysType, LakeIoOptions, RowsetId, Tablet, TabletColumn, TabletId,
    TabletManager, TabletSchema, TxnId, TxnLog, read_rows_mapper, rssid_rowid,
};
use llkv_test_utils::{init_tracing_for_tests, int64_batch, int64_column, utf8_column};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

type Manager = TabletManager<MemPager>;

fn kv_schema(keys_type: KeysType) -> TabletSchema {
    TabletSchema::new(
        1,
        keys_type,
        vec![
            TabletColumn::key("k", ColumnType::Int64),
            TabletColumn::value("v", ColumnType::Int64),
        ],
    )
    .unwrap()
}

/// `k` plus value columns `c1..=cN`.
fn wide_schema(keys_type: KeysType, value_columns: usize) -> TabletSchema {
    let mut columns = vec![TabletColumn::key("k", ColumnType::Int64)];
    for i in 1..=value_columns {
        columns.push(TabletColumn::value(format!("c{i}"), ColumnType::Int64));
    }
    TabletSchema::new(1, keys_type, columns).unwrap()
}

/// Rows of a wide table where `c{i} = tag * 1000 + k * 10 + i`.
fn wide_batch(keys: &[i64], value_columns: usize, tag: i64) -> RecordBatch {
    let mut columns = vec![("k".to_string(), keys.to_vec())];
    for i in 1..=value_columns {
        columns.push((
            format!("c{i}"),
            keys.iter().map(|k| tag * 1000 + k * 10 + i as i64).collect(),
        ));
    }
    let borrowed: Vec<(&str, Vec<i64>)> = columns
        .iter()
        .map(|(name, values)| (name.as_str(), values.clone()))
        .collect();
    int64_batch(&borrowed)
}

fn setup(schema: TabletSchema) -> (Arc<MemPager>, Manager, TabletId) {
    init_tracing_for_tests();
    let pager = Arc::new(MemPager::new());
    let manager = TabletManager::open(Arc::clone(&pager)).unwrap();
    let tablet_id = manager.create_tablet(schema).unwrap();
    (pager, manager, tablet_id)
}

fn config(dir: &TempDir) -> CompactionConfig {
    CompactionConfig::default().with_spill_dir(dir.path())
}

fn compact(
    manager: &Manager,
    tablet_id: TabletId,
    txn_id: TxnId,
    input_rowsets: Vec<RowsetId>,
    config: CompactionConfig,
) -> Result<TxnLog> {
    let request = CompactionRequest {
        tablet_id,
        txn_id,
        input_rowsets,
        schema_version: 1,
    };
    compact_tablet(
        manager,
        &request,
        config,
        BackgroundWorkerSignal::new(),
        Arc::new(NoopCompactionStatePreloader),
        &|| false,
    )
}

/// Every column of one rowset, segments concatenated.
fn read_rowset(manager: &Manager, tablet_id: TabletId, rowset_id: RowsetId) -> RecordBatch {
    let tablet = manager.get_tablet(tablet_id).unwrap();
    let rowset = tablet.get_rowsets(&[rowset_id]).unwrap().remove(0);
    let schema = tablet.schema().to_arrow_schema();
    let all: Vec<usize> = (0..tablet.schema().num_columns()).collect();
    let mut batches = Vec::new();
    for segment in rowset.segments(LakeIoOptions::default(), false).unwrap() {
        for batch in segment.read_columns(&all, 1024).unwrap() {
            batches.push(batch.unwrap());
        }
    }
    concat_batches(&schema, &batches).unwrap()
}

fn assert_no_orphans(pager: &MemPager, manager: &Manager) {
    let reachable = manager.collect_reachable_keys().unwrap();
    for key in pager.enumerate_keys().unwrap() {
        assert!(reachable.contains(&key), "orphan blob {key}");
    }
}

fn write_ab(manager: &Manager, tablet_id: TabletId) -> (RowsetId, RowsetId) {
    let a = manager
        .write_rowset(
            tablet_id,
            vec![int64_batch(&[("k", vec![1, 2]), ("v", vec![10, 20])])],
            false,
        )
        .unwrap();
    let b = manager
        .write_rowset(
            tablet_id,
            vec![int64_batch(&[("k", vec![2, 3]), ("v", vec![21, 30])])],
            false,
        )
        .unwrap();
    (a, b)
}

#[test]
fn test_primary_key_newest_rowset_wins() {
    let dir = TempDir::new().unwrap();
    let (pager, manager, tablet_id) = setup(kv_schema(KeysType::PrimaryKeys));
    let (a, b) = write_ab(&manager, tablet_id);

    let log = compact(&manager, tablet_id, 11, vec![a, b], config(&dir)).unwrap();
    let op = &log.op_compaction;
    assert_eq!(op.input_rowsets, vec![a, b]);
    assert_eq!(op.output_rowset.num_rows, 3);
    assert!(!op.output_rowset.overlapped);
    assert_eq!(manager.get_txn_log(tablet_id, 11).unwrap(), log);
    assert_no_orphans(&pager, &manager);

    // The rows mapper points every output row at its winning source row.
    let mapper = read_rows_mapper(pager.as_ref(), op.rows_mapper.as_ref().unwrap()).unwrap();
    assert_eq!(
        mapper,
        vec![rssid_rowid(a, 0), rssid_rowid(b, 0), rssid_rowid(b, 1)]
    );

    let output = manager.publish_compaction(tablet_id, 11).unwrap();
    let batch = read_rowset(&manager, tablet_id, output);
    assert_eq!(int64_column(&batch, "k"), vec![1, 2, 3]);
    assert_eq!(int64_column(&batch, "v"), vec![10, 21, 30]);
    assert_eq!(manager.get_tablet(tablet_id).unwrap().rowsets().len(), 1);
}

#[test]
fn test_key_pass_marks_superseded_rows() {
    let dir = TempDir::new().unwrap();
    let schema = kv_schema(KeysType::PrimaryKeys);
    let (_pager, manager, tablet_id) = setup(schema.clone());
    let (a, b) = write_ab(&manager, tablet_id);
    let rowsets = manager.get_tablet(tablet_id).unwrap().get_rowsets(&[a, b]).unwrap();
    let params = TabletReaderParams {
        chunk_size: 1024,
        fill_data_cache: false,
    };

    let mut buffer = RowSourceMaskBuffer::new(tablet_id, 1 << 20, 4096, dir.path());
    let mut masks = Vec::new();
    {
        let mut reader = TabletReader::new(&schema, vec![0], &rowsets, true, &mut buffer).unwrap();
        reader.open(params).unwrap();
        assert_eq!(reader.num_sources(), 2);
        let chunk = reader.get_next(Some(&mut masks), None).unwrap().unwrap();
        assert_eq!(int64_column(&chunk, "k"), vec![1, 2, 3]);
        assert!(reader.get_next(Some(&mut masks), None).unwrap().is_none());
        assert_eq!(reader.stats().duplicate_rows, 1);
    }
    assert_eq!(
        masks,
        vec![
            RowSourceMask::new(0, false),
            RowSourceMask::new(0, true),
            RowSourceMask::new(1, false),
            RowSourceMask::new(1, false),
        ]
    );
    buffer.write(&masks).unwrap();
    buffer.flush().unwrap();

    buffer.flip_to_read().unwrap();
    let mut reader = TabletReader::new(&schema, vec![1], &rowsets, false, &mut buffer).unwrap();
    reader.open(params).unwrap();
    let chunk = reader.get_next(None, None).unwrap().unwrap();
    assert_eq!(int64_column(&chunk, "v"), vec![10, 21, 30]);
    assert!(reader.get_next(None, None).unwrap().is_none());
    assert_eq!(reader.mask_buffer().consumed(), 4);
}

#[test]
fn test_mask_shortfall_is_internal_error() {
    let dir = TempDir::new().unwrap();
    let schema = kv_schema(KeysType::DupKeys);
    let (_pager, manager, tablet_id) = setup(schema.clone());
    let (a, b) = write_ab(&manager, tablet_id);
    let rowsets = manager.get_tablet(tablet_id).unwrap().get_rowsets(&[a, b]).unwrap();

    // Three masks for four input rows.
    let mut buffer = RowSourceMaskBuffer::new(tablet_id, 1 << 20, 4096, dir.path());
    buffer
        .write(&[
            RowSourceMask::new(0, false),
            RowSourceMask::new(0, false),
            RowSourceMask::new(1, false),
        ])
        .unwrap();
    buffer.flush().unwrap();
    buffer.flip_to_read().unwrap();

    let mut reader = TabletReader::new(&schema, vec![1], &rowsets, false, &mut buffer).unwrap();
    reader
        .open(TabletReaderParams {
            chunk_size: 8,
            fill_data_cache: false,
        })
        .unwrap();
    let chunk = reader.get_next(None, None).unwrap().unwrap();
    assert_eq!(chunk.num_rows(), 3);
    assert!(matches!(reader.get_next(None, None), Err(Error::Internal(_))));
}

#[test]
fn test_duplicate_keys_are_all_kept() {
    let dir = TempDir::new().unwrap();
    let (_pager, manager, tablet_id) = setup(kv_schema(KeysType::DupKeys));
    let (a, b) = write_ab(&manager, tablet_id);

    let log = compact(&manager, tablet_id, 3, vec![a, b], config(&dir)).unwrap();
    assert!(log.op_compaction.rows_mapper.is_none());
    let output = manager.publish_compaction(tablet_id, 3).unwrap();
    let batch = read_rowset(&manager, tablet_id, output);
    assert_eq!(int64_column(&batch, "k"), vec![1, 2, 2, 3]);
    assert_eq!(int64_column(&batch, "v"), vec![10, 20, 21, 30]);
}

#[test]
fn test_column_groups_follow_max_columns_per_group() {
    assert_eq!(
        split_column_into_groups(6, &[0], 2),
        vec![vec![0], vec![1, 2], vec![3, 4], vec![5]]
    );

    let dir = TempDir::new().unwrap();
    let (pager, manager, tablet_id) = setup(wide_schema(KeysType::UniqueKeys, 5));
    let r0 = manager
        .write_rowset(tablet_id, vec![wide_batch(&[0, 3, 6, 9, 12, 15], 5, 0)], false)
        .unwrap();
    let r1 = manager
        .write_rowset(
            tablet_id,
            vec![
                wide_batch(&[1, 3, 5], 5, 1),
                wide_batch(&[7, 9, 11], 5, 1),
            ],
            false,
        )
        .unwrap();
    let r2 = manager
        .write_rowset(tablet_id, vec![wide_batch(&[2, 9, 14], 5, 2)], false)
        .unwrap();

    // Size segments to hold four rows each.
    let tablet = manager.get_tablet(tablet_id).unwrap();
    let rowsets = tablet.get_rowsets(&[r0, r1, r2]).unwrap();
    let rows: u64 = rowsets.iter().map(|r| r.num_rows()).sum();
    let size: u64 = rowsets.iter().map(|r| r.data_size()).sum();
    let avg_row_size = size / (rows + 1) + 1;
    let config = config(&dir)
        .with_max_columns_per_group(2)
        .with_vector_chunk_size(3)
        .with_max_segment_file_size((avg_row_size * 4) as usize);

    let context = Arc::new(CompactionTaskContext::new(tablet_id, 21, tablet.version()));
    let task = VerticalCompactionTask::new(tablet, rowsets, Arc::clone(&context), config);
    let log = task.execute(&|| false).unwrap();

    let mut expected: BTreeMap<i64, i64> = BTreeMap::new();
    for (tag, keys) in [
        (0, vec![0, 3, 6, 9, 12, 15]),
        (1, vec![1, 3, 5, 7, 9, 11]),
        (2, vec![2, 9, 14]),
    ] {
        for k in keys {
            expected.insert(k, tag);
        }
    }
    let out_rows = log.op_compaction.output_rowset.num_rows;
    assert_eq!(out_rows, expected.len() as u64);
    assert_eq!(log.op_compaction.output_rowset.num_segments(), 3);
    for segment in &log.op_compaction.output_rowset.segments {
        assert!(segment.size > 0);
    }

    let stats = context.stats();
    assert_eq!(stats.column_groups, 4);
    assert_eq!(stats.input_rows, 15);
    assert_eq!(stats.output_rows, out_rows);
    assert!(stats.bytes_written > 0);
    assert_no_orphans(&pager, &manager);

    let output = manager.publish_compaction(tablet_id, 21).unwrap();
    let batch = read_rowset(&manager, tablet_id, output);
    let keys: Vec<i64> = expected.keys().copied().collect();
    assert_eq!(int64_column(&batch, "k"), keys);
    for i in 1..=5i64 {
        let want: Vec<i64> = expected
            .iter()
            .map(|(k, tag)| tag * 1000 + k * 10 + i)
            .collect();
        assert_eq!(int64_column(&batch, &format!("c{i}")), want, "column c{i}");
    }
}

#[test]
fn test_spilled_masks_replay_across_groups() {
    let dir = TempDir::new().unwrap();
    let (_pager, manager, tablet_id) = setup(wide_schema(KeysType::PrimaryKeys, 3));
    let inputs: Vec<(i64, Vec<i64>)> = vec![
        (0, (0..50).collect()),
        (1, (25..75).collect()),
        (2, (0..100).step_by(2).collect()),
    ];
    let mut ids = Vec::new();
    let mut expected: BTreeMap<i64, i64> = BTreeMap::new();
    for (tag, keys) in &inputs {
        ids.push(
            manager
                .write_rowset(tablet_id, vec![wide_batch(keys, 3, *tag)], false)
                .unwrap(),
        );
        for k in keys {
            expected.insert(*k, *tag);
        }
    }

    let config = config(&dir)
        .with_max_columns_per_group(1)
        .with_vector_chunk_size(7)
        .with_mask_buffer_memory_limit(8)
        .with_stream_buffer_size(16);
    compact(&manager, tablet_id, 5, ids, config).unwrap();
    let output = manager.publish_compaction(tablet_id, 5).unwrap();
    let batch = read_rowset(&manager, tablet_id, output);

    assert_eq!(
        int64_column(&batch, "k"),
        expected.keys().copied().collect::<Vec<_>>()
    );
    for i in 1..=3i64 {
        let want: Vec<i64> = expected
            .iter()
            .map(|(k, tag)| tag * 1000 + k * 10 + i)
            .collect();
        assert_eq!(int64_column(&batch, &format!("c{i}")), want);
    }
}

#[test]
fn test_overlapped_rowset_merges_its_segments() {
    let dir = TempDir::new().unwrap();
    let (_pager, manager, tablet_id) = setup(kv_schema(KeysType::PrimaryKeys));
    let rowset = manager
        .write_rowset(
            tablet_id,
            vec![
                int64_batch(&[("k", vec![1, 4, 6]), ("v", vec![10, 40, 60])]),
                int64_batch(&[("k", vec![2, 4, 5]), ("v", vec![20, 41, 50])]),
            ],
            true,
        )
        .unwrap();
    assert!(
        manager.get_tablet(tablet_id).unwrap().rowsets()[0].is_overlapped()
    );

    compact(&manager, tablet_id, 9, vec![rowset], config(&dir)).unwrap();
    let output = manager.publish_compaction(tablet_id, 9).unwrap();
    let batch = read_rowset(&manager, tablet_id, output);
    assert_eq!(int64_column(&batch, "k"), vec![1, 2, 4, 5, 6]);
    assert_eq!(int64_column(&batch, "v"), vec![10, 20, 41, 50, 60]);
}

#[test]
fn test_explicit_sort_key_leads_key_group() {
    let dir = TempDir::new().unwrap();
    let schema = kv_schema(KeysType::DupKeys).with_sort_key_idxes(vec![1]).unwrap();
    let (_pager, manager, tablet_id) = setup(schema);
    let a = manager
        .write_rowset(
            tablet_id,
            vec![int64_batch(&[("k", vec![5, 6]), ("v", vec![1, 3])])],
            false,
        )
        .unwrap();
    let b = manager
        .write_rowset(
            tablet_id,
            vec![int64_batch(&[("k", vec![7, 8]), ("v", vec![2, 4])])],
            false,
        )
        .unwrap();

    compact(&manager, tablet_id, 2, vec![a, b], config(&dir)).unwrap();
    let output = manager.publish_compaction(tablet_id, 2).unwrap();
    let batch = read_rowset(&manager, tablet_id, output);
    assert_eq!(int64_column(&batch, "v"), vec![1, 2, 3, 4]);
    assert_eq!(int64_column(&batch, "k"), vec![5, 7, 6, 8]);
}

#[test]
fn test_explicit_sort_key_on_key_tables_must_be_the_key() {
    for keys_type in [KeysType::PrimaryKeys, KeysType::UniqueKeys] {
        // A value-column sort key would make distinct keys with equal values
        // look like duplicates.
        let err = kv_schema(keys_type).with_sort_key_idxes(vec![1]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgumentError(_)), "{err:?}");

        let dir = TempDir::new().unwrap();
        let schema = kv_schema(keys_type).with_sort_key_idxes(vec![0]).unwrap();
        let (_pager, manager, tablet_id) = setup(schema);
        let a = manager
            .write_rowset(
                tablet_id,
                vec![int64_batch(&[("k", vec![1]), ("v", vec![5])])],
                false,
            )
            .unwrap();
        let b = manager
            .write_rowset(
                tablet_id,
                vec![int64_batch(&[("k", vec![1, 2]), ("v", vec![6, 5])])],
                false,
            )
            .unwrap();

        let log = compact(&manager, tablet_id, 2, vec![a, b], config(&dir)).unwrap();
        assert_eq!(log.op_compaction.output_rowset.num_rows, 2);
        let output = manager.publish_compaction(tablet_id, 2).unwrap();
        let batch = read_rowset(&manager, tablet_id, output);
        assert_eq!(int64_column(&batch, "k"), vec![1, 2]);
        assert_eq!(int64_column(&batch, "v"), vec![6, 5]);
    }
}

#[test]
fn test_char_columns_are_padded() {
    let dir = TempDir::new().unwrap();
    let schema = TabletSchema::new(
        1,
        KeysType::DupKeys,
        vec![
            TabletColumn::key("k", ColumnType::Int64),
            TabletColumn::value("code", ColumnType::Char(4)),
        ],
    )
    .unwrap();
    let (_pager, manager, tablet_id) = setup(schema);
    let arrow_schema = Arc::new(Schema::new(vec![
        Field::new("k", DataType::Int64, false),
        Field::new("code", DataType::Utf8, true),
    ]));
    let batch = |keys: Vec<i64>, codes: Vec<&str>| {
        RecordBatch::try_new(
            Arc::clone(&arrow_schema),
            vec![
                Arc::new(Int64Array::from(keys)) as ArrayRef,
                Arc::new(StringArray::from(codes)) as ArrayRef,
            ],
        )
        .unwrap()
    };
    let a = manager
        .write_rowset(tablet_id, vec![batch(vec![1], vec!["ab"])], false)
        .unwrap();
    let b = manager
        .write_rowset(tablet_id, vec![batch(vec![2], vec!["wxyz"])], false)
        .unwrap();

    compact(&manager, tablet_id, 4, vec![a, b], config(&dir)).unwrap();
    let output = manager.publish_compaction(tablet_id, 4).unwrap();
    let batch = read_rowset(&manager, tablet_id, output);
    assert_eq!(
        utf8_column(&batch, "code"),
        vec!["ab\0\0".to_string(), "wxyz".to_string()]
    );
}

#[test]
fn test_cancel_before_first_chunk_stores_nothing() {
    let dir = TempDir::new().unwrap();
    let (pager, manager, tablet_id) = setup(kv_schema(KeysType::PrimaryKeys));
    let (a, b) = write_ab(&manager, tablet_id);
    let before = manager.txn_logs(tablet_id).unwrap();

    let tablet = manager.get_tablet(tablet_id).unwrap();
    let rowsets = tablet.get_rowsets(&[a, b]).unwrap();
    let context = Arc::new(CompactionTaskContext::new(tablet_id, 8, tablet.version()));
    let task = VerticalCompactionTask::new(tablet, rowsets, Arc::clone(&context), config(&dir));

    // Polls: task start, key group boundary, first chunk.
    let polls = Cell::new(0);
    let res = task.execute(&|| {
        polls.set(polls.get() + 1);
        polls.get() >= 3
    });
    assert!(matches!(res, Err(ref e) if e.is_cancelled()));
    assert_eq!(polls.get(), 3);
    assert_eq!(manager.txn_logs(tablet_id).unwrap(), before);
    assert!(matches!(
        manager.get_txn_log(tablet_id, 8),
        Err(Error::NotFound)
    ));
    assert!(context.progress.value() < 100);
    assert_no_orphans(&pager, &manager);
}

#[test]
fn test_background_stop_mid_group_discards_output() {
    let dir = TempDir::new().unwrap();
    let (pager, manager, tablet_id) = setup(wide_schema(KeysType::DupKeys, 4));
    let evens: Vec<i64> = (0..20).step_by(2).collect();
    let odds: Vec<i64> = (1..20).step_by(2).collect();
    let a = manager
        .write_rowset(tablet_id, vec![wide_batch(&evens, 4, 0)], false)
        .unwrap();
    let b = manager
        .write_rowset(tablet_id, vec![wide_batch(&odds, 4, 1)], false)
        .unwrap();

    let tablet = manager.get_tablet(tablet_id).unwrap();
    let rowsets = tablet.get_rowsets(&[a, b]).unwrap();
    let context = Arc::new(CompactionTaskContext::new(tablet_id, 30, tablet.version()));
    let signal = BackgroundWorkerSignal::new();
    let config = config(&dir)
        .with_max_columns_per_group(2)
        .with_vector_chunk_size(2);
    let task = VerticalCompactionTask::new(tablet, rowsets, Arc::clone(&context), config)
        .with_background_signal(signal.clone());

    // Groups are [k], [c1, c2], [c3, c4]; the key group ends at 33%.
    let res = task.execute(&|| {
        if context.progress.value() > 33 {
            signal.stop();
        }
        false
    });
    match res {
        Err(Error::Cancelled(reason)) => assert!(reason.contains("background")),
        other => panic!("expected cancellation, got {other:?}"),
    }
    let progress = context.progress.value();
    assert!(progress > 33 && progress < 67, "progress {progress}");
    assert!(manager.txn_logs(tablet_id).unwrap().is_empty());
    assert_no_orphans(&pager, &manager);
}

#[test]
fn test_discarded_output_blobs_are_freed() {
    init_tracing_for_tests();
    let dir = TempDir::new().unwrap();
    let (pager, stats) = InstrumentedPager::new(MemPager::new());
    let pager = Arc::new(pager);
    let manager = TabletManager::open(Arc::clone(&pager)).unwrap();
    let tablet_id = manager
        .create_tablet(wide_schema(KeysType::DupKeys, 4))
        .unwrap();
    let keys: Vec<i64> = (0..12).collect();
    let a = manager
        .write_rowset(tablet_id, vec![wide_batch(&keys[..6], 4, 0)], false)
        .unwrap();
    let b = manager
        .write_rowset(tablet_id, vec![wide_batch(&keys[6..], 4, 1)], false)
        .unwrap();

    let tablet = manager.get_tablet(tablet_id).unwrap();
    let rowsets = tablet.get_rowsets(&[a, b]).unwrap();
    let context = Arc::new(CompactionTaskContext::new(tablet_id, 31, tablet.version()));
    let signal = BackgroundWorkerSignal::new();
    let config = config(&dir)
        .with_max_columns_per_group(2)
        .with_vector_chunk_size(2);
    let task = VerticalCompactionTask::new(tablet, rowsets, Arc::clone(&context), config)
        .with_background_signal(signal.clone());

    let before = stats.snapshot();
    let res = task.execute(&|| {
        if context.progress.value() > 33 {
            signal.stop();
        }
        false
    });
    assert!(matches!(res, Err(Error::Cancelled(_))), "{res:?}");

    // The key group's part blobs were stored, then released on close.
    let delta = stats.snapshot().delta_since(&before);
    assert!(delta.physical_puts > 0);
    assert!(delta.free_batches >= 1);
    assert_eq!(delta.net_puts(), 0);

    let reachable = manager.collect_reachable_keys().unwrap();
    for key in pager.inner().enumerate_keys().unwrap() {
        assert!(reachable.contains(&key), "orphan blob {key}");
    }
}

#[test]
fn test_progress_is_monotonic_and_ends_at_100() {
    let dir = TempDir::new().unwrap();
    let (_pager, manager, tablet_id) = setup(wide_schema(KeysType::DupKeys, 2));
    let a = manager
        .write_rowset(tablet_id, vec![wide_batch(&(0..30).collect::<Vec<_>>(), 2, 0)], false)
        .unwrap();
    let b = manager
        .write_rowset(tablet_id, vec![wide_batch(&(10..40).collect::<Vec<_>>(), 2, 1)], false)
        .unwrap();

    let tablet = manager.get_tablet(tablet_id).unwrap();
    let rowsets = tablet.get_rowsets(&[a, b]).unwrap();
    let context = Arc::new(CompactionTaskContext::new(tablet_id, 12, tablet.version()));
    let config = config(&dir)
        .with_max_columns_per_group(1)
        .with_vector_chunk_size(4);
    let task = VerticalCompactionTask::new(tablet, rowsets, Arc::clone(&context), config);

    let samples = RefCell::new(Vec::new());
    task.execute(&|| {
        samples.borrow_mut().push(context.progress.value());
        false
    })
    .unwrap();

    let samples = samples.into_inner();
    assert!(samples.len() > 10);
    assert!(samples.windows(2).all(|w| w[0] <= w[1]), "{samples:?}");
    assert!(samples.iter().all(|&p| p < 100));
    assert_eq!(context.progress.value(), 100);
}

#[test]
fn test_memory_limit_exceeded() {
    let dir = TempDir::new().unwrap();
    let (pager, manager, tablet_id) = setup(kv_schema(KeysType::PrimaryKeys));
    let (a, b) = write_ab(&manager, tablet_id);

    let res = compact(
        &manager,
        tablet_id,
        6,
        vec![a, b],
        config(&dir).with_memory_limit_per_worker(1),
    );
    assert!(matches!(res, Err(Error::ResourceExceeded(_))));
    assert!(manager.txn_logs(tablet_id).unwrap().is_empty());
    assert_no_orphans(&pager, &manager);

    // The same limit passes with the check disabled.
    let log = compact(
        &manager,
        tablet_id,
        6,
        vec![a, b],
        config(&dir)
            .with_memory_limit_per_worker(1)
            .with_memory_check(false),
    )
    .unwrap();
    assert_eq!(log.op_compaction.output_rowset.num_rows, 3);
}

#[test]
fn test_rows_held_by_writer_count_against_memory_limit() {
    let dir = TempDir::new().unwrap();
    let (pager, manager, tablet_id) = setup(kv_schema(KeysType::DupKeys));
    let rows = 10_000i64;
    let evens: Vec<i64> = (0..rows).map(|i| i * 2).collect();
    let odds: Vec<i64> = (0..rows).map(|i| i * 2 + 1).collect();
    let a = manager
        .write_rowset(
            tablet_id,
            vec![int64_batch(&[("k", evens.clone()), ("v", evens)])],
            false,
        )
        .unwrap();
    let b = manager
        .write_rowset(
            tablet_id,
            vec![int64_batch(&[("k", odds.clone()), ("v", odds)])],
            false,
        )
        .unwrap();

    // Reader and masks stay far below the limit; the key group's 20k rows
    // buffered for one output segment do not.
    let limit = 64 * 1024;
    let small = || {
        config(&dir)
            .with_memory_limit_per_worker(limit)
            .with_vector_chunk_size(64)
            .with_mask_buffer_memory_limit(1024)
            .with_stream_buffer_size(1024)
    };

    let tablet = manager.get_tablet(tablet_id).unwrap();
    let rowsets = tablet.get_rowsets(&[a, b]).unwrap();
    let context = Arc::new(CompactionTaskContext::new(tablet_id, 8, tablet.version()));
    let task = VerticalCompactionTask::new(tablet, rowsets, Arc::clone(&context), small());
    let res = task.execute(&|| false);
    assert!(matches!(res, Err(Error::ResourceExceeded(_))), "{res:?}");
    // Tripped while the key group was being merged, not up front.
    assert!(context.progress.value() > 0);
    assert!(task.mem_tracker().peak_consumption() > limit as i64);
    assert_eq!(task.mem_tracker().consumption(), 0);
    assert!(manager.txn_logs(tablet_id).unwrap().is_empty());
    assert_no_orphans(&pager, &manager);

    let log = compact(&manager, tablet_id, 8, vec![a, b], small().with_memory_check(false))
        .unwrap();
    assert_eq!(log.op_compaction.output_rowset.num_rows, 2 * rows as u64);
}

struct RecordingPreloader {
    calls: Mutex<Vec<TxnId>>,
    fail: bool,
}

impl CompactionStatePreloader<MemPager> for RecordingPreloader {
    fn preload_compaction_state(
        &self,
        txn_log: &TxnLog,
        tablet: &Tablet<MemPager>,
        schema: &TabletSchema,
    ) -> Result<()> {
        assert_eq!(txn_log.tablet_id, tablet.id());
        assert!(schema.is_primary_key());
        self.calls.lock().unwrap().push(txn_log.txn_id);
        if self.fail {
            return Err(Error::Internal("delta state unavailable".into()));
        }
        Ok(())
    }
}

#[test]
fn test_preload_runs_for_primary_keys_and_failure_is_not_fatal() {
    let dir = TempDir::new().unwrap();
    for (keys_type, fail, expected_calls) in [
        (KeysType::PrimaryKeys, false, vec![40]),
        (KeysType::PrimaryKeys, true, vec![40]),
        (KeysType::UniqueKeys, false, vec![]),
    ] {
        let (_pager, manager, tablet_id) = setup(kv_schema(keys_type));
        let (a, b) = write_ab(&manager, tablet_id);
        let preloader = Arc::new(RecordingPreloader {
            calls: Mutex::new(Vec::new()),
            fail,
        });
        let request = CompactionRequest {
            tablet_id,
            txn_id: 40,
            input_rowsets: vec![a, b],
            schema_version: 1,
        };
        let log = compact_tablet(
            &manager,
            &request,
            config(&dir),
            BackgroundWorkerSignal::new(),
            Arc::clone(&preloader) as Arc<dyn CompactionStatePreloader<MemPager>>,
            &|| false,
        )
        .unwrap();
        assert_eq!(manager.get_txn_log(tablet_id, 40).unwrap(), log);
        assert_eq!(*preloader.calls.lock().unwrap(), expected_calls);
    }
}

#[test]
fn test_light_publish_disabled_skips_rows_mapper() {
    let dir = TempDir::new().unwrap();
    let (_pager, manager, tablet_id) = setup(kv_schema(KeysType::PrimaryKeys));
    let (a, b) = write_ab(&manager, tablet_id);
    let log = compact(
        &manager,
        tablet_id,
        1,
        vec![a, b],
        config(&dir).with_light_pk_compaction_publish(false),
    )
    .unwrap();
    assert!(log.op_compaction.rows_mapper.is_none());
    assert_eq!(log.op_compaction.output_rowset.num_rows, 3);
}

#[test]
fn test_request_validation() {
    let dir = TempDir::new().unwrap();
    let (_pager, manager, tablet_id) = setup(kv_schema(KeysType::PrimaryKeys));
    let (a, _b) = write_ab(&manager, tablet_id);

    let mut request = CompactionRequest {
        tablet_id,
        txn_id: 1,
        input_rowsets: vec![a],
        schema_version: 2,
    };
    let run = |request: &CompactionRequest| {
        compact_tablet(
            &manager,
            request,
            config(&dir),
            BackgroundWorkerSignal::new(),
            Arc::new(NoopCompactionStatePreloader),
            &|| false,
        )
    };
    assert!(matches!(run(&request), Err(Error::InvalidArgumentError(_))));

    request.schema_version = 1;
    request.input_rowsets = vec![a, 99];
    assert!(matches!(run(&request), Err(Error::InvalidArgumentError(_))));

    request.input_rowsets.clear();
    assert!(matches!(run(&request), Err(Error::InvalidArgumentError(_))));

    request.tablet_id = TabletId(77);
    assert!(run(&request).is_err());
}

#[test]
fn test_background_stop_before_start() {
    let dir = TempDir::new().unwrap();
    let (_pager, manager, tablet_id) = setup(kv_schema(KeysType::PrimaryKeys));
    let (a, b) = write_ab(&manager, tablet_id);
    let signal = BackgroundWorkerSignal::new();
    signal.stop();
    let request = CompactionRequest {
        tablet_id,
        txn_id: 2,
        input_rowsets: vec![a, b],
        schema_version: 1,
    };
    let res = compact_tablet(
        &manager,
        &request,
        config(&dir),
        signal,
        Arc::new(NoopCompactionStatePreloader),
        &|| false,
    );
    assert!(matches!(res, Err(Error::Cancelled(_))));
}

#[test]
fn test_compacting_empty_rowsets() {
    let dir = TempDir::new().unwrap();
    let (_pager, manager, tablet_id) = setup(wide_schema(KeysType::DupKeys, 2));
    let a = manager.write_rowset(tablet_id, Vec::new(), false).unwrap();
    let b = manager.write_rowset(tablet_id, Vec::new(), false).unwrap();

    let log = compact(
        &manager,
        tablet_id,
        3,
        vec![a, b],
        config(&dir).with_max_columns_per_group(1),
    )
    .unwrap();
    assert_eq!(log.op_compaction.output_rowset.num_rows, 0);
    assert!(log.op_compaction.output_rowset.segments.is_empty());
}

#[test]
fn test_output_can_be_compacted_again() {
    let dir = TempDir::new().unwrap();
    let (_pager, manager, tablet_id) = setup(kv_schema(KeysType::PrimaryKeys));
    let (a, b) = write_ab(&manager, tablet_id);
    compact(&manager, tablet_id, 1, vec![a, b], config(&dir)).unwrap();
    let first = manager.publish_compaction(tablet_id, 1).unwrap();

    let c = manager
        .write_rowset(
            tablet_id,
            vec![int64_batch(&[("k", vec![1, 4]), ("v", vec![11, 40])])],
            false,
        )
        .unwrap();
    compact(&manager, tablet_id, 2, vec![first, c], config(&dir)).unwrap();

    // Publishing the first log again fails: its inputs are gone.
    assert!(matches!(
        manager.publish_compaction(tablet_id, 1),
        Err(Error::InvalidState(_))
    ));
    let second = manager.publish_compaction(tablet_id, 2).unwrap();
    let batch = read_rowset(&manager, tablet_id, second);
    assert_eq!(int64_column(&batch, "k"), vec![1, 2, 3, 4]);
    assert_eq!(int64_column(&batch, "v"), vec![11, 21, 30, 40]);
}
