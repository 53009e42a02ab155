//! Integration tests for TabletManager.

use llkv_result::Error;
use llkv_storage::pager::{MemPager, Pager};
use llkv_tablet::{
    ColumnType, KeysType, LakeIoOptions, OpCompaction, RowsetMetadata, TabletColumn,
    TabletManager, TabletSchema, TabletWriter, TabletWriterOptions, TxnLog,
};
use llkv_test_utils::{init_tracing_for_tests, int64_batch, int64_column};
use std::sync::Arc;

fn schema() -> TabletSchema {
    TabletSchema::new(
        1,
        KeysType::PrimaryKeys,
        vec![
            TabletColumn::key("k", ColumnType::Int64),
            TabletColumn::value("v", ColumnType::Int64),
        ],
    )
    .unwrap()
}

#[test]
fn test_rowsets_survive_reopen() {
    init_tracing_for_tests();
    let pager = Arc::new(MemPager::new());
    let manager = TabletManager::open(Arc::clone(&pager)).unwrap();
    let tablet_id = manager.create_tablet(schema()).unwrap();

    let first = manager
        .write_rowset(
            tablet_id,
            vec![
                int64_batch(&[("k", vec![1, 2]), ("v", vec![10, 20])]),
                int64_batch(&[("k", vec![3]), ("v", vec![30])]),
            ],
            false,
        )
        .unwrap();
    let second = manager
        .write_rowset(
            tablet_id,
            vec![int64_batch(&[("k", vec![2]), ("v", vec![21])])],
            false,
        )
        .unwrap();
    // A two-segment rowset reserves two ids.
    assert_eq!(second, first + 2);

    let reopened = TabletManager::open(Arc::clone(&pager)).unwrap();
    let tablet = reopened.get_tablet(tablet_id).unwrap();
    assert_eq!(tablet.version(), 3);
    let rowsets = tablet.rowsets();
    assert_eq!(rowsets.len(), 2);
    assert_eq!(rowsets[0].num_segments(), 2);
    assert_eq!(rowsets[0].num_rows(), 3);
    assert!(!rowsets[0].is_overlapped());
    assert_eq!(rowsets[0].rssid(1), first + 1);

    let segments = rowsets[0].segments(LakeIoOptions::default(), true).unwrap();
    let batch = segments[1].read_columns(&[1], 8).unwrap().next().unwrap().unwrap();
    assert_eq!(int64_column(&batch, "v"), vec![30]);

    assert!(matches!(
        tablet.get_rowsets(&[first, 77]),
        Err(Error::InvalidArgumentError(_))
    ));
}

#[test]
fn test_write_rowset_rejects_foreign_schema() {
    let manager = TabletManager::open(Arc::new(MemPager::new())).unwrap();
    let tablet_id = manager.create_tablet(schema()).unwrap();
    let res = manager.write_rowset(tablet_id, vec![int64_batch(&[("x", vec![1])])], false);
    assert!(matches!(res, Err(Error::InvalidArgumentError(_))));
}

#[test]
fn test_publish_compaction_swaps_rowsets() {
    init_tracing_for_tests();
    let pager = Arc::new(MemPager::new());
    let manager = TabletManager::open(Arc::clone(&pager)).unwrap();
    let tablet_id = manager.create_tablet(schema()).unwrap();
    let a = manager
        .write_rowset(tablet_id, vec![int64_batch(&[("k", vec![1]), ("v", vec![1])])], false)
        .unwrap();
    let b = manager
        .write_rowset(tablet_id, vec![int64_batch(&[("k", vec![2]), ("v", vec![2])])], false)
        .unwrap();

    // Hand-build an output rowset with the vertical writer.
    let tablet = manager.get_tablet(tablet_id).unwrap();
    let mut writer = tablet.new_writer(TabletWriterOptions {
        txn_id: 5,
        max_rows_per_segment: 100,
        is_compaction: true,
    });
    writer.open().unwrap();
    writer
        .write_columns(&int64_batch(&[("k", vec![1, 2])]), &[0], true, None)
        .unwrap();
    writer.flush_columns().unwrap();
    writer
        .write_columns(&int64_batch(&[("v", vec![1, 2])]), &[1], false, None)
        .unwrap();
    writer.flush_columns().unwrap();
    writer.finish().unwrap();

    let log = TxnLog {
        tablet_id,
        txn_id: 5,
        op_compaction: OpCompaction {
            input_rowsets: vec![a, b],
            output_rowset: RowsetMetadata {
                id: 0,
                segments: writer.files().to_vec(),
                num_rows: writer.num_rows(),
                data_size: writer.data_size(),
                overlapped: false,
                version: 0,
            },
            rows_mapper: None,
        },
    };
    tablet.put_txn_log(&log).unwrap();
    writer.close();
    assert_eq!(manager.txn_logs(tablet_id).unwrap(), vec![log.clone()]);

    // Everything in the pager is referenced by the catalog or the log.
    let reachable = manager.collect_reachable_keys().unwrap();
    for key in pager.enumerate_keys().unwrap() {
        assert!(reachable.contains(&key), "orphan blob {key}");
    }

    let output = manager.publish_compaction(tablet_id, 5).unwrap();
    let tablet = manager.get_tablet(tablet_id).unwrap();
    let rowsets = tablet.rowsets();
    assert_eq!(rowsets.len(), 1);
    assert_eq!(rowsets[0].id(), output);
    assert_eq!(rowsets[0].num_rows(), 2);

    // Inputs are gone; publishing again must fail.
    assert!(matches!(
        manager.publish_compaction(tablet_id, 5),
        Err(Error::InvalidState(_))
    ));
    assert!(matches!(manager.get_txn_log(tablet_id, 6), Err(Error::NotFound)));
}
