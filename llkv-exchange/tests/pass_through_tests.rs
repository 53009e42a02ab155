//! Lifecycle and cross-thread use of pass-through chunk buffers.

use llkv_exchange::{PassThroughChunkBufferManager, PassThroughContext, UniqueId};
use llkv_test_utils::{init_tracing_for_tests, int64_batch, int64_column};
use std::sync::Arc;
use std::thread;

const QUERY: UniqueId = UniqueId::new(7, 1);
const FRAGMENT: UniqueId = UniqueId::new(7, 100);

#[test]
fn test_buffer_lives_until_last_instance_closes() {
    init_tracing_for_tests();
    let manager = PassThroughChunkBufferManager::new();
    assert!(manager.get(QUERY).is_none());

    let first = manager.open_fragment_instance(QUERY);
    let second = manager.open_fragment_instance(QUERY);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(manager.open_instances(QUERY), 2);
    assert_eq!(manager.len(), 1);

    manager.close_fragment_instance(QUERY);
    assert!(manager.get(QUERY).is_some());
    manager.close_fragment_instance(QUERY);
    assert!(manager.get(QUERY).is_none());
    assert!(manager.is_empty());

    // Closing again, or closing an unknown query, is a no-op.
    manager.close_fragment_instance(QUERY);
    manager.close_fragment_instance(UniqueId::new(0, 0));
    assert!(manager.is_empty());

    // A handle obtained before the last close keeps working.
    let ctx = PassThroughContext::new(first, FRAGMENT, 3);
    ctx.append_chunk(0, &int64_batch(&[("a", vec![1])]), 8);
    assert_eq!(ctx.pull_chunks(0).0.len(), 1);
}

#[test]
fn test_senders_stream_to_one_receiver() {
    init_tracing_for_tests();
    let manager = Arc::new(PassThroughChunkBufferManager::new());
    let buffer = manager.open_fragment_instance(QUERY);
    let receiver = PassThroughContext::new(Arc::clone(&buffer), FRAGMENT, 3);

    let handles: Vec<_> = (0..4)
        .map(|sender_id| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                let buffer = manager.open_fragment_instance(QUERY);
                let ctx = PassThroughContext::new(buffer, FRAGMENT, 3);
                for i in 0..10i64 {
                    let batch = int64_batch(&[("a", vec![sender_id as i64 * 100 + i])]);
                    ctx.append_chunk(sender_id, &batch, 8);
                }
                manager.close_fragment_instance(QUERY);
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for sender_id in 0..4 {
        let (chunks, bytes) = receiver.pull_chunks(sender_id);
        assert_eq!(bytes, vec![8; 10]);
        let values: Vec<i64> = chunks.iter().flat_map(|c| int64_column(c, "a")).collect();
        let expected: Vec<i64> = (0..10).map(|i| sender_id as i64 * 100 + i).collect();
        assert_eq!(values, expected);
    }
    // Another node of the same fragment sees nothing.
    let other = PassThroughContext::new(Arc::clone(&buffer), FRAGMENT, 4);
    assert!(other.pull_chunks(0).0.is_empty());
    assert_eq!(buffer.num_channels(), 2);

    assert_eq!(manager.open_instances(QUERY), 1);
    manager.close_fragment_instance(QUERY);
    assert!(manager.is_empty());
}
