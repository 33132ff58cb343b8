// ============================================================================
// ConsumerRegistry Tests
// ============================================================================

use std::sync::Arc;
use std::thread;

use bytes::Bytes;

use super::{ChunkSink, ConsumerRegistry};
use crate::test_support::RecordingSink;

#[test]
fn test_register_and_unregister() {
    let registry = ConsumerRegistry::new();
    assert!(registry.is_empty());

    let a = registry.register(Arc::new(RecordingSink::new()));
    let b = registry.register(Arc::new(RecordingSink::new()));
    assert_ne!(a, b);
    assert_eq!(registry.len(), 2);

    assert!(registry.unregister(a));
    assert!(!registry.contains(a));
    assert!(registry.contains(b));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_unregister_unknown_is_noop() {
    let registry = ConsumerRegistry::new();
    let a = registry.register(Arc::new(RecordingSink::new()));
    assert!(registry.unregister(a));
    assert!(!registry.unregister(a));
    assert!(!registry.evict(a));
}

#[test]
fn test_snapshot_keeps_registration_order() {
    let registry = ConsumerRegistry::new();
    let ids: Vec<_> = (0..4)
        .map(|_| registry.register(Arc::new(RecordingSink::new())))
        .collect();
    registry.unregister(ids[1]);

    let snapshot: Vec<_> = registry.snapshot().into_iter().map(|(id, _)| id).collect();
    assert_eq!(snapshot, vec![ids[0], ids[2], ids[3]]);
}

#[test]
fn test_snapshot_is_detached_from_later_changes() {
    let registry = ConsumerRegistry::new();
    let first = Arc::new(RecordingSink::new());
    let id = registry.register(first.clone());

    let snapshot = registry.snapshot();
    registry.unregister(id);
    registry.register(Arc::new(RecordingSink::new()));

    // iteration over the old snapshot is unaffected by the mutation
    assert_eq!(snapshot.len(), 1);
    snapshot[0].1.write(&Bytes::from_static(b"x")).unwrap();
    assert_eq!(first.chunks(), vec![Bytes::from_static(b"x")]);
}

#[test]
fn test_evict_removes_sink() {
    let registry = ConsumerRegistry::new();
    let id = registry.register(Arc::new(RecordingSink::new()));
    assert!(registry.evict(id));
    assert!(registry.is_empty());
}

#[test]
fn test_concurrent_register_unregister() {
    let registry = Arc::new(ConsumerRegistry::new());
    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        handles.push(thread::spawn(move || {
            for _ in 0..100 {
                let id = registry.register(Arc::new(RecordingSink::new()));
                let _ = registry.snapshot();
                assert!(registry.unregister(id));
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    assert!(registry.is_empty());
}

#[test]
fn test_clear_drops_every_sink() {
    let registry = ConsumerRegistry::new();
    let a = registry.register(Arc::new(RecordingSink::new()));
    registry.register(Arc::new(RecordingSink::new()));

    assert_eq!(registry.clear(), 2);
    assert!(registry.is_empty());
    assert!(!registry.unregister(a));
    assert_eq!(registry.clear(), 0);
}
