use std::sync::Arc;
use std::thread;

use proxima::prelude::*;
use proxima::object::impls::FloatVector;

fn obj(locator: &str, value: f32) -> MetricObject<FloatVector> {
    MetricObject::new(locator, FloatVector::new(vec![value]))
}

#[test]
fn bucket_ids_survive_removal_without_reuse() {
    let dispatcher: BucketDispatcher<FloatVector> = BucketDispatcher::new(DispatcherConfig {
        max_buckets: 1,
        ..DispatcherConfig::default()
    });

    let first = dispatcher.create_bucket().unwrap();
    assert_eq!(first.id(), 1);
    dispatcher.remove_bucket(1, true).unwrap();

    let second = dispatcher.create_bucket().unwrap();
    assert_eq!(second.id(), 2);
    assert!(dispatcher.get_bucket(1).is_err());
}

#[test]
fn no_dup_bucket_full_lifecycle() {
    let dispatcher: BucketDispatcher<FloatVector> = BucketDispatcher::new(DispatcherConfig {
        max_buckets: 8,
        defaults: BucketConfig {
            capacity: 3,
            soft_capacity: 3,
            variant: BucketVariant::NoDup,
            ..BucketConfig::default()
        },
    });
    let bucket = dispatcher.create_bucket().unwrap();

    bucket.insert(obj("a", 1.0)).unwrap();
    bucket.insert(obj("b", 2.0)).unwrap();
    assert!(matches!(
        bucket.insert(obj("a2", 1.0)),
        Err(ProximaError::DuplicateObject(_))
    ));

    bucket.insert(obj("c", 3.0)).unwrap();
    assert!(matches!(
        bucket.insert(obj("d", 4.0)),
        Err(ProximaError::CapacityExceeded(_))
    ));

    bucket.delete(DeleteMatch::Locator("b"), 0).unwrap();
    bucket.insert(obj("b", 2.0)).unwrap();
    assert_eq!(bucket.object_count(), 3);
}

#[test]
fn concurrent_inserts_respect_capacity() {
    let dispatcher: BucketDispatcher<FloatVector> = BucketDispatcher::new(DispatcherConfig {
        max_buckets: 1,
        defaults: BucketConfig {
            capacity: 50,
            soft_capacity: 50,
            ..BucketConfig::default()
        },
    });
    let bucket = dispatcher.create_bucket().unwrap();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let bucket = Arc::clone(&bucket);
            thread::spawn(move || {
                let mut accepted = 0;
                for i in 0..25 {
                    if bucket.insert(obj(&format!("t{t}-{i}"), (t * 25 + i) as f32)).is_ok() {
                        accepted += 1;
                    }
                }
                accepted
            })
        })
        .collect();

    let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(accepted, 50);
    assert_eq!(bucket.object_count(), 50);
    assert_eq!(bucket.occupation(), 50);
}

#[test]
fn move_bucket_between_dispatchers() {
    let source: BucketDispatcher<FloatVector> =
        BucketDispatcher::new(DispatcherConfig::default());
    let target: BucketDispatcher<FloatVector> =
        BucketDispatcher::new(DispatcherConfig::default());

    let bucket = source.create_bucket().unwrap();
    for i in 0..5 {
        bucket.insert(obj(&format!("o{i}"), i as f32)).unwrap();
    }
    let old_id = bucket.id();

    let moved = source.move_bucket(old_id, &target).unwrap();
    assert_eq!(moved.object_count(), 5);
    assert_eq!(source.bucket_count(), 0);
    assert_eq!(target.bucket_count(), 1);
    assert_eq!(target.object_count(), 5);

    // Querying the moved bucket still works through its new owner.
    let managed = target.get_bucket(moved.id()).unwrap();
    let mut query = KnnQuery::new(obj("q", 2.2), 1);
    managed.evaluate(&mut query);
    assert_eq!(query.answer().first().unwrap().object().locator(), "o2");
}

#[test]
fn concurrent_opposite_moves_do_not_deadlock() {
    let a: Arc<BucketDispatcher<FloatVector>> =
        Arc::new(BucketDispatcher::new(DispatcherConfig::default()));
    let b: Arc<BucketDispatcher<FloatVector>> =
        Arc::new(BucketDispatcher::new(DispatcherConfig::default()));

    for _ in 0..4 {
        a.create_bucket().unwrap();
        b.create_bucket().unwrap();
    }

    let forward = {
        let (a, b) = (Arc::clone(&a), Arc::clone(&b));
        thread::spawn(move || {
            for id in a.bucket_ids() {
                a.move_bucket(id, &b).unwrap();
            }
        })
    };
    let backward = {
        let (a, b) = (Arc::clone(&a), Arc::clone(&b));
        thread::spawn(move || {
            for id in b.bucket_ids() {
                b.move_bucket(id, &a).unwrap();
            }
        })
    };
    forward.join().unwrap();
    backward.join().unwrap();

    assert_eq!(a.bucket_count() + b.bucket_count(), 8);
}
