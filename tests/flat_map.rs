//! Merge-engine behavior: concurrency cap, failure policies, drain
//! round-robin, and queue overflow.

use std::sync::{Arc, Mutex};

use riffle::{FlatMapConfig, Multi, StreamError};

pub mod common;

use common::{TestPublisher, TestSubscriber};

/// Mapper that hands out hand-driven inner publishers and records them.
fn tracked_inners() -> (
    Arc<Mutex<Vec<TestPublisher<u64>>>>,
    impl Fn(u64) -> Option<Multi<u64>> + Clone + Send + Sync + 'static,
) {
    let inners: Arc<Mutex<Vec<TestPublisher<u64>>>> = Arc::new(Mutex::new(Vec::new()));
    let mapper = {
        let inners = Arc::clone(&inners);
        move |_item: u64| {
            let publisher = TestPublisher::new();
            let multi = publisher.multi();
            inners.lock().unwrap().push(publisher);
            Some(multi)
        }
    };
    (inners, mapper)
}

#[test_log::test]
fn merges_mapped_streams_and_completes() {
    let subscriber = TestSubscriber::unbounded();
    Multi::from_iter(vec![1u64, 4, 7])
        .flat_map(|x| Some(Multi::from_iter(vec![x, x + 1, x + 2])))
        .subscribe_with(subscriber.clone());

    let mut items = subscriber.items();
    items.sort_unstable();
    assert_eq!(items, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    assert!(subscriber.is_completed());
    assert_eq!(subscriber.terminal_count(), 1);
}

#[test_log::test]
fn concurrency_cap_limits_simultaneous_inner_subscriptions() {
    let upstream = TestPublisher::new();
    let (inners, mapper) = tracked_inners();
    let subscriber = TestSubscriber::unbounded();
    upstream
        .multi()
        .flat_map_with(FlatMapConfig::new().max_concurrency(2), mapper)
        .subscribe_with(subscriber.clone());

    // The engine prefetches exactly `max_concurrency` from upstream.
    assert_eq!(upstream.requested(), 2);

    upstream.emit(1);
    upstream.emit(2);
    assert_eq!(inners.lock().unwrap().len(), 2);

    // Completing one inner frees one upstream slot.
    inners.lock().unwrap()[0].emit(10);
    inners.lock().unwrap()[0].complete();
    assert_eq!(upstream.requested(), 3);

    upstream.emit(3);
    assert_eq!(inners.lock().unwrap().len(), 3);

    inners.lock().unwrap()[1].emit(20);
    inners.lock().unwrap()[2].emit(30);
    inners.lock().unwrap()[1].complete();
    inners.lock().unwrap()[2].complete();
    upstream.complete();

    let mut items = subscriber.items();
    items.sort_unstable();
    assert_eq!(items, vec![10, 20, 30]);
    assert!(subscriber.is_completed());
}

#[test_log::test]
fn eager_failure_terminates_immediately() {
    let subscriber = TestSubscriber::unbounded();
    let sources = vec![
        Multi::from_iter(vec![1u64, 2]),
        Multi::failure(StreamError::Protocol("inner broke".to_owned())),
        Multi::from_iter(vec![3u64, 4]),
    ];
    Multi::from_iter(vec![0usize, 1, 2])
        .flat_map_with(FlatMapConfig::new().max_concurrency(1), move |i| {
            Some(sources[i].clone())
        })
        .subscribe_with(subscriber.clone());

    // The first stream drains, the failing one terminates everything; the
    // third is never subscribed.
    assert_eq!(subscriber.items(), vec![1, 2]);
    let failure = subscriber.failure().expect("failure expected");
    assert!(failure.is_protocol_violation());
    assert_eq!(subscriber.terminal_count(), 1);
}

#[test_log::test]
fn postponed_failure_surfaces_after_all_inners_drain() {
    let subscriber = TestSubscriber::unbounded();
    let sources = vec![
        Multi::from_iter(vec![1u64, 2]),
        Multi::failure(StreamError::Protocol("inner broke".to_owned())),
        Multi::from_iter(vec![3u64, 4]),
    ];
    Multi::from_iter(vec![0usize, 1, 2])
        .flat_map_with(
            FlatMapConfig::new().max_concurrency(1).postpone_failure(true),
            move |i| Some(sources[i].clone()),
        )
        .subscribe_with(subscriber.clone());

    // Both healthy streams deliver fully before the failure surfaces last.
    assert_eq!(subscriber.items(), vec![1, 2, 3, 4]);
    assert!(subscriber.failure().is_some());
    assert!(!subscriber.is_completed());
    assert_eq!(subscriber.terminal_count(), 1);
}

#[test_log::test]
fn absent_mapper_result_fails_and_cancels() {
    let upstream = TestPublisher::new();
    let subscriber = TestSubscriber::unbounded();
    upstream
        .multi()
        .flat_map(|_: u64| Option::<Multi<u64>>::None)
        .subscribe_with(subscriber.clone());

    upstream.emit(1);

    let failure = subscriber.failure().expect("failure expected");
    assert!(failure.is_protocol_violation());
    assert!(upstream.is_cancelled());
}

#[test_log::test]
fn queued_items_drain_round_robin_when_demand_arrives() {
    let upstream = TestPublisher::new();
    let (inners, mapper) = tracked_inners();
    let subscriber = TestSubscriber::new(0);
    upstream
        .multi()
        .flat_map_with(FlatMapConfig::new().max_concurrency(2), mapper)
        .subscribe_with(subscriber.clone());

    upstream.emit(1);
    upstream.emit(2);

    // No downstream demand yet: items park in the per-inner queues.
    inners.lock().unwrap()[0].emit(10);
    inners.lock().unwrap()[1].emit(20);
    assert_eq!(subscriber.item_count(), 0);

    subscriber.request(10);
    let mut items = subscriber.items();
    items.sort_unstable();
    assert_eq!(items, vec![10, 20]);

    // Demand satisfied from the queues; inners stay live until they finish.
    inners.lock().unwrap()[0].complete();
    inners.lock().unwrap()[1].complete();
    upstream.complete();
    assert!(subscriber.is_completed());
}

#[test_log::test]
fn inner_queue_overflow_is_a_back_pressure_failure() {
    let upstream = TestPublisher::new();
    let (inners, mapper) = tracked_inners();
    let subscriber = TestSubscriber::new(0);
    upstream
        .multi()
        .flat_map_with(FlatMapConfig::new().max_concurrency(1), mapper)
        .subscribe_with(subscriber.clone());

    upstream.emit(1);

    // Queue capacity equals the prefetch (1). The second item breaks the
    // demand contract and is rejected.
    inners.lock().unwrap()[0].emit(10);
    inners.lock().unwrap()[0].emit(11);

    // The failure surfaces once the upstream terminates.
    upstream.complete();

    let failure = subscriber.failure().expect("failure expected");
    assert!(failure.is_back_pressure());
    assert_eq!(subscriber.terminal_count(), 1);
}

#[test_log::test]
fn unbounded_demand_takes_the_emission_fast_path() {
    let upstream = TestPublisher::new();
    let (inners, mapper) = tracked_inners();
    let subscriber = TestSubscriber::unbounded();
    upstream
        .multi()
        .flat_map_with(FlatMapConfig::new().max_concurrency(2), mapper)
        .subscribe_with(subscriber.clone());

    upstream.emit(1);
    inners.lock().unwrap()[0].emit(10);
    assert_eq!(subscriber.items(), vec![10]);

    inners.lock().unwrap()[0].emit(11);
    assert_eq!(subscriber.items(), vec![10, 11]);
}

#[test_log::test]
fn cancellation_reaches_upstream_and_every_inner() {
    let upstream = TestPublisher::new();
    let (inners, mapper) = tracked_inners();
    let subscriber = TestSubscriber::unbounded();
    upstream
        .multi()
        .flat_map_with(FlatMapConfig::new().max_concurrency(4), mapper)
        .subscribe_with(subscriber.clone());

    upstream.emit(1);
    upstream.emit(2);
    subscriber.cancel();

    assert!(upstream.is_cancelled());
    let inners = inners.lock().unwrap();
    assert!(inners.iter().all(TestPublisher::is_cancelled));
}
