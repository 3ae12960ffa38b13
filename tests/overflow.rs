//! Overflow policies: buffer, drop, keep-last.

use std::sync::{Arc, Mutex};

use riffle::UNBOUNDED;

pub mod common;

use common::{TestPublisher, TestSubscriber};

#[test_log::test]
fn buffer_parks_items_until_demand_arrives() {
    let publisher = TestPublisher::new();
    let subscriber = TestSubscriber::new(0);
    publisher
        .multi()
        .on_overflow_buffer(8)
        .subscribe_with(subscriber.clone());

    // The buffering operator consumes the upstream unboundedly.
    assert_eq!(publisher.requested(), UNBOUNDED);

    publisher.emit(1u64);
    publisher.emit(2);
    assert_eq!(subscriber.item_count(), 0);

    subscriber.request(1);
    assert_eq!(subscriber.items(), vec![1]);

    subscriber.request(10);
    assert_eq!(subscriber.items(), vec![1, 2]);

    publisher.complete();
    assert!(subscriber.is_completed());
}

#[test_log::test]
fn buffer_overflow_fails_and_cancels_upstream() {
    let rejected = Arc::new(Mutex::new(Vec::new()));
    let publisher = TestPublisher::new();
    let subscriber = TestSubscriber::new(0);
    publisher
        .multi()
        .on_overflow_buffer_with(2, {
            let rejected = Arc::clone(&rejected);
            move |item| rejected.lock().unwrap().push(item)
        })
        .subscribe_with(subscriber.clone());

    publisher.emit(1u64);
    publisher.emit(2);
    publisher.emit(3);

    assert!(publisher.is_cancelled());
    assert_eq!(*rejected.lock().unwrap(), vec![3]);
    let failure = subscriber.failure().expect("failure expected");
    assert!(failure.is_back_pressure());
    assert_eq!(subscriber.terminal_count(), 1);
}

#[test_log::test]
fn unbounded_buffer_never_overflows() {
    let publisher = TestPublisher::new();
    let subscriber = TestSubscriber::new(0);
    publisher
        .multi()
        .on_overflow_buffer_unbounded()
        .subscribe_with(subscriber.clone());

    for i in 0..100u64 {
        publisher.emit(i);
    }
    publisher.complete();

    assert_eq!(subscriber.item_count(), 0);
    subscriber.request(UNBOUNDED);
    assert_eq!(subscriber.items(), (0..100).collect::<Vec<_>>());
    assert!(subscriber.is_completed());
}

#[test_log::test]
fn drop_discards_items_without_demand() {
    let dropped = Arc::new(Mutex::new(Vec::new()));
    let publisher = TestPublisher::new();
    let subscriber = TestSubscriber::new(2);
    publisher
        .multi()
        .on_overflow_drop_with({
            let dropped = Arc::clone(&dropped);
            move |item| dropped.lock().unwrap().push(item)
        })
        .subscribe_with(subscriber.clone());

    publisher.emit(1u64);
    publisher.emit(2);
    publisher.emit(3);
    publisher.emit(4);
    publisher.complete();

    assert_eq!(subscriber.items(), vec![1, 2]);
    assert_eq!(*dropped.lock().unwrap(), vec![3, 4]);
    assert!(subscriber.is_completed());
}

#[test_log::test]
fn keep_last_retains_only_the_newest_item() {
    let publisher = TestPublisher::new();
    let subscriber = TestSubscriber::new(0);
    publisher
        .multi()
        .on_overflow_keep_last()
        .subscribe_with(subscriber.clone());

    publisher.emit(1u64);
    publisher.emit(2);
    publisher.emit(3);
    assert_eq!(subscriber.item_count(), 0);

    subscriber.request(5);
    assert_eq!(subscriber.items(), vec![3]);

    publisher.emit(4);
    assert_eq!(subscriber.items(), vec![3, 4]);

    publisher.complete();
    assert!(subscriber.is_completed());
}
