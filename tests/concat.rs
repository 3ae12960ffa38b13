use riffle::{Multi, StreamError};

pub mod common;

use common::{TestPublisher, TestSubscriber};

#[test_log::test]
fn preserves_source_order_across_members() {
    let subscriber = TestSubscriber::unbounded();
    Multi::concat(vec![
        Multi::from_iter(vec![1u64, 2, 3]),
        Multi::from_iter(vec![4u64, 5]),
    ])
    .subscribe_with(subscriber.clone());

    assert_eq!(subscriber.items(), vec![1, 2, 3, 4, 5]);
    assert!(subscriber.is_completed());
    assert_eq!(subscriber.terminal_count(), 1);
}

#[test_log::test]
fn concat_with_empty_is_identity() {
    let subscriber = TestSubscriber::unbounded();
    Multi::from_iter(vec![1u64, 2, 3])
        .concat_with(Multi::empty())
        .subscribe_with(subscriber.clone());

    assert_eq!(subscriber.items(), vec![1, 2, 3]);
    assert!(subscriber.is_completed());
}

#[test_log::test]
fn demand_spans_member_boundaries() {
    let subscriber = TestSubscriber::new(4);
    Multi::concat(vec![
        Multi::from_iter(vec![1u64, 2, 3]),
        Multi::from_iter(vec![4u64, 5]),
    ])
    .subscribe_with(subscriber.clone());

    // Four requested: three from the first member, the boundary is crossed
    // with one outstanding, served by the second.
    assert_eq!(subscriber.items(), vec![1, 2, 3, 4]);
    assert_eq!(subscriber.terminal_count(), 0);

    subscriber.request(1);
    assert_eq!(subscriber.items(), vec![1, 2, 3, 4, 5]);
    assert!(subscriber.is_completed());
}

#[test_log::test]
fn next_member_starts_only_after_the_previous_completes() {
    let first = TestPublisher::new();
    let second = TestPublisher::new();
    let subscriber = TestSubscriber::unbounded();
    Multi::concat(vec![first.multi(), second.multi()]).subscribe_with(subscriber.clone());

    assert!(first.has_subscriber());
    assert!(!second.has_subscriber());

    first.emit(1u64);
    first.complete();

    assert!(second.has_subscriber());
    second.emit(2);
    second.complete();

    assert_eq!(subscriber.items(), vec![1, 2]);
    assert!(subscriber.is_completed());
}

#[test_log::test]
fn eager_mode_fails_at_the_first_broken_member() {
    let subscriber = TestSubscriber::unbounded();
    Multi::concat(vec![
        Multi::from_iter(vec![1u64]),
        Multi::failure(StreamError::Protocol("member broke".to_owned())),
        Multi::from_iter(vec![2u64]),
    ])
    .subscribe_with(subscriber.clone());

    assert_eq!(subscriber.items(), vec![1]);
    assert!(subscriber.failure().is_some());
    assert_eq!(subscriber.terminal_count(), 1);
}

#[test_log::test]
fn postponed_mode_collects_failures_until_the_end() {
    let subscriber = TestSubscriber::unbounded();
    Multi::concat_postponing_failures(vec![
        Multi::from_iter(vec![1u64]),
        Multi::failure(StreamError::Protocol("member broke".to_owned())),
        Multi::from_iter(vec![2u64]),
    ])
    .subscribe_with(subscriber.clone());

    assert_eq!(subscriber.items(), vec![1, 2]);
    let failure = subscriber.failure().expect("failure expected");
    assert!(failure.is_protocol_violation());
    assert!(!subscriber.is_completed());
}

#[test_log::test]
fn switch_on_completion_appends_the_supplied_stream() {
    let subscriber = TestSubscriber::unbounded();
    Multi::from_iter(vec![1u64, 2])
        .switch_on_completion(|| Some(Multi::from_iter(vec![3u64, 4])))
        .subscribe_with(subscriber.clone());

    assert_eq!(subscriber.items(), vec![1, 2, 3, 4]);
    assert!(subscriber.is_completed());
}

#[test_log::test]
fn switch_on_completion_with_absent_supplier_result_fails() {
    let subscriber = TestSubscriber::unbounded();
    Multi::from_iter(vec![1u64, 2])
        .switch_on_completion(|| None)
        .subscribe_with(subscriber.clone());

    assert_eq!(subscriber.items(), vec![1, 2]);
    let failure = subscriber.failure().expect("failure expected");
    assert!(failure.is_protocol_violation());
}

#[test_log::test]
fn cancel_stops_the_current_member() {
    let first = TestPublisher::new();
    let subscriber = TestSubscriber::unbounded();
    Multi::concat(vec![first.multi(), Multi::from_iter(vec![9u64])])
        .subscribe_with(subscriber.clone());

    first.emit(1u64);
    subscriber.cancel();
    assert!(first.is_cancelled());

    first.emit(2);
    assert_eq!(subscriber.items(), vec![1]);
    assert_eq!(subscriber.terminal_count(), 0);
}
