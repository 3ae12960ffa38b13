use riffle::{Multi, UNBOUNDED};

pub mod common;

use common::{TestPublisher, TestSubscriber};

#[test_log::test]
fn transforms_every_item_then_completes() {
    let subscriber = TestSubscriber::new(UNBOUNDED);
    Multi::from_iter(vec![1u64, 2, 3])
        .map(|x| Some(x * 2))
        .subscribe_with(subscriber.clone());

    assert_eq!(subscriber.items(), vec![2, 4, 6]);
    assert!(subscriber.is_completed());
    assert_eq!(
        subscriber.signal_names(),
        vec!["Subscribed", "Item", "Item", "Item", "Completed"]
    );
}

#[test_log::test]
fn identity_mapping_preserves_the_sequence() {
    let subscriber = TestSubscriber::unbounded();
    Multi::from_iter(1u64..=5)
        .map(Some)
        .subscribe_with(subscriber.clone());

    assert_eq!(subscriber.items(), vec![1, 2, 3, 4, 5]);
    assert!(subscriber.is_completed());
}

#[test_log::test]
fn absent_mapper_result_fails_and_cancels_upstream() {
    let publisher = TestPublisher::new();
    let subscriber = TestSubscriber::new(10);
    publisher
        .multi()
        .map(|x: u64| if x == 2 { None } else { Some(x) })
        .subscribe_with(subscriber.clone());

    publisher.emit(1);
    publisher.emit(2);
    publisher.emit(3);

    assert_eq!(subscriber.items(), vec![1]);
    let failure = subscriber.failure().expect("failure expected");
    assert!(failure.is_protocol_violation());
    assert!(publisher.is_cancelled());
    assert_eq!(subscriber.terminal_count(), 1);
}

#[test_log::test]
fn failures_pass_through_untouched() {
    let publisher = TestPublisher::new();
    let subscriber = TestSubscriber::new(10);
    publisher
        .multi()
        .map(|x: u64| Some(x + 1))
        .subscribe_with(subscriber.clone());

    publisher.emit(1);
    publisher.fail(riffle::StreamError::Protocol("boom".to_owned()));

    assert_eq!(subscriber.items(), vec![2]);
    assert!(subscriber.failure().is_some());
}
