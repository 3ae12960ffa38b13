//! Single-value adaptation of a stream.

use riffle::{Multi, StreamError};

pub mod common;

use common::{TestPublisher, TestUniSubscriber};

#[test_log::test]
fn first_item_resolves_and_cancels_the_rest() {
    let publisher = TestPublisher::new();
    let subscriber = TestUniSubscriber::new();
    publisher.multi().to_uni().subscribe_with(subscriber.clone());

    // The adapter asks for exactly one item.
    assert_eq!(publisher.requested(), 1);

    publisher.emit(42u64);
    assert_eq!(subscriber.item(), Some(Some(42)));
    assert!(publisher.is_cancelled());

    // A source violating the demand protocol is ignored past the first item.
    publisher.emit(43);
    publisher.complete();
    assert_eq!(subscriber.outcome_count(), 1);
}

#[test_log::test]
fn empty_completion_resolves_to_an_empty_item() {
    let subscriber = TestUniSubscriber::<u64>::new();
    Multi::empty().to_uni().subscribe_with(subscriber.clone());

    assert_eq!(subscriber.item(), Some(None));
    assert_eq!(subscriber.outcome_count(), 1);
}

#[test_log::test]
fn failure_resolves_to_a_failure() {
    let subscriber = TestUniSubscriber::<u64>::new();
    Multi::failure(StreamError::Protocol("broken".to_owned()))
        .to_uni()
        .subscribe_with(subscriber.clone());

    assert!(subscriber.failure().is_some());
    assert_eq!(subscriber.outcome_count(), 1);
}

#[test_log::test]
fn cancellation_prevents_any_outcome() {
    let publisher = TestPublisher::new();
    let subscriber = TestUniSubscriber::new();
    publisher.multi().to_uni().subscribe_with(subscriber.clone());

    subscriber.cancel();
    assert!(publisher.is_cancelled());

    publisher.emit(1u64);
    publisher.complete();
    assert_eq!(subscriber.outcome_count(), 0);
}
