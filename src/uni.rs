use std::sync::{
    atomic::{AtomicBool, Ordering as AtomicOrdering},
    Arc,
};

use crate::{
    error::StreamError,
    multi::Multi,
    subscription::{SlotTermination, Subscriber, Subscription, SubscriptionSlot},
};

/// Cancellation handle of a [`Uni`] subscription; a `Uni` carries no demand,
/// so cancellation is the only upstream signal.
pub trait UniSubscription: Send + Sync {
    fn cancel(&self);
}

/// Receives the outcome of a [`Uni`]: `on_subscribe` first and exactly once,
/// then exactly one of `on_item` (possibly empty) or `on_failure`.
pub trait UniSubscriber<T>: Send + Sync {
    fn on_subscribe(&self, subscription: Arc<dyn UniSubscription>);
    fn on_item(&self, item: Option<T>);
    fn on_failure(&self, failure: StreamError);
}

trait UniPublisher<T>: Send + Sync {
    fn subscribe_uni(&self, subscriber: Arc<dyn UniSubscriber<T>>);
}

/// A lazy computation resolving to exactly one of {item (possibly empty),
/// failure}. Like [`Multi`], nothing happens until a subscriber arrives, and
/// every subscription is independent.
pub struct Uni<T> {
    publisher: Arc<dyn UniPublisher<T>>,
}

impl<T> Clone for Uni<T> {
    fn clone(&self) -> Self {
        Uni {
            publisher: Arc::clone(&self.publisher),
        }
    }
}

impl<T: Send + 'static> Uni<T> {
    /// Adapts a stream to the single-value contract: the first item resolves
    /// the `Uni` and cancels the rest of the stream; an empty completion
    /// resolves to an empty item.
    pub fn from_multi(upstream: Multi<T>) -> Uni<T> {
        Uni {
            publisher: Arc::new(FromMultiPublisher { upstream }),
        }
    }

    pub fn subscribe_with(&self, subscriber: Arc<dyn UniSubscriber<T>>) {
        let gated = Arc::new(GatedUniSubscriber {
            downstream: subscriber,
            subscribed: AtomicBool::new(false),
            settled: AtomicBool::new(false),
        });
        self.publisher.subscribe_uni(gated);
    }
}

/// Enforces the single-event discipline in front of user subscribers:
/// one `on_subscribe`, then at most one outcome.
struct GatedUniSubscriber<T> {
    downstream: Arc<dyn UniSubscriber<T>>,
    subscribed: AtomicBool,
    settled: AtomicBool,
}

impl<T: Send + 'static> UniSubscriber<T> for GatedUniSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn UniSubscription>) {
        if !self.subscribed.swap(true, AtomicOrdering::AcqRel) {
            self.downstream.on_subscribe(subscription);
        } else {
            subscription.cancel();
        }
    }

    fn on_item(&self, item: Option<T>) {
        if !self.settled.swap(true, AtomicOrdering::AcqRel) {
            self.downstream.on_item(item);
        }
    }

    fn on_failure(&self, failure: StreamError) {
        if !self.settled.swap(true, AtomicOrdering::AcqRel) {
            self.downstream.on_failure(failure);
        }
    }
}

struct FromMultiPublisher<T> {
    upstream: Multi<T>,
}

impl<T: Send + 'static> UniPublisher<T> for FromMultiPublisher<T> {
    fn subscribe_uni(&self, subscriber: Arc<dyn UniSubscriber<T>>) {
        let state = Arc::new(AdapterState {
            downstream: subscriber,
            upstream: SubscriptionSlot::new(),
        });
        self.upstream
            .subscribe_with(Arc::new(AdapterSubscriber(state)));
    }
}

struct AdapterState<T> {
    downstream: Arc<dyn UniSubscriber<T>>,
    upstream: SubscriptionSlot,
}

impl<T: Send + 'static> UniSubscription for AdapterState<T> {
    fn cancel(&self) {
        self.upstream.cancel();
    }
}

struct AdapterSubscriber<T>(Arc<AdapterState<T>>);

impl<T: Send + 'static> Subscriber<T> for AdapterSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let state = &self.0;
        if state.upstream.set(Arc::clone(&subscription)) {
            state
                .downstream
                .on_subscribe(Arc::clone(state) as Arc<dyn UniSubscription>);
            subscription.request(1);
        } else {
            subscription.cancel();
        }
    }

    fn on_next(&self, item: T) {
        let state = &self.0;
        match state.upstream.terminate() {
            // Already cancelled or resolved; late items are discarded.
            SlotTermination::AlreadyCancelled => {},
            SlotTermination::Live(subscription) => {
                subscription.cancel();
                state.downstream.on_item(Some(item));
            },
            SlotTermination::Empty => {
                state.downstream.on_item(Some(item));
            },
        }
    }

    fn on_failure(&self, failure: StreamError) {
        let state = &self.0;
        match state.upstream.terminate() {
            SlotTermination::AlreadyCancelled => {},
            _ => state.downstream.on_failure(failure),
        }
    }

    fn on_complete(&self) {
        let state = &self.0;
        match state.upstream.terminate() {
            SlotTermination::AlreadyCancelled => {},
            _ => state.downstream.on_item(None),
        }
    }
}
