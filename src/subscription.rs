use arc_swap::ArcSwapOption;
use std::sync::{
    atomic::{AtomicU64, Ordering as AtomicOrdering},
    Arc,
};

use crate::error::StreamError;

/// Sticky sentinel for unbounded demand: once a request counter saturates to
/// this value it never comes back down.
pub const UNBOUNDED: u64 = u64::MAX;

/// A factory of subscriptions. Each call to [`subscribe`](Publisher::subscribe)
/// starts an independent pipeline bound to the given subscriber; nothing
/// happens before that call.
pub trait Publisher<T>: Send + Sync {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>);
}

/// A sink of signals, delivered in strict order: `on_subscribe` exactly once
/// and first, then zero or more `on_next` (each covered by prior demand),
/// then at most one of `on_complete` / `on_failure`.
pub trait Subscriber<T>: Send + Sync {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);
    fn on_next(&self, item: T);
    fn on_failure(&self, failure: StreamError);
    fn on_complete(&self);
}

/// The demand channel held by a subscriber. `request(0)` is a protocol
/// violation surfaced as a failure; `cancel` is idempotent and safe from any
/// thread, and after it no further signals reach the subscriber.
pub trait Subscription: Send + Sync {
    fn request(&self, n: u64);
    fn cancel(&self);
}

/// Saturating-adds `n` into a request counter, sticky at [`UNBOUNDED`].
/// Returns the updated value.
pub fn add_request(counter: &AtomicU64, n: u64) -> u64 {
    let mut current = counter.load(AtomicOrdering::Acquire);
    loop {
        if current == UNBOUNDED {
            return UNBOUNDED;
        }
        let next = current.saturating_add(n);
        match counter.compare_exchange_weak(
            current,
            next,
            AtomicOrdering::AcqRel,
            AtomicOrdering::Acquire,
        ) {
            Ok(_) => return next,
            Err(observed) => current = observed,
        }
    }
}

/// Subtracts `n` already-emitted items from a request counter, skipped while
/// the counter is unbounded. Returns the updated value.
pub fn consumed(counter: &AtomicU64, n: u64) -> u64 {
    let mut current = counter.load(AtomicOrdering::Acquire);
    loop {
        if current == UNBOUNDED {
            return UNBOUNDED;
        }
        let next = current.saturating_sub(n);
        match counter.compare_exchange_weak(
            current,
            next,
            AtomicOrdering::AcqRel,
            AtomicOrdering::Acquire,
        ) {
            Ok(_) => return next,
            Err(observed) => current = observed,
        }
    }
}

/// Clamps a prefetch/concurrency count into the demand domain.
pub(crate) fn unbounded_or(n: usize) -> u64 {
    if n == usize::MAX {
        UNBOUNDED
    } else {
        n as u64
    }
}

/// Replenish threshold for a prefetch window: three quarters of it, so
/// upstream requests amortize instead of going out one by one.
pub(crate) fn unbounded_or_limit(prefetch: usize) -> u64 {
    if prefetch == usize::MAX {
        UNBOUNDED
    } else {
        (prefetch - (prefetch >> 2)) as u64
    }
}

enum SlotState {
    Active(Arc<dyn Subscription>),
    Cancelled,
}

/// Outcome of swapping a slot into its cancelled state.
pub(crate) enum SlotTermination {
    /// The slot held a live subscription, returned here uncancelled.
    Live(Arc<dyn Subscription>),
    /// The slot was never set.
    Empty,
    /// The slot had already been cancelled.
    AlreadyCancelled,
}

/// The upstream-subscription slot of an operator: set at most once, and
/// transitioned to a terminal cancelled state by an atomic swap. All
/// cancellation races funnel through this swap, so a live subscription is
/// cancelled at most once no matter how many threads race.
pub(crate) struct SubscriptionSlot {
    state: ArcSwapOption<SlotState>,
    cancelled_state: Arc<SlotState>,
}

impl SubscriptionSlot {
    pub(crate) fn new() -> Self {
        SubscriptionSlot {
            state: ArcSwapOption::from(None),
            cancelled_state: Arc::new(SlotState::Cancelled),
        }
    }

    /// Installs `subscription` if the slot is still empty. Returns `false`
    /// when the slot is occupied or cancelled; the caller must cancel the
    /// extra subscription.
    pub(crate) fn set(&self, subscription: Arc<dyn Subscription>) -> bool {
        let mut installed = false;
        self.state.rcu(|current| match current {
            None => {
                installed = true;
                Some(Arc::new(SlotState::Active(Arc::clone(&subscription))))
            },
            Some(occupied) => {
                installed = false;
                Some(Arc::clone(occupied))
            },
        });
        installed
    }

    /// The live subscription, if the slot holds one.
    pub(crate) fn get(&self) -> Option<Arc<dyn Subscription>> {
        match &*self.state.load() {
            Some(state) => match &**state {
                SlotState::Active(subscription) => Some(Arc::clone(subscription)),
                SlotState::Cancelled => None,
            },
            None => None,
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        matches!(
            &*self.state.load(),
            Some(state) if matches!(&**state, SlotState::Cancelled)
        )
    }

    /// Swaps the slot into its cancelled state without cancelling what it
    /// held, reporting what was there. Used by paths that deliver a terminal
    /// themselves and only need the slot closed against late signals.
    pub(crate) fn terminate(&self) -> SlotTermination {
        let previous = self.state.swap(Some(Arc::clone(&self.cancelled_state)));
        match previous {
            None => SlotTermination::Empty,
            Some(state) => match &*state {
                SlotState::Active(subscription) => SlotTermination::Live(Arc::clone(subscription)),
                SlotState::Cancelled => SlotTermination::AlreadyCancelled,
            },
        }
    }

    /// Cancels the slot: swaps in the cancelled state and, if a live
    /// subscription was displaced, cancels it. Idempotent.
    pub(crate) fn cancel(&self) {
        if let SlotTermination::Live(subscription) = self.terminate() {
            subscription.cancel();
        }
    }
}

/// A subscription that does nothing; handed to subscribers that will only
/// ever observe a terminal signal.
pub(crate) struct NoopSubscription;

impl Subscription for NoopSubscription {
    fn request(&self, _n: u64) {}

    fn cancel(&self) {}
}

/// Delivers `on_subscribe` with a no-op subscription followed by a failure.
pub(crate) fn fail_subscriber<T>(subscriber: &Arc<dyn Subscriber<T>>, failure: StreamError) {
    subscriber.on_subscribe(Arc::new(NoopSubscription));
    subscriber.on_failure(failure);
}

/// Delivers `on_subscribe` with a no-op subscription followed by completion.
pub(crate) fn complete_subscriber<T>(subscriber: &Arc<dyn Subscriber<T>>) {
    subscriber.on_subscribe(Arc::new(NoopSubscription));
    subscriber.on_complete();
}
