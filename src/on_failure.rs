use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering},
    Arc,
};

use tracing::trace;

use crate::{
    error::StreamError,
    multi::Multi,
    subscription::{Publisher, Subscriber, Subscription},
    switch::SubscriptionSwitch,
};

/// Switches to a mapper-produced fallback stream when the upstream fails.
/// Failures rejected by the predicate pass through untouched, as does a
/// failure of the fallback itself. Outstanding demand carries over to the
/// fallback subscription.
pub(crate) struct OnFailureResumeOp<T, P, F> {
    upstream: Multi<T>,
    predicate: P,
    mapper: F,
}

impl<T, P, F> OnFailureResumeOp<T, P, F> {
    pub(crate) fn new(upstream: Multi<T>, predicate: P, mapper: F) -> Self {
        OnFailureResumeOp {
            upstream,
            predicate,
            mapper,
        }
    }
}

impl<T, P, F> Publisher<T> for OnFailureResumeOp<T, P, F>
where
    T: Send + 'static,
    P: Fn(&StreamError) -> bool + Clone + Send + Sync + 'static,
    F: Fn(&StreamError) -> Option<Multi<T>> + Clone + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let state = Arc::new(ResumeState {
            downstream: subscriber,
            switch: SubscriptionSwitch::new(),
            predicate: self.predicate.clone(),
            mapper: self.mapper.clone(),
            emitted: AtomicU64::new(0),
            on_fallback: AtomicBool::new(false),
            done: AtomicBool::new(false),
        });
        state
            .downstream
            .on_subscribe(Arc::clone(&state) as Arc<dyn Subscription>);
        self.upstream
            .subscribe_with(Arc::new(ResumeSubscriber(Arc::clone(&state))));
    }
}

struct ResumeState<T, P, F> {
    downstream: Arc<dyn Subscriber<T>>,
    switch: SubscriptionSwitch,
    predicate: P,
    mapper: F,
    emitted: AtomicU64,
    on_fallback: AtomicBool,
    done: AtomicBool,
}

impl<T, P, F> ResumeState<T, P, F>
where
    T: Send + 'static,
    P: Send + Sync,
    F: Send + Sync,
{
    fn terminate_once(&self) -> bool {
        !self.done.swap(true, AtomicOrdering::AcqRel)
    }
}

impl<T, P, F> Subscription for ResumeState<T, P, F>
where
    T: Send + 'static,
    P: Send + Sync,
    F: Send + Sync,
{
    fn request(&self, n: u64) {
        if n == 0 {
            self.switch.cancel();
            if self.terminate_once() {
                self.downstream.on_failure(StreamError::invalid_request());
            }
            return;
        }
        self.switch.request(n);
    }

    fn cancel(&self) {
        self.switch.cancel();
    }
}

struct ResumeSubscriber<T, P, F>(Arc<ResumeState<T, P, F>>);

impl<T, P, F> Subscriber<T> for ResumeSubscriber<T, P, F>
where
    T: Send + 'static,
    P: Fn(&StreamError) -> bool + Send + Sync + 'static,
    F: Fn(&StreamError) -> Option<Multi<T>> + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.0.switch.set(subscription);
    }

    fn on_next(&self, item: T) {
        if self.0.done.load(AtomicOrdering::Acquire) || self.0.switch.is_cancelled() {
            return;
        }
        self.0.emitted.fetch_add(1, AtomicOrdering::AcqRel);
        self.0.downstream.on_next(item);
    }

    fn on_failure(&self, failure: StreamError) {
        let state = &self.0;
        if state.on_fallback.swap(true, AtomicOrdering::AcqRel) {
            // The fallback itself failed.
            if state.terminate_once() {
                state.downstream.on_failure(failure);
            }
            return;
        }
        if !(state.predicate)(&failure) {
            if state.terminate_once() {
                state.downstream.on_failure(failure);
            }
            return;
        }
        match (state.mapper)(&failure) {
            Some(fallback) => {
                trace!("switching to fallback stream after failure");
                let emitted = state.emitted.swap(0, AtomicOrdering::AcqRel);
                state.switch.produced(emitted);
                fallback.subscribe_with(Arc::new(ResumeSubscriber(Arc::clone(state))));
            },
            None => {
                if state.terminate_once() {
                    state
                        .downstream
                        .on_failure(failure.compose(StreamError::mapper_returned_none()));
                }
            },
        }
    }

    fn on_complete(&self) {
        if self.0.terminate_once() {
            self.0.downstream.on_complete();
        }
    }
}
