use std::sync::Arc;

use crate::{
    error::StreamError,
    multi::Multi,
    processor::ProcessorBase,
    subscription::{Publisher, Subscriber, Subscription},
};

/// Emits items while the predicate holds; the first rejected item cancels
/// the upstream and completes the stream.
pub(crate) struct TakeWhileOp<T, P> {
    upstream: Multi<T>,
    predicate: P,
}

impl<T, P> TakeWhileOp<T, P> {
    pub(crate) fn new(upstream: Multi<T>, predicate: P) -> Self {
        TakeWhileOp {
            upstream,
            predicate,
        }
    }
}

impl<T, P> Publisher<T> for TakeWhileOp<T, P>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Clone + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let processor = Arc::new(TakeWhileProcessor {
            base: Arc::new(ProcessorBase::new(subscriber)),
            predicate: self.predicate.clone(),
        });
        self.upstream.subscribe_with(processor);
    }
}

struct TakeWhileProcessor<T, P> {
    base: Arc<ProcessorBase<T>>,
    predicate: P,
}

impl<T, P> Subscriber<T> for TakeWhileProcessor<T, P>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        ProcessorBase::install(&self.base, subscription);
    }

    fn on_next(&self, item: T) {
        if self.base.is_done_or_cancelled() {
            return;
        }
        if (self.predicate)(&item) {
            self.base.downstream.on_next(item);
        } else {
            self.base.complete_and_cancel();
        }
    }

    fn on_failure(&self, failure: StreamError) {
        self.base.upstream_failure(failure);
    }

    fn on_complete(&self) {
        self.base.upstream_complete();
    }
}
