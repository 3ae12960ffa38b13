use std::sync::Arc;

use crate::{
    error::StreamError,
    multi::Multi,
    processor::ProcessorBase,
    subscription::{Publisher, Subscriber, Subscription},
};

/// Lets items through when the predicate holds; a rejected item consumes no
/// downstream demand, so one replacement item is requested upstream.
pub(crate) struct FilterOp<T, P> {
    upstream: Multi<T>,
    predicate: P,
}

impl<T, P> FilterOp<T, P> {
    pub(crate) fn new(upstream: Multi<T>, predicate: P) -> Self {
        FilterOp {
            upstream,
            predicate,
        }
    }
}

impl<T, P> Publisher<T> for FilterOp<T, P>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Clone + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let processor = Arc::new(FilterProcessor {
            base: Arc::new(ProcessorBase::new(subscriber)),
            predicate: self.predicate.clone(),
        });
        self.upstream.subscribe_with(processor);
    }
}

struct FilterProcessor<T, P> {
    base: Arc<ProcessorBase<T>>,
    predicate: P,
}

impl<T, P> Subscriber<T> for FilterProcessor<T, P>
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
            self.base.request_upstream(1);
        }
    }

    fn on_failure(&self, failure: StreamError) {
        self.base.upstream_failure(failure);
    }

    fn on_complete(&self) {
        self.base.upstream_complete();
    }
}
