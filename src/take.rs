use std::sync::{
    atomic::{AtomicU64, Ordering as AtomicOrdering},
    Arc,
};

use crate::{
    error::StreamError,
    multi::Multi,
    processor::ProcessorBase,
    subscription::{Publisher, Subscriber, Subscription},
};

/// Emits the first `n` items, then cancels upstream and completes.
pub(crate) struct TakeOp<T> {
    upstream: Multi<T>,
    count: u64,
}

impl<T> TakeOp<T> {
    pub(crate) fn new(upstream: Multi<T>, count: u64) -> Self {
        TakeOp { upstream, count }
    }
}

impl<T: Send + 'static> Publisher<T> for TakeOp<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let processor = Arc::new(TakeProcessor {
            base: Arc::new(ProcessorBase::new(subscriber)),
            count: self.count,
            taken: AtomicU64::new(0),
        });
        self.upstream.subscribe_with(processor);
    }
}

struct TakeProcessor<T> {
    base: Arc<ProcessorBase<T>>,
    count: u64,
    taken: AtomicU64,
}

impl<T: Send + 'static> Subscriber<T> for TakeProcessor<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        ProcessorBase::install(&self.base, subscription);
        if self.count == 0 {
            self.base.complete_and_cancel();
        }
    }

    fn on_next(&self, item: T) {
        if self.base.is_done_or_cancelled() {
            return;
        }
        let taken = self.taken.fetch_add(1, AtomicOrdering::AcqRel) + 1;
        if taken < self.count {
            self.base.downstream.on_next(item);
        } else if taken == self.count {
            self.base.downstream.on_next(item);
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
