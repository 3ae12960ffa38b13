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

/// Discards the first `n` items. The discarded window is covered by `n`
/// extra upstream demand requested up front, so downstream demand math is
/// untouched.
pub(crate) struct SkipOp<T> {
    upstream: Multi<T>,
    count: u64,
}

impl<T> SkipOp<T> {
    pub(crate) fn new(upstream: Multi<T>, count: u64) -> Self {
        SkipOp { upstream, count }
    }
}

impl<T: Send + 'static> Publisher<T> for SkipOp<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let processor = Arc::new(SkipProcessor {
            base: Arc::new(ProcessorBase::new(subscriber)),
            remaining: AtomicU64::new(self.count),
            count: self.count,
        });
        self.upstream.subscribe_with(processor);
    }
}

struct SkipProcessor<T> {
    base: Arc<ProcessorBase<T>>,
    remaining: AtomicU64,
    count: u64,
}

impl<T: Send + 'static> Subscriber<T> for SkipProcessor<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        ProcessorBase::install(&self.base, subscription);
        if self.count > 0 {
            self.base.request_upstream(self.count);
        }
    }

    fn on_next(&self, item: T) {
        if self.base.is_done_or_cancelled() {
            return;
        }
        let remaining = self.remaining.load(AtomicOrdering::Acquire);
        if remaining > 0 {
            self.remaining.store(remaining - 1, AtomicOrdering::Release);
            return;
        }
        self.base.downstream.on_next(item);
    }

    fn on_failure(&self, failure: StreamError) {
        self.base.upstream_failure(failure);
    }

    fn on_complete(&self) {
        self.base.upstream_complete();
    }
}
