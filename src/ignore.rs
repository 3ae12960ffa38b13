use never::Never;
use std::sync::Arc;

use crate::{
    error::StreamError,
    multi::Multi,
    processor::ProcessorBase,
    subscription::{Publisher, Subscriber, Subscription, UNBOUNDED},
};

/// Consumes the upstream with unbounded demand and emits nothing; only the
/// terminal signal flows through. The output item type is uninhabited.
pub(crate) struct IgnoreOp<T> {
    upstream: Multi<T>,
}

impl<T> IgnoreOp<T> {
    pub(crate) fn new(upstream: Multi<T>) -> Self {
        IgnoreOp { upstream }
    }
}

impl<T: Send + 'static> Publisher<Never> for IgnoreOp<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<Never>>) {
        let processor = Arc::new(IgnoreProcessor {
            base: Arc::new(ProcessorBase::new(subscriber)),
        });
        self.upstream.subscribe_with(processor);
    }
}

struct IgnoreProcessor {
    base: Arc<ProcessorBase<Never>>,
}

impl<T: Send + 'static> Subscriber<T> for IgnoreProcessor {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        ProcessorBase::install(&self.base, subscription);
        self.base.request_upstream(UNBOUNDED);
    }

    fn on_next(&self, _item: T) {}

    fn on_failure(&self, failure: StreamError) {
        self.base.upstream_failure(failure);
    }

    fn on_complete(&self) {
        self.base.upstream_complete();
    }
}
