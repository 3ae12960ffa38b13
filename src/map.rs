use std::{marker::PhantomData, sync::Arc};

use crate::{
    error::StreamError,
    multi::Multi,
    processor::ProcessorBase,
    subscription::{Publisher, Subscriber, Subscription},
};

/// Applies a transformation to each item. An absent mapper result is a
/// protocol violation: the upstream is cancelled and a failure surfaces.
pub(crate) struct MapOp<I, O, F> {
    upstream: Multi<I>,
    mapper: F,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O, F> MapOp<I, O, F> {
    pub(crate) fn new(upstream: Multi<I>, mapper: F) -> Self {
        MapOp {
            upstream,
            mapper,
            _marker: PhantomData,
        }
    }
}

impl<I, O, F> Publisher<O> for MapOp<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Option<O> + Clone + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<O>>) {
        let processor = Arc::new(MapProcessor {
            base: Arc::new(ProcessorBase::new(subscriber)),
            mapper: self.mapper.clone(),
            _marker: PhantomData,
        });
        self.upstream.subscribe_with(processor);
    }
}

struct MapProcessor<I, O, F> {
    base: Arc<ProcessorBase<O>>,
    mapper: F,
    _marker: PhantomData<fn(I)>,
}

impl<I, O, F> Subscriber<I> for MapProcessor<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Option<O> + Send + Sync,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        ProcessorBase::install(&self.base, subscription);
    }

    fn on_next(&self, item: I) {
        if self.base.is_done_or_cancelled() {
            return;
        }
        match (self.mapper)(item) {
            Some(value) => self.base.downstream.on_next(value),
            None => self.base.fail_and_cancel(StreamError::mapper_returned_none()),
        }
    }

    fn on_failure(&self, failure: StreamError) {
        self.base.upstream_failure(failure);
    }

    fn on_complete(&self) {
        self.base.upstream_complete();
    }
}
