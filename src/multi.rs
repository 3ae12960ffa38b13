use never::Never;
use std::sync::Arc;

use crate::{
    concat::ConcatOp,
    emit_on::{EmitOnOp, Executor},
    error::StreamError,
    filter::FilterOp,
    flat_map::{FlatMapConfig, FlatMapOp},
    ignore::IgnoreOp,
    map::MapOp,
    on_failure::OnFailureResumeOp,
    overflow::{OverflowBufferOp, OverflowDropOp, OverflowKeepLastOp},
    queue::{bounded_queue, unbounded_queue},
    signal::{SignalHooks, SignalOp},
    skip::SkipOp,
    sources::{DeferredSource, EmptySource, FailureSource, IteratorSource},
    subscription::{Publisher, Subscriber},
    take::TakeOp,
    take_last::TakeLastOp,
    take_while::TakeWhileOp,
    uni::Uni,
};

/// A lazy, back-pressured stream of items terminated by completion or
/// failure. Nothing happens until [`subscribe_with`](Multi::subscribe_with)
/// is called, and every subscription is independent.
///
/// `Multi` is a cheap handle (one `Arc` clone) around a [`Publisher`];
/// combinators consume `self` and wrap it in a new publisher.
pub struct Multi<T> {
    publisher: Arc<dyn Publisher<T>>,
}

impl<T> Clone for Multi<T> {
    fn clone(&self) -> Self {
        Multi {
            publisher: Arc::clone(&self.publisher),
        }
    }
}

impl<T: Send + 'static> Multi<T> {
    pub fn from_publisher(publisher: Arc<dyn Publisher<T>>) -> Multi<T> {
        Multi { publisher }
    }

    /// A demand-driven stream over a cloneable collection; each subscription
    /// iterates it from the start.
    pub fn from_iter<C>(items: C) -> Multi<T>
    where
        C: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        C::IntoIter: Send + 'static,
    {
        Multi {
            publisher: Arc::new(IteratorSource::new(items)),
        }
    }

    /// Completes immediately without emitting.
    pub fn empty() -> Multi<T> {
        Multi {
            publisher: Arc::new(EmptySource::new()),
        }
    }

    /// Fails immediately with (a clone of) the given failure.
    pub fn failure(failure: StreamError) -> Multi<T> {
        Multi {
            publisher: Arc::new(FailureSource::new(failure)),
        }
    }

    /// Builds the actual stream at subscription time. An absent supplier
    /// result is a protocol violation surfaced to the subscriber.
    pub fn deferred<F>(supplier: F) -> Multi<T>
    where
        F: Fn() -> Option<Multi<T>> + Send + Sync + 'static,
    {
        Multi {
            publisher: Arc::new(DeferredSource::new(supplier)),
        }
    }

    /// Subscribes `subscriber`, starting an independent pipeline.
    pub fn subscribe_with(&self, subscriber: Arc<dyn Subscriber<T>>) {
        self.publisher.subscribe(subscriber);
    }

    /// Transforms every item. A `None` result cancels the upstream and
    /// surfaces a protocol violation.
    pub fn map<O, F>(self, mapper: F) -> Multi<O>
    where
        O: Send + 'static,
        F: Fn(T) -> Option<O> + Clone + Send + Sync + 'static,
    {
        Multi {
            publisher: Arc::new(MapOp::new(self, mapper)),
        }
    }

    /// Drops items failing the predicate, transparently re-requesting
    /// replacements upstream.
    pub fn filter<P>(self, predicate: P) -> Multi<T>
    where
        P: Fn(&T) -> bool + Clone + Send + Sync + 'static,
    {
        Multi {
            publisher: Arc::new(FilterOp::new(self, predicate)),
        }
    }

    /// Emits items while the predicate holds, then cancels upstream and
    /// completes.
    pub fn take_while<P>(self, predicate: P) -> Multi<T>
    where
        P: Fn(&T) -> bool + Clone + Send + Sync + 'static,
    {
        Multi {
            publisher: Arc::new(TakeWhileOp::new(self, predicate)),
        }
    }

    /// Emits the first `count` items.
    pub fn take(self, count: u64) -> Multi<T> {
        Multi {
            publisher: Arc::new(TakeOp::new(self, count)),
        }
    }

    /// Emits the last `count` items, after the upstream completes.
    pub fn take_last(self, count: usize) -> Multi<T> {
        Multi {
            publisher: Arc::new(TakeLastOp::new(self, count)),
        }
    }

    /// Discards the first `count` items.
    pub fn skip(self, count: u64) -> Multi<T> {
        Multi {
            publisher: Arc::new(SkipOp::new(self, count)),
        }
    }

    /// Consumes the stream for its terminal signal only.
    pub fn ignore(self) -> Multi<Never> {
        Multi {
            publisher: Arc::new(IgnoreOp::new(self)),
        }
    }

    /// Maps each item to a stream and merges the results with the default
    /// configuration. Source order is not preserved across inner streams;
    /// use [`concat`](Multi::concat) for that.
    pub fn flat_map<O, F>(self, mapper: F) -> Multi<O>
    where
        O: Send + 'static,
        F: Fn(T) -> Option<Multi<O>> + Clone + Send + Sync + 'static,
    {
        self.flat_map_with(FlatMapConfig::default(), mapper)
    }

    /// [`flat_map`](Multi::flat_map) with explicit concurrency and
    /// failure-postponement configuration.
    pub fn flat_map_with<O, F>(self, config: FlatMapConfig, mapper: F) -> Multi<O>
    where
        O: Send + 'static,
        F: Fn(T) -> Option<Multi<O>> + Clone + Send + Sync + 'static,
    {
        Multi {
            publisher: Arc::new(FlatMapOp::new(self, mapper, config)),
        }
    }

    /// Concatenates the given streams, subscribing each only after the
    /// previous one completed. Order is preserved; a failure terminates
    /// immediately.
    pub fn concat(sources: Vec<Multi<T>>) -> Multi<T> {
        Multi {
            publisher: Arc::new(ConcatOp::new(sources, false)),
        }
    }

    /// Like [`concat`](Multi::concat), but member failures are collected and
    /// surfaced only after the last member drains.
    pub fn concat_postponing_failures(sources: Vec<Multi<T>>) -> Multi<T> {
        Multi {
            publisher: Arc::new(ConcatOp::new(sources, true)),
        }
    }

    /// Continues with `next` after this stream completes.
    pub fn concat_with(self, next: Multi<T>) -> Multi<T> {
        Multi::concat(vec![self, next])
    }

    /// On completion, switches to the supplier-produced stream. An absent
    /// supplier result is a protocol violation.
    pub fn switch_on_completion<F>(self, supplier: F) -> Multi<T>
    where
        F: Fn() -> Option<Multi<T>> + Send + Sync + 'static,
    {
        self.concat_with(Multi::deferred(supplier))
    }

    /// Moves downstream delivery onto the executor's threads.
    pub fn emit_on(self, executor: Arc<dyn Executor>) -> Multi<T> {
        Multi {
            publisher: Arc::new(EmitOnOp::new(self, executor)),
        }
    }

    /// On failure, switches to the mapper-produced fallback stream.
    pub fn on_failure_resume_with<F>(self, mapper: F) -> Multi<T>
    where
        F: Fn(&StreamError) -> Option<Multi<T>> + Clone + Send + Sync + 'static,
    {
        self.on_failure_resume_if(|_| true, mapper)
    }

    /// Like [`on_failure_resume_with`](Multi::on_failure_resume_with), but
    /// only for failures matching the predicate; others pass through.
    pub fn on_failure_resume_if<P, F>(self, predicate: P, mapper: F) -> Multi<T>
    where
        P: Fn(&StreamError) -> bool + Clone + Send + Sync + 'static,
        F: Fn(&StreamError) -> Option<Multi<T>> + Clone + Send + Sync + 'static,
    {
        Multi {
            publisher: Arc::new(OnFailureResumeOp::new(self, predicate, mapper)),
        }
    }

    /// Buffers up to `capacity` items the downstream has not requested yet;
    /// overflowing cancels upstream and fails with a back-pressure failure.
    pub fn on_overflow_buffer(self, capacity: usize) -> Multi<T> {
        Multi {
            publisher: Arc::new(OverflowBufferOp::new(self, bounded_queue(capacity), None)),
        }
    }

    /// [`on_overflow_buffer`](Multi::on_overflow_buffer) with a callback
    /// receiving the item that did not fit.
    pub fn on_overflow_buffer_with(
        self,
        capacity: usize,
        on_overflow: impl Fn(T) + Send + Sync + 'static,
    ) -> Multi<T> {
        Multi {
            publisher: Arc::new(OverflowBufferOp::new(
                self,
                bounded_queue(capacity),
                Some(Arc::new(on_overflow)),
            )),
        }
    }

    /// Buffers without bound; overflow cannot happen, memory permitting.
    pub fn on_overflow_buffer_unbounded(self) -> Multi<T> {
        Multi {
            publisher: Arc::new(OverflowBufferOp::new(self, unbounded_queue(), None)),
        }
    }

    /// Drops items arriving while the downstream has no outstanding demand.
    pub fn on_overflow_drop(self) -> Multi<T> {
        Multi {
            publisher: Arc::new(OverflowDropOp::new(self, None)),
        }
    }

    /// [`on_overflow_drop`](Multi::on_overflow_drop) with a callback
    /// receiving every dropped item.
    pub fn on_overflow_drop_with(self, on_drop: impl Fn(T) + Send + Sync + 'static) -> Multi<T> {
        Multi {
            publisher: Arc::new(OverflowDropOp::new(self, Some(Arc::new(on_drop)))),
        }
    }

    /// Keeps only the most recent unrequested item.
    pub fn on_overflow_keep_last(self) -> Multi<T> {
        Multi {
            publisher: Arc::new(OverflowKeepLastOp::new(self)),
        }
    }

    /// Invokes the configured hooks ahead of the corresponding signals.
    pub fn on_signal(self, hooks: SignalHooks<T>) -> Multi<T> {
        Multi {
            publisher: Arc::new(SignalOp::new(self, hooks)),
        }
    }

    /// Adapts this stream to the single-value contract: first item wins and
    /// cancels the rest.
    pub fn to_uni(self) -> Uni<T> {
        Uni::from_multi(self)
    }
}
