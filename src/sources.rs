use std::{
    iter::Peekable,
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering},
        Arc, Mutex,
    },
};

use crate::{
    error::StreamError,
    multi::Multi,
    subscription::{
        add_request, complete_subscriber, consumed, fail_subscriber, Publisher, Subscriber,
        Subscription,
    },
};

/// Demand-driven source over a cloneable collection of items. Each subscribe
/// gets a fresh iterator; emission happens inside a WIP-serialized drain so
/// reentrant `request` calls from `on_next` do not recurse.
pub(crate) struct IteratorSource<C> {
    items: C,
}

impl<C> IteratorSource<C> {
    pub(crate) fn new(items: C) -> Self {
        IteratorSource { items }
    }
}

impl<C> Publisher<C::Item> for IteratorSource<C>
where
    C: IntoIterator + Clone + Send + Sync,
    C::Item: Send + 'static,
    C::IntoIter: Send + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<C::Item>>) {
        let mut iter = self.items.clone().into_iter().peekable();
        if iter.peek().is_none() {
            complete_subscriber(&subscriber);
            return;
        }
        let subscription = Arc::new(IteratorSubscription {
            downstream: subscriber,
            iter: Mutex::new(iter),
            requested: AtomicU64::new(0),
            wip: AtomicUsize::new(0),
            terminated: AtomicBool::new(false),
        });
        subscription
            .downstream
            .on_subscribe(Arc::clone(&subscription) as Arc<dyn Subscription>);
    }
}

struct IteratorSubscription<It: Iterator> {
    downstream: Arc<dyn Subscriber<It::Item>>,
    iter: Mutex<Peekable<It>>,
    requested: AtomicU64,
    wip: AtomicUsize,
    terminated: AtomicBool,
}

impl<It> IteratorSubscription<It>
where
    It: Iterator + Send + 'static,
    It::Item: Send + 'static,
{
    /// One shot at the terminal transition; loses to a prior cancel.
    fn terminate_once(&self) -> bool {
        !self.terminated.swap(true, AtomicOrdering::AcqRel)
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, AtomicOrdering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            let r = self.requested.load(AtomicOrdering::Acquire);
            let mut emitted = 0u64;
            while emitted != r {
                if self.terminated.load(AtomicOrdering::Acquire) {
                    return;
                }
                let next = self.iter.lock().unwrap().next();
                match next {
                    Some(item) => {
                        self.downstream.on_next(item);
                        emitted += 1;
                    },
                    None => {
                        if self.terminate_once() {
                            self.downstream.on_complete();
                        }
                        return;
                    },
                }
            }
            if emitted != 0 {
                consumed(&self.requested, emitted);
            }
            if self.iter.lock().unwrap().peek().is_none() {
                if self.terminate_once() {
                    self.downstream.on_complete();
                }
                return;
            }
            missed = self.wip.fetch_sub(missed, AtomicOrdering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }
}

impl<It> Subscription for IteratorSubscription<It>
where
    It: Iterator + Send + 'static,
    It::Item: Send + 'static,
{
    fn request(&self, n: u64) {
        if n == 0 {
            if self.terminate_once() {
                self.downstream.on_failure(StreamError::invalid_request());
            }
            return;
        }
        add_request(&self.requested, n);
        self.drain();
    }

    fn cancel(&self) {
        self.terminated.store(true, AtomicOrdering::Release);
    }
}

/// Completes immediately, without ever emitting.
pub(crate) struct EmptySource<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> EmptySource<T> {
    pub(crate) fn new() -> Self {
        EmptySource {
            _marker: PhantomData,
        }
    }
}

impl<T: Send + 'static> Publisher<T> for EmptySource<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        complete_subscriber(&subscriber);
    }
}

/// Fails immediately with a clone of the configured failure.
pub(crate) struct FailureSource<T> {
    failure: StreamError,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FailureSource<T> {
    pub(crate) fn new(failure: StreamError) -> Self {
        FailureSource {
            failure,
            _marker: PhantomData,
        }
    }
}

impl<T: Send + 'static> Publisher<T> for FailureSource<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        fail_subscriber(&subscriber, self.failure.clone());
    }
}

/// Defers publisher creation to subscription time. An absent supplier result
/// is a protocol violation delivered to the subscriber.
pub(crate) struct DeferredSource<T, F> {
    supplier: F,
    _marker: PhantomData<fn() -> T>,
}

impl<T, F> DeferredSource<T, F> {
    pub(crate) fn new(supplier: F) -> Self {
        DeferredSource {
            supplier,
            _marker: PhantomData,
        }
    }
}

impl<T, F> Publisher<T> for DeferredSource<T, F>
where
    T: Send + 'static,
    F: Fn() -> Option<Multi<T>> + Send + Sync,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        match (self.supplier)() {
            Some(multi) => multi.subscribe_with(subscriber),
            None => fail_subscriber(&subscriber, StreamError::supplier_returned_none()),
        }
    }
}
