use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering},
        Arc, Mutex,
    },
};

use crate::{
    error::StreamError,
    multi::Multi,
    processor::ProcessorBase,
    subscription::{
        add_request, consumed, Publisher, SlotTermination, Subscriber, Subscription,
        SubscriptionSlot, UNBOUNDED,
    },
};

/// Buffers the last `n` upstream items and replays them, demand-driven, once
/// the upstream completes. Consumes the upstream with unbounded demand.
pub(crate) struct TakeLastOp<T> {
    upstream: Multi<T>,
    count: usize,
}

impl<T> TakeLastOp<T> {
    pub(crate) fn new(upstream: Multi<T>, count: usize) -> Self {
        TakeLastOp { upstream, count }
    }
}

impl<T: Send + 'static> Publisher<T> for TakeLastOp<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        if self.count == 0 {
            let processor = Arc::new(TakeLastZeroProcessor {
                base: Arc::new(ProcessorBase::new(subscriber)),
            });
            self.upstream.subscribe_with(processor);
            return;
        }
        let state = Arc::new(TakeLastState {
            downstream: subscriber,
            upstream: SubscriptionSlot::new(),
            buffer: Mutex::new(VecDeque::with_capacity(self.count)),
            count: self.count,
            requested: AtomicU64::new(0),
            wip: AtomicUsize::new(0),
            upstream_completed: AtomicBool::new(false),
            done: AtomicBool::new(false),
        });
        self.upstream.subscribe_with(Arc::new(TakeLastSubscriber(state)));
    }
}

/// Degenerate form: drop everything, forward the terminal.
struct TakeLastZeroProcessor<T> {
    base: Arc<ProcessorBase<T>>,
}

impl<T: Send + 'static> Subscriber<T> for TakeLastZeroProcessor<T> {
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

struct TakeLastState<T> {
    downstream: Arc<dyn Subscriber<T>>,
    upstream: SubscriptionSlot,
    buffer: Mutex<VecDeque<T>>,
    count: usize,
    requested: AtomicU64,
    wip: AtomicUsize,
    upstream_completed: AtomicBool,
    done: AtomicBool,
}

impl<T: Send + 'static> TakeLastState<T> {
    fn terminate_once(&self) -> bool {
        !self.done.swap(true, AtomicOrdering::AcqRel)
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, AtomicOrdering::AcqRel) != 0 {
            return;
        }
        loop {
            if self.upstream.is_cancelled() {
                return;
            }
            if self.upstream_completed.load(AtomicOrdering::Acquire) {
                let req = self.requested.load(AtomicOrdering::Acquire);
                let mut emitted = 0u64;
                while emitted != req {
                    if self.upstream.is_cancelled() {
                        return;
                    }
                    let item = self.buffer.lock().unwrap().pop_front();
                    match item {
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
                if self.buffer.lock().unwrap().is_empty() {
                    if self.terminate_once() {
                        self.downstream.on_complete();
                    }
                    return;
                }
            }
            if self.wip.fetch_sub(1, AtomicOrdering::AcqRel) == 1 {
                break;
            }
        }
    }
}

impl<T: Send + 'static> Subscription for TakeLastState<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            self.upstream.cancel();
            if self.terminate_once() {
                self.downstream.on_failure(StreamError::invalid_request());
            }
            return;
        }
        add_request(&self.requested, n);
        self.drain();
    }

    fn cancel(&self) {
        self.upstream.cancel();
    }
}

struct TakeLastSubscriber<T>(Arc<TakeLastState<T>>);

impl<T: Send + 'static> Subscriber<T> for TakeLastSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let state = &self.0;
        if state.upstream.set(Arc::clone(&subscription)) {
            state
                .downstream
                .on_subscribe(Arc::clone(state) as Arc<dyn Subscription>);
            subscription.request(UNBOUNDED);
        } else {
            subscription.cancel();
        }
    }

    fn on_next(&self, item: T) {
        let mut buffer = self.0.buffer.lock().unwrap();
        if buffer.len() == self.0.count {
            buffer.pop_front();
        }
        buffer.push_back(item);
    }

    fn on_failure(&self, failure: StreamError) {
        let state = &self.0;
        match state.upstream.terminate() {
            SlotTermination::AlreadyCancelled => {},
            _ => {
                if state.terminate_once() {
                    state.downstream.on_failure(failure);
                }
            },
        }
    }

    fn on_complete(&self) {
        self.0
            .upstream_completed
            .store(true, AtomicOrdering::Release);
        self.0.drain();
    }
}
