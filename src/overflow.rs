use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering},
    Arc, Mutex,
};

use tracing::trace;

use crate::{
    error::StreamError,
    multi::Multi,
    queue::{ItemQueue, QueueSupplier},
    subscription::{
        add_request, consumed, Publisher, SlotTermination, Subscriber, Subscription,
        SubscriptionSlot, UNBOUNDED,
    },
};

type DropCallback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Buffers items the downstream has not yet requested. When the buffer
/// fills, the rejected item goes to the optional callback, the upstream is
/// cancelled, and a back-pressure failure surfaces.
pub(crate) struct OverflowBufferOp<T> {
    upstream: Multi<T>,
    queue_supplier: QueueSupplier<T>,
    on_overflow: Option<DropCallback<T>>,
}

impl<T> OverflowBufferOp<T> {
    pub(crate) fn new(
        upstream: Multi<T>,
        queue_supplier: QueueSupplier<T>,
        on_overflow: Option<DropCallback<T>>,
    ) -> Self {
        OverflowBufferOp {
            upstream,
            queue_supplier,
            on_overflow,
        }
    }
}

impl<T: Send + 'static> Publisher<T> for OverflowBufferOp<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let state = Arc::new(BufferState {
            downstream: subscriber,
            upstream: SubscriptionSlot::new(),
            queue: (self.queue_supplier)(),
            on_overflow: self.on_overflow.clone(),
            requested: AtomicU64::new(0),
            wip: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            failure: Mutex::new(None),
        });
        self.upstream
            .subscribe_with(Arc::new(BufferSubscriber(state)));
    }
}

struct BufferState<T> {
    downstream: Arc<dyn Subscriber<T>>,
    upstream: SubscriptionSlot,
    queue: Box<dyn ItemQueue<T>>,
    on_overflow: Option<DropCallback<T>>,
    requested: AtomicU64,
    wip: AtomicUsize,
    done: AtomicBool,
    /// Downstream cancellation; distinct from the upstream slot, which the
    /// overflow path cancels while the failure still has to drain out.
    cancelled: AtomicBool,
    failure: Mutex<Option<StreamError>>,
}

impl<T: Send + 'static> BufferState<T> {
    /// Stores the failure before flipping `done`, so a drain that observes
    /// `done` always finds the failure it belongs to.
    fn record_failure(&self, failure: StreamError) {
        let mut slot = self.failure.lock().unwrap();
        if !self.done.load(AtomicOrdering::Acquire) {
            *slot = Some(failure);
            self.done.store(true, AtomicOrdering::Release);
        }
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, AtomicOrdering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            if self.cancelled.load(AtomicOrdering::Acquire) {
                self.queue.clear();
                return;
            }
            if self.done.load(AtomicOrdering::Acquire) {
                // A failure preempts whatever is still buffered.
                let failure = self.failure.lock().unwrap().take();
                if let Some(failure) = failure {
                    self.queue.clear();
                    self.downstream.on_failure(failure);
                    return;
                }
            }
            let r = self.requested.load(AtomicOrdering::Acquire);
            let mut emitted = 0u64;
            while emitted != r {
                if self.cancelled.load(AtomicOrdering::Acquire) {
                    self.queue.clear();
                    return;
                }
                match self.queue.poll() {
                    Some(item) => {
                        self.downstream.on_next(item);
                        emitted += 1;
                    },
                    None => break,
                }
            }
            if emitted != 0 {
                consumed(&self.requested, emitted);
            }
            if self.done.load(AtomicOrdering::Acquire)
                && self.queue.is_empty()
                && self.failure.lock().unwrap().is_none()
            {
                self.downstream.on_complete();
                return;
            }
            missed = self.wip.fetch_sub(missed, AtomicOrdering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }
}

impl<T: Send + 'static> Subscription for BufferState<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            self.upstream.cancel();
            self.record_failure(StreamError::invalid_request());
            self.drain();
            return;
        }
        add_request(&self.requested, n);
        self.drain();
    }

    fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::Release);
        self.upstream.cancel();
        if self.wip.fetch_add(1, AtomicOrdering::AcqRel) == 0 {
            self.queue.clear();
        }
    }
}

struct BufferSubscriber<T>(Arc<BufferState<T>>);

impl<T: Send + 'static> Subscriber<T> for BufferSubscriber<T> {
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
        let state = &self.0;
        if state.done.load(AtomicOrdering::Acquire) {
            return;
        }
        match state.queue.offer(item) {
            Ok(()) => state.drain(),
            Err(rejected) => {
                trace!("overflow buffer saturated, failing");
                if let Some(callback) = &state.on_overflow {
                    callback(rejected);
                }
                state.upstream.cancel();
                state.record_failure(StreamError::BackPressure(
                    "buffer full, cannot emit item".to_owned(),
                ));
                state.drain();
            },
        }
    }

    fn on_failure(&self, failure: StreamError) {
        self.0.record_failure(failure);
        self.0.drain();
    }

    fn on_complete(&self) {
        self.0.done.store(true, AtomicOrdering::Release);
        self.0.drain();
    }
}

/// Discards items arriving while downstream demand is zero, handing each
/// discarded item to the optional callback.
pub(crate) struct OverflowDropOp<T> {
    upstream: Multi<T>,
    on_drop: Option<DropCallback<T>>,
}

impl<T> OverflowDropOp<T> {
    pub(crate) fn new(upstream: Multi<T>, on_drop: Option<DropCallback<T>>) -> Self {
        OverflowDropOp { upstream, on_drop }
    }
}

impl<T: Send + 'static> Publisher<T> for OverflowDropOp<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let state = Arc::new(DropState {
            downstream: subscriber,
            upstream: SubscriptionSlot::new(),
            on_drop: self.on_drop.clone(),
            requested: AtomicU64::new(0),
            done: AtomicBool::new(false),
        });
        self.upstream.subscribe_with(Arc::new(DropSubscriber(state)));
    }
}

struct DropState<T> {
    downstream: Arc<dyn Subscriber<T>>,
    upstream: SubscriptionSlot,
    on_drop: Option<DropCallback<T>>,
    requested: AtomicU64,
    done: AtomicBool,
}

impl<T: Send + 'static> Subscription for DropState<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            self.upstream.cancel();
            if !self.done.swap(true, AtomicOrdering::AcqRel) {
                self.downstream.on_failure(StreamError::invalid_request());
            }
            return;
        }
        add_request(&self.requested, n);
    }

    fn cancel(&self) {
        self.upstream.cancel();
    }
}

struct DropSubscriber<T>(Arc<DropState<T>>);

impl<T: Send + 'static> Subscriber<T> for DropSubscriber<T> {
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
        let state = &self.0;
        if state.done.load(AtomicOrdering::Acquire) || state.upstream.is_cancelled() {
            return;
        }
        if state.requested.load(AtomicOrdering::Acquire) > 0 {
            state.downstream.on_next(item);
            consumed(&state.requested, 1);
        } else if let Some(callback) = &state.on_drop {
            callback(item);
        }
    }

    fn on_failure(&self, failure: StreamError) {
        let state = &self.0;
        match state.upstream.terminate() {
            SlotTermination::AlreadyCancelled => {},
            _ => {
                if !state.done.swap(true, AtomicOrdering::AcqRel) {
                    state.downstream.on_failure(failure);
                }
            },
        }
    }

    fn on_complete(&self) {
        let state = &self.0;
        match state.upstream.terminate() {
            SlotTermination::AlreadyCancelled => {},
            _ => {
                if !state.done.swap(true, AtomicOrdering::AcqRel) {
                    state.downstream.on_complete();
                }
            },
        }
    }
}

/// Retains only the most recent item while downstream demand is zero.
pub(crate) struct OverflowKeepLastOp<T> {
    upstream: Multi<T>,
}

impl<T> OverflowKeepLastOp<T> {
    pub(crate) fn new(upstream: Multi<T>) -> Self {
        OverflowKeepLastOp { upstream }
    }
}

impl<T: Send + 'static> Publisher<T> for OverflowKeepLastOp<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let state = Arc::new(KeepLastState {
            downstream: subscriber,
            upstream: SubscriptionSlot::new(),
            last: Mutex::new(None),
            requested: AtomicU64::new(0),
            wip: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            failure: Mutex::new(None),
        });
        self.upstream
            .subscribe_with(Arc::new(KeepLastSubscriber(state)));
    }
}

struct KeepLastState<T> {
    downstream: Arc<dyn Subscriber<T>>,
    upstream: SubscriptionSlot,
    last: Mutex<Option<T>>,
    requested: AtomicU64,
    wip: AtomicUsize,
    done: AtomicBool,
    cancelled: AtomicBool,
    failure: Mutex<Option<StreamError>>,
}

impl<T: Send + 'static> KeepLastState<T> {
    fn record_failure(&self, failure: StreamError) {
        let mut slot = self.failure.lock().unwrap();
        if !self.done.load(AtomicOrdering::Acquire) {
            *slot = Some(failure);
            self.done.store(true, AtomicOrdering::Release);
        }
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, AtomicOrdering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            if self.cancelled.load(AtomicOrdering::Acquire) {
                self.last.lock().unwrap().take();
                return;
            }
            if self.done.load(AtomicOrdering::Acquire) {
                let failure = self.failure.lock().unwrap().take();
                if let Some(failure) = failure {
                    self.last.lock().unwrap().take();
                    self.downstream.on_failure(failure);
                    return;
                }
            }
            if self.requested.load(AtomicOrdering::Acquire) > 0 {
                let item = self.last.lock().unwrap().take();
                if let Some(item) = item {
                    self.downstream.on_next(item);
                    consumed(&self.requested, 1);
                }
            }
            if self.done.load(AtomicOrdering::Acquire) && self.last.lock().unwrap().is_none() {
                self.downstream.on_complete();
                return;
            }
            missed = self.wip.fetch_sub(missed, AtomicOrdering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }
}

impl<T: Send + 'static> Subscription for KeepLastState<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            self.upstream.cancel();
            self.record_failure(StreamError::invalid_request());
            self.drain();
            return;
        }
        add_request(&self.requested, n);
        self.drain();
    }

    fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::Release);
        self.upstream.cancel();
        if self.wip.fetch_add(1, AtomicOrdering::AcqRel) == 0 {
            self.last.lock().unwrap().take();
        }
    }
}

struct KeepLastSubscriber<T>(Arc<KeepLastState<T>>);

impl<T: Send + 'static> Subscriber<T> for KeepLastSubscriber<T> {
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
        let state = &self.0;
        if state.done.load(AtomicOrdering::Acquire) {
            return;
        }
        *state.last.lock().unwrap() = Some(item);
        state.drain();
    }

    fn on_failure(&self, failure: StreamError) {
        self.0.record_failure(failure);
        self.0.drain();
    }

    fn on_complete(&self) {
        self.0.done.store(true, AtomicOrdering::Release);
        self.0.drain();
    }
}
