use crossbeam_queue::ArrayQueue;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering},
    Arc, Mutex,
};

use tracing::trace;

use crate::{
    error::{StreamError, TaskRejected},
    multi::Multi,
    queue::ItemQueue,
    subscription::{
        add_request, consumed, Publisher, SlotTermination, Subscriber, Subscription,
        SubscriptionSlot, UNBOUNDED,
    },
};

/// Runs tasks on caller-chosen threads. The emit-on operator submits its
/// drain loop here, so downstream delivery happens only on the executor's
/// threads. A rejection is surfaced to the stream as a terminal failure.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) -> Result<(), TaskRejected>;
}

/// Queue capacity and upstream replenish batch of the hand-off.
const BATCH: usize = 16;

/// Moves emission onto an executor: upstream signals park in a fixed-size
/// queue and a WIP-serialized drain task delivers them downstream. Upstream
/// overrunning the queue is a back-pressure failure.
pub(crate) struct EmitOnOp<T> {
    upstream: Multi<T>,
    executor: Arc<dyn Executor>,
}

impl<T> EmitOnOp<T> {
    pub(crate) fn new(upstream: Multi<T>, executor: Arc<dyn Executor>) -> Self {
        EmitOnOp { upstream, executor }
    }
}

impl<T: Send + 'static> Publisher<T> for EmitOnOp<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let state = Arc::new(EmitOnState {
            downstream: subscriber,
            upstream: SubscriptionSlot::new(),
            executor: Arc::clone(&self.executor),
            queue: ArrayQueue::new(BATCH),
            done: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            failure: Mutex::new(None),
            wip: AtomicUsize::new(0),
            requested: AtomicU64::new(0),
            produced: AtomicU64::new(0),
        });
        self.upstream
            .subscribe_with(Arc::new(EmitOnSubscriber(state)));
    }
}

struct EmitOnState<T> {
    downstream: Arc<dyn Subscriber<T>>,
    upstream: SubscriptionSlot,
    executor: Arc<dyn Executor>,
    queue: ArrayQueue<T>,
    done: AtomicBool,
    cancelled: AtomicBool,
    failure: Mutex<Option<StreamError>>,
    wip: AtomicUsize,
    requested: AtomicU64,
    /// Items emitted but not yet re-requested upstream; carried between
    /// drain runs, touched only under the WIP discipline.
    produced: AtomicU64,
}

impl<T: Send + 'static> EmitOnState<T> {
    fn is_live(&self) -> bool {
        !self.done.load(AtomicOrdering::Acquire) && !self.cancelled.load(AtomicOrdering::Acquire)
    }

    /// Stores the failure before flipping `done`: a drain observing `done`
    /// must find the failure it belongs to.
    fn record_failure(&self, failure: StreamError) {
        let mut slot = self.failure.lock().unwrap();
        if !self.done.load(AtomicOrdering::Acquire) {
            *slot = Some(failure);
            self.done.store(true, AtomicOrdering::Release);
        }
    }

    /// Submits the drain task unless one is already queued or running. An
    /// executor rejection kills the subscription.
    fn schedule(this: &Arc<Self>) {
        if this.wip.fetch_add(1, AtomicOrdering::AcqRel) != 0 {
            return;
        }
        let task = {
            let state = Arc::clone(this);
            Box::new(move || state.run())
        };
        if this.executor.execute(task).is_err() {
            trace!("executor rejected the drain task");
            match this.upstream.terminate() {
                SlotTermination::AlreadyCancelled => {},
                previous => {
                    this.done.store(true, AtomicOrdering::Release);
                    if let SlotTermination::Live(subscription) = previous {
                        subscription.cancel();
                    }
                    this.queue.clear();
                    this.downstream.on_failure(StreamError::failure(TaskRejected));
                },
            }
        }
    }

    /// The drain: runs on the executor, delivers queued items up to the
    /// outstanding demand, replenishes upstream every [`BATCH`] emissions,
    /// and delivers the terminal once done and drained.
    fn run(&self) {
        let mut missed = 1usize;
        let mut emitted = self.produced.load(AtomicOrdering::Acquire);

        loop {
            let mut requests = self.requested.load(AtomicOrdering::Acquire);
            while emitted != requests {
                let was_done = self.done.load(AtomicOrdering::Acquire);
                match self.queue.pop() {
                    None => {
                        if self.is_done_or_cancelled(was_done, true) {
                            return;
                        }
                        break;
                    },
                    Some(item) => {
                        if self.is_done_or_cancelled(was_done, false) {
                            return;
                        }
                        self.downstream.on_next(item);
                        emitted += 1;
                        if emitted == BATCH as u64 {
                            if requests != UNBOUNDED {
                                requests = consumed(&self.requested, emitted);
                            }
                            if let Some(upstream) = self.upstream.get() {
                                upstream.request(emitted);
                            }
                            emitted = 0;
                        }
                    },
                }
            }

            if emitted == requests
                && self.is_done_or_cancelled(
                    self.done.load(AtomicOrdering::Acquire),
                    self.queue.is_empty(),
                )
            {
                return;
            }

            let observed = self.wip.load(AtomicOrdering::Acquire);
            if missed == observed {
                self.produced.store(emitted, AtomicOrdering::Release);
                missed = self.wip.fetch_sub(missed, AtomicOrdering::AcqRel) - missed;
                if missed == 0 {
                    break;
                }
            } else {
                missed = observed;
            }
        }
    }

    fn is_done_or_cancelled(&self, upstream_done: bool, queue_empty: bool) -> bool {
        if self.cancelled.load(AtomicOrdering::Acquire) {
            self.queue.clear();
            return true;
        }
        if upstream_done {
            let failure = self.failure.lock().unwrap().take();
            if let Some(failure) = failure {
                self.downstream.on_failure(failure);
                return true;
            }
            if queue_empty {
                self.downstream.on_complete();
                return true;
            }
        }
        false
    }
}

impl<T: Send + 'static> Subscription for EmitOnSubscription<T> {
    fn request(&self, n: u64) {
        let state = &self.0;
        if n == 0 {
            state.upstream.cancel();
            state.record_failure(StreamError::invalid_request());
            EmitOnState::schedule(state);
            return;
        }
        if state.is_live() {
            add_request(&state.requested, n);
            EmitOnState::schedule(state);
        }
    }

    fn cancel(&self) {
        let state = &self.0;
        if state.cancelled.swap(true, AtomicOrdering::AcqRel) {
            return;
        }
        state.upstream.cancel();
        if state.wip.fetch_add(1, AtomicOrdering::AcqRel) == 0 {
            // No drain in flight; nothing else will free the queue.
            state.queue.clear();
        }
    }
}

struct EmitOnSubscription<T>(Arc<EmitOnState<T>>);

struct EmitOnSubscriber<T>(Arc<EmitOnState<T>>);

impl<T: Send + 'static> Subscriber<T> for EmitOnSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let state = &self.0;
        if state.upstream.set(Arc::clone(&subscription)) {
            state
                .downstream
                .on_subscribe(Arc::new(EmitOnSubscription(Arc::clone(state))));
            subscription.request(BATCH as u64);
        } else {
            subscription.cancel();
        }
    }

    fn on_next(&self, item: T) {
        let state = &self.0;
        if state.done.load(AtomicOrdering::Acquire) {
            return;
        }
        if state.queue.push(item).is_err() {
            state.upstream.cancel();
            state.record_failure(StreamError::BackPressure(
                "queue full, the upstream did not respect the requested demand".to_owned(),
            ));
        }
        EmitOnState::schedule(state);
    }

    fn on_failure(&self, failure: StreamError) {
        let state = &self.0;
        if state.is_live() {
            state.record_failure(failure);
            EmitOnState::schedule(state);
        }
    }

    fn on_complete(&self) {
        let state = &self.0;
        if state.is_live() {
            state.done.store(true, AtomicOrdering::Release);
            EmitOnState::schedule(state);
        }
    }
}
