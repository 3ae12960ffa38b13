use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering},
    Arc, Mutex,
};

use tracing::trace;

use crate::{
    error::StreamError,
    multi::Multi,
    subscription::{Publisher, Subscriber, Subscription},
    switch::SubscriptionSwitch,
};

/// Subscribes to each source strictly after the previous one completed,
/// preserving downstream demand across the boundaries. A member failure
/// either terminates immediately or, when postponed, is collected and
/// surfaced after the last member drains.
pub(crate) struct ConcatOp<T> {
    sources: Vec<Multi<T>>,
    postpone_failure: bool,
}

impl<T> ConcatOp<T> {
    pub(crate) fn new(sources: Vec<Multi<T>>, postpone_failure: bool) -> Self {
        ConcatOp {
            sources,
            postpone_failure,
        }
    }
}

impl<T: Send + 'static> Publisher<T> for ConcatOp<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let state = Arc::new(ConcatState {
            downstream: subscriber,
            switch: SubscriptionSwitch::new(),
            sources: self.sources.clone(),
            index: AtomicUsize::new(0),
            emitted: AtomicU64::new(0),
            wip: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            postpone_failure: self.postpone_failure,
            failures: Mutex::new(Vec::new()),
        });
        state
            .downstream
            .on_subscribe(Arc::clone(&state) as Arc<dyn Subscription>);
        ConcatState::advance(&state);
    }
}

struct ConcatState<T> {
    downstream: Arc<dyn Subscriber<T>>,
    switch: SubscriptionSwitch,
    sources: Vec<Multi<T>>,
    index: AtomicUsize,
    /// Items the current member delivered; deducted from the outstanding
    /// demand when switching to the next member.
    emitted: AtomicU64,
    /// Serializes member advancement so synchronously-completing members do
    /// not recurse through `advance`.
    wip: AtomicUsize,
    done: AtomicBool,
    postpone_failure: bool,
    failures: Mutex<Vec<StreamError>>,
}

impl<T: Send + 'static> ConcatState<T> {
    fn terminate_once(&self) -> bool {
        !self.done.swap(true, AtomicOrdering::AcqRel)
    }

    /// Subscribes the next member, or delivers the terminal when every
    /// member has completed.
    fn advance(this: &Arc<Self>) {
        if this.wip.fetch_add(1, AtomicOrdering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            if this.switch.is_cancelled() || this.done.load(AtomicOrdering::Acquire) {
                return;
            }
            let index = this.index.load(AtomicOrdering::Acquire);
            if index == this.sources.len() {
                let collected = std::mem::take(&mut *this.failures.lock().unwrap());
                if this.terminate_once() {
                    match fold_failures(collected) {
                        Some(failure) => this.downstream.on_failure(failure),
                        None => this.downstream.on_complete(),
                    }
                }
                return;
            }
            trace!(index, "subscribing next concat member");
            let member = Arc::new(ConcatMemberSubscriber {
                parent: Arc::clone(this),
            });
            this.sources[index].subscribe_with(member);
            missed = this.wip.fetch_sub(missed, AtomicOrdering::AcqRel) - missed;
            if missed == 0 {
                return;
            }
        }
    }
}

impl<T: Send + 'static> Subscription for ConcatState<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            self.switch.cancel();
            if self.terminate_once() {
                self.downstream.on_failure(StreamError::invalid_request());
            }
            return;
        }
        self.switch.request(n);
    }

    fn cancel(&self) {
        self.switch.cancel();
    }
}

struct ConcatMemberSubscriber<T> {
    parent: Arc<ConcatState<T>>,
}

impl<T: Send + 'static> Subscriber<T> for ConcatMemberSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.parent.switch.set(subscription);
    }

    fn on_next(&self, item: T) {
        if self.parent.done.load(AtomicOrdering::Acquire) || self.parent.switch.is_cancelled() {
            return;
        }
        self.parent.emitted.fetch_add(1, AtomicOrdering::AcqRel);
        self.parent.downstream.on_next(item);
    }

    fn on_failure(&self, failure: StreamError) {
        let parent = &self.parent;
        if parent.postpone_failure {
            parent.failures.lock().unwrap().push(failure);
            self.on_complete();
            return;
        }
        if parent.terminate_once() {
            parent.downstream.on_failure(failure);
        }
    }

    fn on_complete(&self) {
        let parent = &self.parent;
        let emitted = parent.emitted.swap(0, AtomicOrdering::AcqRel);
        parent.switch.produced(emitted);
        parent.index.fetch_add(1, AtomicOrdering::AcqRel);
        ConcatState::advance(parent);
    }
}

fn fold_failures(mut collected: Vec<StreamError>) -> Option<StreamError> {
    match collected.len() {
        0 => None,
        1 => Some(collected.remove(0)),
        _ => Some(StreamError::Composite(collected)),
    }
}
