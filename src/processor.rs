use std::sync::{
    atomic::{AtomicBool, Ordering as AtomicOrdering},
    Arc,
};

use tracing::trace;

use crate::{
    error::StreamError,
    subscription::{SlotTermination, Subscriber, Subscription, SubscriptionSlot},
};

/// The shared half of every single-upstream, single-downstream operator:
/// the downstream reference, the set-once upstream slot, and the terminal
/// `done` flag. Operators embed one (behind an `Arc`, so it can double as the
/// subscription handed downstream) and override `on_next` only.
pub(crate) struct ProcessorBase<O> {
    pub(crate) downstream: Arc<dyn Subscriber<O>>,
    pub(crate) upstream: SubscriptionSlot,
    done: AtomicBool,
}

impl<O: Send + 'static> ProcessorBase<O> {
    pub(crate) fn new(downstream: Arc<dyn Subscriber<O>>) -> Self {
        ProcessorBase {
            downstream,
            upstream: SubscriptionSlot::new(),
            done: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.load(AtomicOrdering::Acquire)
    }

    /// Guard for `on_next` overrides: items arriving after a terminal signal
    /// or after cancellation are dropped.
    pub(crate) fn is_done_or_cancelled(&self) -> bool {
        self.is_done() || self.upstream.is_cancelled()
    }

    /// Marks the processor terminal. Returns `true` for the one caller that
    /// performed the transition and may deliver the terminal signal.
    pub(crate) fn set_done(&self) -> bool {
        !self.done.swap(true, AtomicOrdering::AcqRel)
    }

    /// Installs the upstream subscription and hands `this` downstream as its
    /// subscription. A second subscription attempt is cancelled.
    pub(crate) fn install(this: &Arc<Self>, upstream: Arc<dyn Subscription>) {
        if this.upstream.set(Arc::clone(&upstream)) {
            this.downstream
                .on_subscribe(Arc::clone(this) as Arc<dyn Subscription>);
        } else {
            upstream.cancel();
        }
    }

    /// Cancels upstream, marks terminal, and delivers `failure` downstream.
    /// A no-op when the subscription was already cancelled: signals arriving
    /// after cancellation are discarded.
    pub(crate) fn fail_and_cancel(&self, failure: StreamError) {
        trace!(?failure, "failing and cancelling upstream");
        match self.upstream.terminate() {
            SlotTermination::AlreadyCancelled => {},
            SlotTermination::Live(upstream) => {
                upstream.cancel();
                if self.set_done() {
                    self.downstream.on_failure(failure);
                }
            },
            SlotTermination::Empty => {
                if self.set_done() {
                    self.downstream.on_failure(failure);
                }
            },
        }
    }

    /// Upstream failure path: closes the slot against late signals (without
    /// cancelling a source that is already terminal) and forwards once.
    pub(crate) fn upstream_failure(&self, failure: StreamError) {
        match self.upstream.terminate() {
            SlotTermination::AlreadyCancelled => {},
            _ => {
                if self.set_done() {
                    self.downstream.on_failure(failure);
                }
            },
        }
    }

    /// Upstream completion path, mirroring [`upstream_failure`].
    pub(crate) fn upstream_complete(&self) {
        match self.upstream.terminate() {
            SlotTermination::AlreadyCancelled => {},
            _ => {
                if self.set_done() {
                    self.downstream.on_complete();
                }
            },
        }
    }

    /// Cancels upstream and completes downstream, for operators that end the
    /// stream early (take, take-while).
    pub(crate) fn complete_and_cancel(&self) {
        match self.upstream.terminate() {
            SlotTermination::AlreadyCancelled => {},
            SlotTermination::Live(upstream) => {
                upstream.cancel();
                if self.set_done() {
                    self.downstream.on_complete();
                }
            },
            SlotTermination::Empty => {
                if self.set_done() {
                    self.downstream.on_complete();
                }
            },
        }
    }

    /// Requests replenishment from upstream, e.g. after dropping an item
    /// that consumed demand without producing output.
    pub(crate) fn request_upstream(&self, n: u64) {
        if let Some(upstream) = self.upstream.get() {
            upstream.request(n);
        }
    }
}

/// Default downstream-facing subscription behavior: validate and forward.
impl<O: Send + 'static> Subscription for ProcessorBase<O> {
    fn request(&self, n: u64) {
        if n == 0 {
            self.fail_and_cancel(StreamError::invalid_request());
            return;
        }
        if let Some(upstream) = self.upstream.get() {
            upstream.request(n);
        }
    }

    fn cancel(&self) {
        if let SlotTermination::Live(upstream) = self.upstream.terminate() {
            trace!("downstream cancelled, propagating upstream");
            upstream.cancel();
        }
    }
}
