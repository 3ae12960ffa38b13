use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering},
    Arc, Mutex,
};

use crate::subscription::{add_request, Subscription, UNBOUNDED};

/// Lets one downstream subscription span a sequence of upstream
/// subscriptions while preserving demand across the boundaries.
///
/// Requests, produced counts and replacement subscriptions arriving from any
/// thread are recorded as misses and applied inside a WIP-serialized loop:
/// a replacement subscription receives the outstanding demand (minus what
/// earlier subscriptions already produced), and a plain request forwards only
/// its delta to the current subscription.
pub(crate) struct SubscriptionSwitch {
    /// Outstanding downstream demand. Only the drain mutates it.
    requested: AtomicU64,
    current: Mutex<Option<Arc<dyn Subscription>>>,
    missed_requested: AtomicU64,
    missed_produced: AtomicU64,
    missed_subscription: Mutex<Option<Arc<dyn Subscription>>>,
    wip: AtomicUsize,
    cancelled: AtomicBool,
}

impl SubscriptionSwitch {
    pub(crate) fn new() -> Self {
        SubscriptionSwitch {
            requested: AtomicU64::new(0),
            current: Mutex::new(None),
            missed_requested: AtomicU64::new(0),
            missed_produced: AtomicU64::new(0),
            missed_subscription: Mutex::new(None),
            wip: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Acquire)
    }

    /// Records downstream demand. The caller has already validated `n > 0`.
    pub(crate) fn request(&self, n: u64) {
        add_request(&self.missed_requested, n);
        self.drain();
    }

    /// Deducts items the outgoing subscription delivered before the switch.
    pub(crate) fn produced(&self, n: u64) {
        if n == 0 {
            return;
        }
        add_request(&self.missed_produced, n);
        self.drain();
    }

    /// Installs the next upstream subscription; it will be requested the
    /// outstanding demand once the drain applies the switch.
    pub(crate) fn set(&self, subscription: Arc<dyn Subscription>) {
        if self.is_cancelled() {
            subscription.cancel();
            return;
        }
        *self.missed_subscription.lock().unwrap() = Some(subscription);
        self.drain();
    }

    /// Cancels whatever subscription is current or pending. Idempotent.
    pub(crate) fn cancel(&self) {
        if !self.cancelled.swap(true, AtomicOrdering::AcqRel) {
            self.drain();
        }
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, AtomicOrdering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            let added = self.missed_requested.swap(0, AtomicOrdering::AcqRel);
            let produced = self.missed_produced.swap(0, AtomicOrdering::AcqRel);
            let pending = self.missed_subscription.lock().unwrap().take();

            if self.cancelled.load(AtomicOrdering::Acquire) {
                if let Some(pending) = pending {
                    pending.cancel();
                }
                if let Some(current) = self.current.lock().unwrap().take() {
                    current.cancel();
                }
            } else {
                let mut remaining = self.requested.load(AtomicOrdering::Acquire);
                if remaining != UNBOUNDED && added != 0 {
                    remaining = remaining.saturating_add(added);
                    self.requested.store(remaining, AtomicOrdering::Release);
                }
                if remaining != UNBOUNDED && produced != 0 {
                    remaining = remaining.saturating_sub(produced);
                    self.requested.store(remaining, AtomicOrdering::Release);
                }
                if let Some(next) = pending {
                    *self.current.lock().unwrap() = Some(Arc::clone(&next));
                    if remaining > 0 {
                        next.request(remaining);
                    }
                } else if added != 0 {
                    if let Some(current) = &*self.current.lock().unwrap() {
                        current.request(added);
                    }
                }
            }

            missed = self.wip.fetch_sub(missed, AtomicOrdering::AcqRel) - missed;
            if missed == 0 {
                return;
            }
        }
    }
}
