use arc_swap::{ArcSwap, ArcSwapOption};
use std::{
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering},
        Arc, Mutex, Weak,
    },
};

use tracing::trace;

use crate::{
    error::StreamError,
    multi::Multi,
    queue::{bounded_queue, ItemQueue, QueueSupplier},
    serialized::SerializedSubscriber,
    subscription::{
        add_request, consumed, unbounded_or, unbounded_or_limit, Publisher, Subscriber,
        Subscription, SubscriptionSlot, UNBOUNDED,
    },
};

/// Tuning knobs of the merge engine.
#[derive(Clone)]
pub struct FlatMapConfig {
    max_concurrency: usize,
    postpone_failure: bool,
}

impl Default for FlatMapConfig {
    fn default() -> Self {
        FlatMapConfig {
            max_concurrency: 128,
            postpone_failure: false,
        }
    }
}

impl FlatMapConfig {
    pub fn new() -> Self {
        FlatMapConfig::default()
    }

    /// Upper bound on simultaneously subscribed inner streams; also the
    /// prefetch of each inner subscription. Must be positive.
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        assert!(max_concurrency > 0, "max_concurrency must be positive");
        self.max_concurrency = max_concurrency;
        self
    }

    /// Collect failures and surface them only after every inner stream has
    /// drained, instead of failing fast.
    pub fn postpone_failure(mut self, postpone: bool) -> Self {
        self.postpone_failure = postpone;
        self
    }
}

/// Accumulated failures, shared by the upstream and every inner stream.
/// `Terminated` marks an already-surfaced terminal; anything arriving after
/// it is dropped.
enum Failures {
    None,
    Single(StreamError),
    Composite(Vec<StreamError>),
    Terminated,
}

enum TakenFailure {
    None,
    Failure(StreamError),
    AlreadySurfaced,
}

/// Maps each upstream item to an inner stream and merges up to
/// `max_concurrency` of them, serializing their emissions downstream behind
/// one WIP-guarded drain loop.
pub(crate) struct FlatMapOp<I, O, F> {
    upstream: Multi<I>,
    mapper: F,
    config: FlatMapConfig,
    inner_queue_supplier: QueueSupplier<O>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O: Send + 'static, F> FlatMapOp<I, O, F> {
    pub(crate) fn new(upstream: Multi<I>, mapper: F, config: FlatMapConfig) -> Self {
        let inner_queue_supplier = bounded_queue(config.max_concurrency);
        FlatMapOp {
            upstream,
            mapper,
            config,
            inner_queue_supplier,
            _marker: PhantomData,
        }
    }
}

impl<I, O, F> Publisher<O> for FlatMapOp<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Option<Multi<O>> + Clone + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<O>>) {
        let main = Arc::new(FlatMapMain {
            downstream: Arc::new(SerializedSubscriber::new(subscriber)) as Arc<dyn Subscriber<O>>,
            mapper: self.mapper.clone(),
            postpone_failure: self.config.postpone_failure,
            max_concurrency: self.config.max_concurrency,
            inner_queue_supplier: Arc::clone(&self.inner_queue_supplier),
            queue: ArcSwapOption::from(None),
            failures: Mutex::new(Failures::None),
            done: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            upstream: SubscriptionSlot::new(),
            requested: AtomicU64::new(0),
            wip: AtomicUsize::new(0),
            inners: InnerRegistry::new(),
            last_index: AtomicUsize::new(0),
            _marker: PhantomData,
        });
        self.upstream
            .subscribe_with(Arc::new(FlatMapMainSubscriber(main)));
    }
}

struct FlatMapMain<I, O, F> {
    downstream: Arc<dyn Subscriber<O>>,
    mapper: F,
    postpone_failure: bool,
    max_concurrency: usize,
    inner_queue_supplier: QueueSupplier<O>,
    /// Main queue, created lazily by operator variants that feed it; the
    /// drain and the failure path handle it whenever present.
    queue: ArcSwapOption<Box<dyn ItemQueue<O>>>,
    failures: Mutex<Failures>,
    done: AtomicBool,
    cancelled: AtomicBool,
    upstream: SubscriptionSlot,
    requested: AtomicU64,
    wip: AtomicUsize,
    inners: InnerRegistry<O>,
    /// Round-robin cursor over the inner array, saved between drains.
    last_index: AtomicUsize,
    _marker: PhantomData<fn(I)>,
}

impl<I, O, F> FlatMapMain<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Option<Multi<O>> + Send + Sync + 'static,
{
    /// Appends a failure unless one has already been surfaced.
    fn add_failure(&self, failure: StreamError) -> bool {
        let mut guard = self.failures.lock().unwrap();
        let (next, added) = match std::mem::replace(&mut *guard, Failures::Terminated) {
            Failures::Terminated => (Failures::Terminated, false),
            Failures::None => (Failures::Single(failure), true),
            Failures::Single(first) => (Failures::Composite(vec![first, failure]), true),
            Failures::Composite(mut parts) => {
                parts.push(failure);
                (Failures::Composite(parts), true)
            },
        };
        *guard = next;
        added
    }

    /// Takes the accumulated failure for surfacing, leaving the
    /// already-surfaced marker behind.
    fn take_failure(&self) -> TakenFailure {
        let mut guard = self.failures.lock().unwrap();
        match std::mem::replace(&mut *guard, Failures::Terminated) {
            Failures::None => {
                *guard = Failures::None;
                TakenFailure::None
            },
            Failures::Terminated => TakenFailure::AlreadySurfaced,
            Failures::Single(failure) => TakenFailure::Failure(failure),
            Failures::Composite(mut parts) => TakenFailure::Failure(if parts.len() == 1 {
                parts.remove(0)
            } else {
                StreamError::Composite(parts)
            }),
        }
    }

    fn has_pending_failure(&self) -> bool {
        matches!(
            &*self.failures.lock().unwrap(),
            Failures::Single(_) | Failures::Composite(_)
        )
    }

    fn fail_overflow(&self) {
        self.add_failure(StreamError::BackPressure(
            "buffer full, cannot emit item".to_owned(),
        ));
    }

    fn clear_main_queue(&self) {
        if let Some(queue) = self.queue.swap(None) {
            queue.clear();
        }
    }

    /// Tears the operator down: main queue, upstream subscription, and every
    /// inner. On the failure-surface path the inner subscriptions are left
    /// uncancelled (only their queues are released), preserving the
    /// conditional-cancel behavior of the drain contract.
    fn cancel_upstream(&self, from_failure: bool) {
        self.clear_main_queue();
        self.upstream.cancel();
        for inner in self.inners.terminate() {
            inner.disconnect(!from_failure);
        }
    }

    fn get_or_create_inner_queue(&self, inner: &FlatMapInner<O>) -> Arc<Box<dyn ItemQueue<O>>> {
        if let Some(queue) = inner.queue.load_full() {
            return queue;
        }
        let queue: Arc<Box<dyn ItemQueue<O>>> = Arc::new((self.inner_queue_supplier)());
        inner.queue.store(Some(Arc::clone(&queue)));
        queue
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, AtomicOrdering::AcqRel) != 0 {
            return;
        }
        self.drain_loop();
    }

    /// Serialized drain: at most one thread runs it; concurrent signals bump
    /// WIP and are observed as missed work.
    fn drain_loop(&self) {
        let mut missed = 1;

        loop {
            let snapshot = self.inners.snapshot();
            let n = snapshot.len();
            let main_queue = self.queue.load_full();
            let no_sources = self.inners.is_empty();

            if self.check_terminated() {
                return;
            }

            let mut again = false;
            let mut r = self.requested.load(AtomicOrdering::Acquire);
            let mut emitted = 0u64;
            let mut replenish_main = 0u64;

            // Main-queue pass.
            if r != 0 {
                if let Some(queue) = &main_queue {
                    while emitted != r {
                        let item = queue.poll();
                        if self.check_terminated() {
                            return;
                        }
                        match item {
                            None => break,
                            Some(item) => {
                                self.downstream.on_next(item);
                                emitted += 1;
                            },
                        }
                    }
                    if emitted != 0 {
                        replenish_main += emitted;
                        if r != UNBOUNDED {
                            r = consumed(&self.requested, emitted);
                        }
                        emitted = 0;
                        again = true;
                    }
                }
            }

            // Inner round-robin, resuming from the saved cursor.
            if r != 0 && !no_sources && n != 0 {
                let mut j = self.last_index.load(AtomicOrdering::Acquire);
                if j >= n {
                    j = 0;
                }
                for _ in 0..n {
                    if self.cancelled.load(AtomicOrdering::Acquire) {
                        self.cancel_upstream(false);
                        return;
                    }
                    if let Some(inner) = &snapshot[j] {
                        match inner.queue.load_full() {
                            None => {
                                if inner.done.load(AtomicOrdering::Acquire) {
                                    self.inners.remove(inner.index.load(AtomicOrdering::Acquire));
                                    again = true;
                                    replenish_main += 1;
                                }
                            },
                            Some(queue) => {
                                while emitted != r {
                                    let inner_done = inner.done.load(AtomicOrdering::Acquire);
                                    let item = queue.poll();
                                    let empty = item.is_none();
                                    if self.check_terminated() {
                                        return;
                                    }
                                    if inner_done && empty {
                                        self.inners
                                            .remove(inner.index.load(AtomicOrdering::Acquire));
                                        again = true;
                                        replenish_main += 1;
                                        break;
                                    }
                                    match item {
                                        None => break,
                                        Some(item) => {
                                            self.downstream.on_next(item);
                                            emitted += 1;
                                        },
                                    }
                                }
                                if emitted == r {
                                    let inner_done = inner.done.load(AtomicOrdering::Acquire);
                                    if inner_done && queue.is_empty() {
                                        self.inners
                                            .remove(inner.index.load(AtomicOrdering::Acquire));
                                        again = true;
                                        replenish_main += 1;
                                    }
                                }
                                if emitted != 0 {
                                    if !inner.done.load(AtomicOrdering::Acquire) {
                                        inner.replenish(emitted);
                                    }
                                    if r != UNBOUNDED {
                                        r = consumed(&self.requested, emitted);
                                        if r == 0 {
                                            emitted = 0;
                                            break;
                                        }
                                    }
                                    emitted = 0;
                                }
                            },
                        }
                    }
                    if r == 0 {
                        break;
                    }
                    j += 1;
                    if j == n {
                        j = 0;
                    }
                }
                self.last_index.store(j, AtomicOrdering::Release);
            }

            // Demand is exhausted: sweep out inners that finished but could
            // not be removed in the demand-limited pass.
            if r == 0 && !no_sources {
                let sweep = self.inners.snapshot();
                for slot in sweep.iter() {
                    if self.cancelled.load(AtomicOrdering::Acquire) {
                        self.cancel_upstream(false);
                        return;
                    }
                    let inner = match slot {
                        Some(inner) => inner,
                        None => continue,
                    };
                    let inner_done = inner.done.load(AtomicOrdering::Acquire);
                    let empty = inner
                        .queue
                        .load()
                        .as_ref()
                        .map_or(true, |queue| queue.is_empty());
                    if !empty {
                        break;
                    }
                    if inner_done && empty {
                        self.inners.remove(inner.index.load(AtomicOrdering::Acquire));
                        again = true;
                        replenish_main += 1;
                    }
                }
            }

            // Every removed inner frees one upstream concurrency slot.
            if replenish_main != 0
                && !self.done.load(AtomicOrdering::Acquire)
                && !self.cancelled.load(AtomicOrdering::Acquire)
            {
                if let Some(upstream) = self.upstream.get() {
                    upstream.request(replenish_main);
                }
            }

            if again {
                continue;
            }

            missed = self.wip.fetch_sub(missed, AtomicOrdering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }

    fn check_terminated(&self) -> bool {
        if self.cancelled.load(AtomicOrdering::Acquire) {
            self.cancel_upstream(false);
            return true;
        }
        self.handle_termination_if_done()
    }

    fn handle_termination_if_done(&self) -> bool {
        let was_done = self.done.load(AtomicOrdering::Acquire);
        let is_empty = self.inners.is_empty()
            && self
                .queue
                .load()
                .as_ref()
                .map_or(true, |queue| queue.is_empty());
        if self.postpone_failure {
            if was_done && is_empty {
                match self.take_failure() {
                    TakenFailure::Failure(failure) => {
                        trace!("surfacing postponed failure");
                        self.downstream.on_failure(failure);
                    },
                    TakenFailure::None => self.downstream.on_complete(),
                    TakenFailure::AlreadySurfaced => {},
                }
                return true;
            }
        } else if was_done {
            if self.has_pending_failure() {
                match self.take_failure() {
                    TakenFailure::Failure(failure) => {
                        self.clear_main_queue();
                        for inner in self.inners.terminate() {
                            inner.disconnect(false);
                        }
                        self.downstream.on_failure(failure);
                    },
                    _ => {},
                }
                return true;
            } else if is_empty {
                self.downstream.on_complete();
                return true;
            }
        }
        false
    }
}

trait InnerParent<O>: Send + Sync {
    fn try_emit(&self, inner: &FlatMapInner<O>, item: O);
    fn inner_failure(&self, inner: &FlatMapInner<O>, failure: StreamError);
    fn inner_complete(&self);
}

impl<I, O, F> InnerParent<O> for FlatMapMain<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Option<Multi<O>> + Send + Sync + 'static,
{
    /// Emission fast path: with the drain lock free, downstream demand
    /// available and nothing queued for this inner, the item goes straight
    /// downstream. Otherwise it is queued and the drain takes over.
    fn try_emit(&self, inner: &FlatMapInner<O>, item: O) {
        if inner.done.load(AtomicOrdering::Acquire) {
            return;
        }
        if self
            .wip
            .compare_exchange(0, 1, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
            .is_ok()
        {
            let r = self.requested.load(AtomicOrdering::Acquire);
            let queue_empty = inner
                .queue
                .load()
                .as_ref()
                .map_or(true, |queue| queue.is_empty());
            if r != 0 && queue_empty {
                self.downstream.on_next(item);
                if r != UNBOUNDED {
                    self.requested.fetch_sub(1, AtomicOrdering::AcqRel);
                }
                inner.replenish(1);
            } else {
                let queue = self.get_or_create_inner_queue(inner);
                if queue.offer(item).is_err() {
                    self.fail_overflow();
                    inner.done.store(true, AtomicOrdering::Release);
                    self.drain_loop();
                    return;
                }
            }
            if self.wip.fetch_sub(1, AtomicOrdering::AcqRel) == 1 {
                return;
            }
            self.drain_loop();
        } else {
            let queue = self.get_or_create_inner_queue(inner);
            if queue.offer(item).is_err() {
                self.fail_overflow();
                inner.done.store(true, AtomicOrdering::Release);
            }
            self.drain();
        }
    }

    fn inner_failure(&self, inner: &FlatMapInner<O>, failure: StreamError) {
        if self.add_failure(failure) {
            inner.done.store(true, AtomicOrdering::Release);
            if !self.postpone_failure {
                self.cancel_upstream(true);
                if let TakenFailure::Failure(failure) = self.take_failure() {
                    self.downstream.on_failure(failure);
                }
            } else {
                self.drain();
            }
        }
    }

    fn inner_complete(&self) {
        self.drain();
    }
}

impl<I, O, F> Subscription for FlatMapMain<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Option<Multi<O>> + Send + Sync + 'static,
{
    fn request(&self, n: u64) {
        if n == 0 {
            self.add_failure(StreamError::invalid_request());
            self.done.store(true, AtomicOrdering::Release);
            self.cancel_upstream(false);
            self.drain();
            return;
        }
        add_request(&self.requested, n);
        self.drain();
    }

    fn cancel(&self) {
        if !self.cancelled.swap(true, AtomicOrdering::AcqRel)
            && self.wip.fetch_add(1, AtomicOrdering::AcqRel) == 0
        {
            self.clear_main_queue();
            self.upstream.cancel();
            for inner in self.inners.terminate() {
                inner.disconnect(true);
            }
        }
    }
}

struct FlatMapMainSubscriber<I, O, F>(Arc<FlatMapMain<I, O, F>>);

impl<I, O, F> Subscriber<I> for FlatMapMainSubscriber<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Option<Multi<O>> + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let main = &self.0;
        if main.upstream.set(Arc::clone(&subscription)) {
            main.downstream
                .on_subscribe(Arc::clone(main) as Arc<dyn Subscription>);
            subscription.request(unbounded_or(main.max_concurrency));
        } else {
            subscription.cancel();
        }
    }

    fn on_next(&self, item: I) {
        let main = &self.0;
        if main.done.load(AtomicOrdering::Acquire) {
            return;
        }
        let mapped = (main.mapper)(item);
        match mapped {
            None => {
                main.add_failure(StreamError::mapper_returned_none());
                main.cancelled.store(true, AtomicOrdering::Release);
                main.done.store(true, AtomicOrdering::Release);
                main.cancel_upstream(false);
                main.handle_termination_if_done();
            },
            Some(publisher) => {
                let inner = Arc::new(FlatMapInner::new(
                    Arc::downgrade(&(Arc::clone(main) as Arc<dyn InnerParent<O>>)),
                    main.max_concurrency,
                ));
                if main.inners.add(&inner) {
                    publisher.subscribe_with(inner as Arc<dyn Subscriber<O>>);
                }
            },
        }
    }

    fn on_failure(&self, failure: StreamError) {
        let main = &self.0;
        if main.done.load(AtomicOrdering::Acquire) {
            return;
        }
        main.add_failure(failure);
        main.done.store(true, AtomicOrdering::Release);
        main.drain();
    }

    fn on_complete(&self) {
        let main = &self.0;
        if main.done.load(AtomicOrdering::Acquire) {
            return;
        }
        main.done.store(true, AtomicOrdering::Release);
        main.drain();
    }
}

/// One subscribed inner stream: its subscription, lazily-created queue and
/// the produced counter driving the 75% replenish threshold.
struct FlatMapInner<O> {
    parent: Weak<dyn InnerParent<O>>,
    prefetch: usize,
    limit: u64,
    subscription: SubscriptionSlot,
    produced: AtomicU64,
    queue: ArcSwapOption<Box<dyn ItemQueue<O>>>,
    done: AtomicBool,
    /// Slot in the parent registry; maintained by the registry itself.
    index: AtomicUsize,
}

impl<O: Send + 'static> FlatMapInner<O> {
    fn new(parent: Weak<dyn InnerParent<O>>, prefetch: usize) -> Self {
        FlatMapInner {
            parent,
            prefetch,
            limit: unbounded_or_limit(prefetch),
            subscription: SubscriptionSlot::new(),
            produced: AtomicU64::new(0),
            queue: ArcSwapOption::from(None),
            done: AtomicBool::new(false),
            index: AtomicUsize::new(0),
        }
    }

    /// Credits `n` drained items and requests a batch from the inner
    /// subscription once the threshold is crossed.
    fn replenish(&self, n: u64) {
        let total = self.produced.load(AtomicOrdering::Acquire) + n;
        if total >= self.limit {
            self.produced.store(0, AtomicOrdering::Release);
            if let Some(subscription) = self.subscription.get() {
                subscription.request(total);
            }
        } else {
            self.produced.store(total, AtomicOrdering::Release);
        }
    }

    /// Releases the inner: optionally cancels its subscription, always marks
    /// it done and frees its queue.
    fn disconnect(&self, cancel_subscription: bool) {
        if cancel_subscription {
            self.subscription.cancel();
        }
        self.done.store(true, AtomicOrdering::Release);
        if let Some(queue) = self.queue.swap(None) {
            queue.clear();
        }
    }
}

impl<O: Send + 'static> Subscriber<O> for FlatMapInner<O> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.subscription.set(Arc::clone(&subscription)) {
            subscription.request(unbounded_or(self.prefetch));
        } else {
            subscription.cancel();
        }
    }

    fn on_next(&self, item: O) {
        if let Some(parent) = self.parent.upgrade() {
            parent.try_emit(self, item);
        }
    }

    fn on_failure(&self, failure: StreamError) {
        self.done.store(true, AtomicOrdering::Release);
        if let Some(parent) = self.parent.upgrade() {
            parent.inner_failure(self, failure);
        }
    }

    fn on_complete(&self) {
        self.done.store(true, AtomicOrdering::Release);
        if let Some(parent) = self.parent.upgrade() {
            parent.inner_complete();
        }
    }
}

type InnerArray<O> = Vec<Option<Arc<FlatMapInner<O>>>>;

/// Copy-on-write registry of the live inner streams. Slots are reused and
/// the array only grows; termination swaps in an identity-compared sentinel
/// so late adds are refused.
struct InnerRegistry<O> {
    array: ArcSwap<InnerArray<O>>,
    terminated: Arc<InnerArray<O>>,
}

impl<O: Send + 'static> InnerRegistry<O> {
    fn new() -> Self {
        InnerRegistry {
            array: ArcSwap::from_pointee(Vec::new()),
            terminated: Arc::new(Vec::new()),
        }
    }

    /// Adds `inner` into a free slot (or a new one), recording the slot in
    /// `inner.index`. Fails when the registry is terminated.
    fn add(&self, inner: &Arc<FlatMapInner<O>>) -> bool {
        let mut added = false;
        self.array.rcu(|current| {
            if Arc::ptr_eq(current, &self.terminated) {
                added = false;
                return Arc::clone(current);
            }
            added = true;
            let mut next: InnerArray<O> = (**current).clone();
            match next.iter().position(Option::is_none) {
                Some(free) => {
                    inner.index.store(free, AtomicOrdering::Release);
                    next[free] = Some(Arc::clone(inner));
                },
                None => {
                    inner.index.store(next.len(), AtomicOrdering::Release);
                    next.push(Some(Arc::clone(inner)));
                },
            }
            Arc::new(next)
        });
        added
    }

    fn remove(&self, index: usize) {
        self.array.rcu(|current| {
            if Arc::ptr_eq(current, &self.terminated) || index >= current.len() {
                return Arc::clone(current);
            }
            let mut next: InnerArray<O> = (**current).clone();
            next[index] = None;
            Arc::new(next)
        });
    }

    fn snapshot(&self) -> Arc<InnerArray<O>> {
        self.array.load_full()
    }

    fn is_empty(&self) -> bool {
        self.array.load().iter().all(Option::is_none)
    }

    /// Swaps in the terminated sentinel and hands back the inners that were
    /// live, exactly once; a second terminate returns nothing.
    fn terminate(&self) -> Vec<Arc<FlatMapInner<O>>> {
        let previous = self.array.swap(Arc::clone(&self.terminated));
        if Arc::ptr_eq(&previous, &self.terminated) {
            return Vec::new();
        }
        previous.iter().flatten().cloned().collect()
    }
}
