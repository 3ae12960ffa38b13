#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use riffle::{
    add_request, Executor, Multi, Publisher, StreamError, Subscriber, Subscription, TaskRejected,
    UniSubscriber, UniSubscription, UNBOUNDED,
};

/// What a [`TestSubscriber`] saw, in arrival order.
#[derive(Debug)]
pub enum Signal<T> {
    Subscribed,
    Item(T),
    Failed(StreamError),
    Completed,
}

impl<T> Signal<T> {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::Subscribed => "Subscribed",
            Signal::Item(_) => "Item",
            Signal::Failed(_) => "Failed",
            Signal::Completed => "Completed",
        }
    }
}

/// Recording subscriber: requests `initial_request` on subscribe (0 = wait),
/// optionally cancels itself after a number of items, and keeps every signal
/// for assertion.
pub struct TestSubscriber<T> {
    signals: Mutex<Vec<Signal<T>>>,
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    initial_request: u64,
    cancel_after: Option<usize>,
}

impl<T: Send + 'static> TestSubscriber<T> {
    pub fn new(initial_request: u64) -> Arc<Self> {
        Arc::new(TestSubscriber {
            signals: Mutex::new(Vec::new()),
            subscription: Mutex::new(None),
            initial_request,
            cancel_after: None,
        })
    }

    pub fn unbounded() -> Arc<Self> {
        TestSubscriber::new(UNBOUNDED)
    }

    pub fn cancelling_after(initial_request: u64, items: usize) -> Arc<Self> {
        Arc::new(TestSubscriber {
            signals: Mutex::new(Vec::new()),
            subscription: Mutex::new(None),
            initial_request,
            cancel_after: Some(items),
        })
    }

    pub fn request(&self, n: u64) {
        let subscription = self.subscription.lock().unwrap().clone();
        subscription
            .expect("no subscription received yet")
            .request(n);
    }

    pub fn cancel(&self) {
        let subscription = self.subscription.lock().unwrap().clone();
        subscription.expect("no subscription received yet").cancel();
    }

    pub fn signal_names(&self) -> Vec<&'static str> {
        self.signals.lock().unwrap().iter().map(Signal::name).collect()
    }

    pub fn item_count(&self) -> usize {
        self.signals
            .lock()
            .unwrap()
            .iter()
            .filter(|s| matches!(s, Signal::Item(_)))
            .count()
    }

    pub fn terminal_count(&self) -> usize {
        self.signals
            .lock()
            .unwrap()
            .iter()
            .filter(|s| matches!(s, Signal::Failed(_) | Signal::Completed))
            .count()
    }

    pub fn subscribe_count(&self) -> usize {
        self.signals
            .lock()
            .unwrap()
            .iter()
            .filter(|s| matches!(s, Signal::Subscribed))
            .count()
    }

    pub fn is_completed(&self) -> bool {
        self.signals
            .lock()
            .unwrap()
            .iter()
            .any(|s| matches!(s, Signal::Completed))
    }

    pub fn failure(&self) -> Option<StreamError> {
        self.signals.lock().unwrap().iter().find_map(|s| match s {
            Signal::Failed(failure) => Some(failure.clone()),
            _ => None,
        })
    }

    /// Blocks until a terminal signal lands, for tests that hop threads.
    pub fn await_terminal(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.terminal_count() == 0 {
            assert!(Instant::now() < deadline, "no terminal signal within 5s");
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

impl<T: Clone + Send + 'static> TestSubscriber<T> {
    pub fn items(&self) -> Vec<T> {
        self.signals
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Signal::Item(item) => Some(item.clone()),
                _ => None,
            })
            .collect()
    }
}

impl<T: Send + 'static> Subscriber<T> for TestSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.signals.lock().unwrap().push(Signal::Subscribed);
        *self.subscription.lock().unwrap() = Some(Arc::clone(&subscription));
        if self.initial_request > 0 {
            subscription.request(self.initial_request);
        }
    }

    fn on_next(&self, item: T) {
        let count = {
            let mut signals = self.signals.lock().unwrap();
            signals.push(Signal::Item(item));
            signals
                .iter()
                .filter(|s| matches!(s, Signal::Item(_)))
                .count()
        };
        if let Some(limit) = self.cancel_after {
            if count == limit {
                self.cancel();
            }
        }
    }

    fn on_failure(&self, failure: StreamError) {
        self.signals.lock().unwrap().push(Signal::Failed(failure));
    }

    fn on_complete(&self) {
        self.signals.lock().unwrap().push(Signal::Completed);
    }
}

struct TestPublisherState<T> {
    subscriber: Mutex<Option<Arc<dyn Subscriber<T>>>>,
    requested: AtomicU64,
    cancelled: AtomicBool,
}

struct TestPublisherSubscription<T>(Arc<TestPublisherState<T>>);

impl<T: Send + 'static> Subscription for TestPublisherSubscription<T> {
    fn request(&self, n: u64) {
        add_request(&self.0.requested, n);
    }

    fn cancel(&self) {
        self.0.cancelled.store(true, AtomicOrdering::Release);
    }
}

struct TestPublisherPublisher<T>(Arc<TestPublisherState<T>>);

impl<T: Send + 'static> Publisher<T> for TestPublisherPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        *self.0.subscriber.lock().unwrap() = Some(Arc::clone(&subscriber));
        subscriber.on_subscribe(Arc::new(TestPublisherSubscription(Arc::clone(&self.0))));
    }
}

/// Hand-driven publisher for a single subscription: the test decides when to
/// emit (demand respected or not), and can observe the cumulative demand and
/// cancellation its subscription received.
pub struct TestPublisher<T> {
    state: Arc<TestPublisherState<T>>,
}

impl<T> Clone for TestPublisher<T> {
    fn clone(&self) -> Self {
        TestPublisher {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Send + 'static> TestPublisher<T> {
    pub fn new() -> Self {
        TestPublisher {
            state: Arc::new(TestPublisherState {
                subscriber: Mutex::new(None),
                requested: AtomicU64::new(0),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    pub fn multi(&self) -> Multi<T> {
        Multi::from_publisher(Arc::new(TestPublisherPublisher(Arc::clone(&self.state))))
    }

    fn subscriber(&self) -> Arc<dyn Subscriber<T>> {
        self.state
            .subscriber
            .lock()
            .unwrap()
            .clone()
            .expect("nothing subscribed to the test publisher")
    }

    pub fn has_subscriber(&self) -> bool {
        self.state.subscriber.lock().unwrap().is_some()
    }

    pub fn emit(&self, item: T) {
        self.subscriber().on_next(item);
    }

    pub fn complete(&self) {
        self.subscriber().on_complete();
    }

    pub fn fail(&self, failure: StreamError) {
        self.subscriber().on_failure(failure);
    }

    /// Cumulative demand requested of this publisher.
    pub fn requested(&self) -> u64 {
        self.state.requested.load(AtomicOrdering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(AtomicOrdering::Acquire)
    }
}

/// Executor that parks tasks until the test runs them.
pub struct ManualExecutor {
    tasks: Mutex<VecDeque<Box<dyn FnOnce() + Send>>>,
}

impl ManualExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(ManualExecutor {
            tasks: Mutex::new(VecDeque::new()),
        })
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn run_all(&self) {
        loop {
            let task = self.tasks.lock().unwrap().pop_front();
            match task {
                Some(task) => task(),
                None => return,
            }
        }
    }
}

impl Executor for ManualExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) -> Result<(), TaskRejected> {
        self.tasks.lock().unwrap().push_back(task);
        Ok(())
    }
}

/// Executor that runs tasks inline on the submitting thread.
pub struct ImmediateExecutor;

impl Executor for ImmediateExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) -> Result<(), TaskRejected> {
        task();
        Ok(())
    }
}

/// Executor that refuses every task.
pub struct RejectingExecutor;

impl Executor for RejectingExecutor {
    fn execute(&self, _task: Box<dyn FnOnce() + Send>) -> Result<(), TaskRejected> {
        Err(TaskRejected)
    }
}

/// Executor that gives every task its own thread.
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) -> Result<(), TaskRejected> {
        std::thread::spawn(task);
        Ok(())
    }
}

/// Recording [`UniSubscriber`].
pub struct TestUniSubscriber<T> {
    outcomes: Mutex<Vec<UniOutcome<T>>>,
    cancellation: Mutex<Option<Arc<dyn UniSubscription>>>,
}

#[derive(Debug)]
pub enum UniOutcome<T> {
    Item(Option<T>),
    Failed(StreamError),
}

impl<T: Send + 'static> TestUniSubscriber<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(TestUniSubscriber {
            outcomes: Mutex::new(Vec::new()),
            cancellation: Mutex::new(None),
        })
    }

    pub fn cancel(&self) {
        let cancellation = self.cancellation.lock().unwrap().clone();
        cancellation.expect("not subscribed").cancel();
    }

    pub fn outcome_count(&self) -> usize {
        self.outcomes.lock().unwrap().len()
    }

    pub fn failure(&self) -> Option<StreamError> {
        self.outcomes.lock().unwrap().iter().find_map(|o| match o {
            UniOutcome::Failed(failure) => Some(failure.clone()),
            _ => None,
        })
    }
}

impl<T: Clone + Send + 'static> TestUniSubscriber<T> {
    pub fn item(&self) -> Option<Option<T>> {
        self.outcomes.lock().unwrap().iter().find_map(|o| match o {
            UniOutcome::Item(item) => Some(item.clone()),
            _ => None,
        })
    }
}

impl<T: Send + 'static> UniSubscriber<T> for TestUniSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn UniSubscription>) {
        *self.cancellation.lock().unwrap() = Some(subscription);
    }

    fn on_item(&self, item: Option<T>) {
        self.outcomes.lock().unwrap().push(UniOutcome::Item(item));
    }

    fn on_failure(&self, failure: StreamError) {
        self.outcomes
            .lock()
            .unwrap()
            .push(UniOutcome::Failed(failure));
    }
}
