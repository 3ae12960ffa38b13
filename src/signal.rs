use std::sync::{
    atomic::{AtomicBool, Ordering as AtomicOrdering},
    Arc,
};

use crate::{
    error::StreamError,
    multi::Multi,
    subscription::{fail_subscriber, Publisher, SlotTermination, Subscriber, Subscription, SubscriptionSlot},
};

type SubscribeHook = Box<dyn Fn(&Arc<dyn Subscription>) -> Result<(), StreamError> + Send + Sync>;
type ItemHook<T> = Box<dyn Fn(&T) -> Result<(), StreamError> + Send + Sync>;
type FailureHook = Box<dyn Fn(&StreamError) -> Result<(), StreamError> + Send + Sync>;
type CompletionHook = Box<dyn Fn() -> Result<(), StreamError> + Send + Sync>;
type TerminationHook =
    Box<dyn Fn(Option<&StreamError>, bool) -> Result<(), StreamError> + Send + Sync>;
type CancellationHook = Box<dyn Fn() -> Result<(), StreamError> + Send + Sync>;
type RequestHook = Box<dyn Fn(u64) -> Result<(), StreamError> + Send + Sync>;

/// Optional hooks invoked ahead of the corresponding signal. Every hook is
/// fallible; what an `Err` does depends on the signal it shadows:
/// an item hook error cancels upstream and fails the stream, a failure hook
/// error is composed with the original failure, and a completion or
/// termination hook error turns the completion into a failure.
pub struct SignalHooks<T> {
    on_subscribe: Option<SubscribeHook>,
    on_item: Option<ItemHook<T>>,
    on_failure: Option<FailureHook>,
    on_completion: Option<CompletionHook>,
    on_termination: Option<TerminationHook>,
    on_cancellation: Option<CancellationHook>,
    on_request: Option<RequestHook>,
}

impl<T> Default for SignalHooks<T> {
    fn default() -> Self {
        SignalHooks {
            on_subscribe: None,
            on_item: None,
            on_failure: None,
            on_completion: None,
            on_termination: None,
            on_cancellation: None,
            on_request: None,
        }
    }
}

impl<T> SignalHooks<T> {
    pub fn new() -> Self {
        SignalHooks::default()
    }

    pub fn subscribe_hook(
        mut self,
        hook: impl Fn(&Arc<dyn Subscription>) -> Result<(), StreamError> + Send + Sync + 'static,
    ) -> Self {
        self.on_subscribe = Some(Box::new(hook));
        self
    }

    pub fn item_hook(
        mut self,
        hook: impl Fn(&T) -> Result<(), StreamError> + Send + Sync + 'static,
    ) -> Self {
        self.on_item = Some(Box::new(hook));
        self
    }

    pub fn failure_hook(
        mut self,
        hook: impl Fn(&StreamError) -> Result<(), StreamError> + Send + Sync + 'static,
    ) -> Self {
        self.on_failure = Some(Box::new(hook));
        self
    }

    pub fn completion_hook(
        mut self,
        hook: impl Fn() -> Result<(), StreamError> + Send + Sync + 'static,
    ) -> Self {
        self.on_completion = Some(Box::new(hook));
        self
    }

    /// Fires exactly once per subscription with the terminal failure (if
    /// any) and whether termination came from cancellation.
    pub fn termination_hook(
        mut self,
        hook: impl Fn(Option<&StreamError>, bool) -> Result<(), StreamError> + Send + Sync + 'static,
    ) -> Self {
        self.on_termination = Some(Box::new(hook));
        self
    }

    pub fn cancellation_hook(
        mut self,
        hook: impl Fn() -> Result<(), StreamError> + Send + Sync + 'static,
    ) -> Self {
        self.on_cancellation = Some(Box::new(hook));
        self
    }

    pub fn request_hook(
        mut self,
        hook: impl Fn(u64) -> Result<(), StreamError> + Send + Sync + 'static,
    ) -> Self {
        self.on_request = Some(Box::new(hook));
        self
    }
}

pub(crate) struct SignalOp<T> {
    upstream: Multi<T>,
    hooks: Arc<SignalHooks<T>>,
}

impl<T> SignalOp<T> {
    pub(crate) fn new(upstream: Multi<T>, hooks: SignalHooks<T>) -> Self {
        SignalOp {
            upstream,
            hooks: Arc::new(hooks),
        }
    }
}

impl<T: Send + 'static> Publisher<T> for SignalOp<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let state = Arc::new(SignalState {
            downstream: subscriber,
            upstream: SubscriptionSlot::new(),
            hooks: Arc::clone(&self.hooks),
            termination_fired: AtomicBool::new(false),
            cancel_started: AtomicBool::new(false),
        });
        self.upstream
            .subscribe_with(Arc::new(SignalSubscriber(state)));
    }
}

struct SignalState<T> {
    downstream: Arc<dyn Subscriber<T>>,
    upstream: SubscriptionSlot,
    hooks: Arc<SignalHooks<T>>,
    termination_fired: AtomicBool,
    cancel_started: AtomicBool,
}

impl<T: Send + 'static> SignalState<T> {
    /// Fires the termination hook at most once. Errors from the hook are
    /// surfaced only where the caller can still fail the stream.
    fn fire_termination(
        &self,
        failure: Option<&StreamError>,
        cancelled: bool,
    ) -> Result<(), StreamError> {
        if self.termination_fired.swap(true, AtomicOrdering::AcqRel) {
            return Ok(());
        }
        match &self.hooks.on_termination {
            Some(hook) => hook(failure, cancelled),
            None => Ok(()),
        }
    }

    fn fail_and_cancel(&self, failure: StreamError) {
        if let Some(current) = self.upstream.get() {
            current.cancel();
        }
        self.deliver_failure(failure);
    }

    /// The upstream-failure path: failure hook first, composing a hook error
    /// with the original, then downstream delivery, then termination.
    fn deliver_failure(&self, failure: StreamError) {
        match self.upstream.terminate() {
            SlotTermination::AlreadyCancelled => {},
            _ => {
                let failure = match &self.hooks.on_failure {
                    Some(hook) => match hook(&failure) {
                        Ok(()) => failure,
                        Err(hook_failure) => failure.compose(hook_failure),
                    },
                    None => failure,
                };
                self.downstream.on_failure(failure.clone());
                // Hook errors here are unactionable: the terminal is out.
                let _ = self.fire_termination(Some(&failure), false);
            },
        }
    }
}

impl<T: Send + 'static> Subscription for SignalState<T> {
    fn request(&self, n: u64) {
        if let Some(hook) = &self.hooks.on_request {
            if let Err(failure) = hook(n) {
                self.fail_and_cancel(failure);
                return;
            }
        }
        if let Some(upstream) = self.upstream.get() {
            upstream.request(n);
        }
    }

    fn cancel(&self) {
        if self.cancel_started.swap(true, AtomicOrdering::AcqRel) {
            return;
        }
        if let Some(hook) = &self.hooks.on_cancellation {
            if let Err(failure) = hook() {
                self.fail_and_cancel(failure);
                return;
            }
        }
        if self.fire_termination(None, true).is_err() {
            // The terminal story is already over; nothing left to fail.
            return;
        }
        self.upstream.cancel();
    }
}

struct SignalSubscriber<T>(Arc<SignalState<T>>);

impl<T: Send + 'static> Subscriber<T> for SignalSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let state = &self.0;
        if state.upstream.set(Arc::clone(&subscription)) {
            if let Some(hook) = &state.hooks.on_subscribe {
                if let Err(failure) = hook(&subscription) {
                    fail_subscriber(&state.downstream, failure);
                    state.upstream.cancel();
                    return;
                }
            }
            state
                .downstream
                .on_subscribe(Arc::clone(state) as Arc<dyn Subscription>);
        } else {
            subscription.cancel();
        }
    }

    fn on_next(&self, item: T) {
        let state = &self.0;
        if state.upstream.is_cancelled() {
            return;
        }
        if let Some(hook) = &state.hooks.on_item {
            if let Err(failure) = hook(&item) {
                state.fail_and_cancel(failure);
                return;
            }
        }
        state.downstream.on_next(item);
    }

    fn on_failure(&self, failure: StreamError) {
        self.0.deliver_failure(failure);
    }

    fn on_complete(&self) {
        let state = &self.0;
        match state.upstream.terminate() {
            SlotTermination::AlreadyCancelled => {},
            _ => {
                if let Some(hook) = &state.hooks.on_completion {
                    if let Err(failure) = hook() {
                        state.downstream.on_failure(failure);
                        return;
                    }
                }
                if let Err(failure) = state.fire_termination(None, false) {
                    state.downstream.on_failure(failure);
                    return;
                }
                state.downstream.on_complete();
            },
        }
    }
}
