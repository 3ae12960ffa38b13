use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use crate::{error::StreamError, subscription::Subscriber, subscription::Subscription};

enum Pending<T> {
    Item(T),
    Failure(StreamError),
    Complete,
}

struct Serializer<T> {
    emitting: bool,
    done: bool,
    pending: VecDeque<Pending<T>>,
}

/// Serializes the signals of a source that may call `on_next`,
/// `on_failure` and `on_complete` concurrently. At most one thread delivers
/// to the wrapped subscriber at a time; signals arriving while another thread
/// is emitting are queued and replayed in arrival order. A terminal signal
/// wins: everything after it is dropped.
pub struct SerializedSubscriber<T> {
    downstream: Arc<dyn Subscriber<T>>,
    state: Mutex<Serializer<T>>,
}

impl<T: Send + 'static> SerializedSubscriber<T> {
    pub fn new(downstream: Arc<dyn Subscriber<T>>) -> Self {
        SerializedSubscriber {
            downstream,
            state: Mutex::new(Serializer {
                emitting: false,
                done: false,
                pending: VecDeque::new(),
            }),
        }
    }

    /// Delivers queued signals until the queue drains, then releases the
    /// emitter lock. Runs on whichever thread won the emitter flag.
    fn drain_pending(&self) {
        loop {
            let signal = {
                let mut state = self.state.lock().unwrap();
                match state.pending.pop_front() {
                    Some(signal) => {
                        if state.done {
                            state.pending.clear();
                            state.emitting = false;
                            return;
                        }
                        if matches!(signal, Pending::Failure(_) | Pending::Complete) {
                            state.done = true;
                        }
                        signal
                    },
                    None => {
                        state.emitting = false;
                        return;
                    },
                }
            };
            match signal {
                Pending::Item(item) => self.downstream.on_next(item),
                Pending::Failure(failure) => self.downstream.on_failure(failure),
                Pending::Complete => self.downstream.on_complete(),
            }
        }
    }

    fn enqueue_or_emit(&self, signal: Pending<T>) {
        {
            let mut state = self.state.lock().unwrap();
            if state.done {
                return;
            }
            if state.emitting {
                state.pending.push_back(signal);
                return;
            }
            state.emitting = true;
            if matches!(signal, Pending::Failure(_) | Pending::Complete) {
                state.done = true;
            }
        }
        match signal {
            Pending::Item(item) => self.downstream.on_next(item),
            Pending::Failure(failure) => self.downstream.on_failure(failure),
            Pending::Complete => self.downstream.on_complete(),
        }
        self.drain_pending();
    }
}

impl<T: Send + 'static> Subscriber<T> for SerializedSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.downstream.on_subscribe(subscription);
    }

    fn on_next(&self, item: T) {
        self.enqueue_or_emit(Pending::Item(item));
    }

    fn on_failure(&self, failure: StreamError) {
        self.enqueue_or_emit(Pending::Failure(failure));
    }

    fn on_complete(&self) {
        self.enqueue_or_emit(Pending::Complete);
    }
}
