use std::sync::Arc;

use crossbeam_queue::{ArrayQueue, SegQueue};

/// Non-blocking queue shared between the producer side of an operator
/// (`on_next`) and its drain. One producer and one consumer at a time is
/// guaranteed by the subscription contract plus the WIP discipline; the
/// crossbeam queues tolerate more.
pub trait ItemQueue<T>: Send + Sync {
    /// Enqueues `item`, handing it back when the queue is full.
    fn offer(&self, item: T) -> Result<(), T>;

    /// Dequeues the oldest item, `None` when empty.
    fn poll(&self) -> Option<T>;

    fn is_empty(&self) -> bool;

    /// Drops every queued item.
    fn clear(&self);
}

impl<T: Send> ItemQueue<T> for ArrayQueue<T> {
    fn offer(&self, item: T) -> Result<(), T> {
        self.push(item)
    }

    fn poll(&self) -> Option<T> {
        self.pop()
    }

    fn is_empty(&self) -> bool {
        ArrayQueue::is_empty(self)
    }

    fn clear(&self) {
        while self.pop().is_some() {}
    }
}

impl<T: Send> ItemQueue<T> for SegQueue<T> {
    fn offer(&self, item: T) -> Result<(), T> {
        self.push(item);
        Ok(())
    }

    fn poll(&self) -> Option<T> {
        self.pop()
    }

    fn is_empty(&self) -> bool {
        SegQueue::is_empty(self)
    }

    fn clear(&self) {
        while self.pop().is_some() {}
    }
}

/// Factory handed to operators that create their queues lazily.
pub type QueueSupplier<T> = Arc<dyn Fn() -> Box<dyn ItemQueue<T>> + Send + Sync>;

/// Supplier of fixed-capacity queues; `offer` fails once `capacity` items
/// are buffered, which the operators surface as a back-pressure failure.
pub fn bounded_queue<T: Send + 'static>(capacity: usize) -> QueueSupplier<T> {
    Arc::new(move || Box::new(ArrayQueue::new(capacity)))
}

/// Supplier of unbounded queues; `offer` never fails.
pub fn unbounded_queue<T: Send + 'static>() -> QueueSupplier<T> {
    Arc::new(|| Box::new(SegQueue::new()))
}
