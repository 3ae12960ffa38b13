//! Back-pressured stream composition.
//!
//! Two pipeline shapes: [`Multi`], a lazy stream of items terminated by
//! completion or failure, and [`Uni`], which resolves to exactly one of
//! {item (possibly empty), failure}. Producers and consumers are coupled
//! through an explicit demand protocol: [`Subscription::request`] authorizes
//! emission and [`Subscription::cancel`] tears the pipeline down. Stateful
//! operators serialize their work behind lock-free work-in-progress counters
//! rather than mutexes.
//!
//! ```
//! use crossbeam_queue::SegQueue;
//! use std::sync::Arc;
//!
//! use riffle::{Multi, StreamError, Subscriber, Subscription, UNBOUNDED};
//!
//! struct Collector(Arc<SegQueue<u64>>);
//!
//! impl Subscriber<u64> for Collector {
//!     fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
//!         subscription.request(UNBOUNDED);
//!     }
//!     fn on_next(&self, item: u64) {
//!         self.0.push(item);
//!     }
//!     fn on_failure(&self, _failure: StreamError) {}
//!     fn on_complete(&self) {}
//! }
//!
//! let collected = Arc::new(SegQueue::new());
//! Multi::from_iter([1u64, 2, 3])
//!     .map(|x| Some(x * 2))
//!     .subscribe_with(Arc::new(Collector(Arc::clone(&collected))));
//!
//! assert_eq!(
//!     {
//!         let mut v = vec![];
//!         while let Some(x) = collected.pop() {
//!             v.push(x);
//!         }
//!         v
//!     },
//!     [2, 4, 6]
//! );
//! ```

pub use crate::emit_on::Executor;
pub use crate::error::{StreamError, TaskRejected};
pub use crate::flat_map::FlatMapConfig;
pub use crate::multi::Multi;
pub use crate::queue::{bounded_queue, unbounded_queue, ItemQueue, QueueSupplier};
pub use crate::serialized::SerializedSubscriber;
pub use crate::signal::SignalHooks;
pub use crate::subscription::{
    add_request, consumed, Publisher, Subscriber, Subscription, UNBOUNDED,
};
pub use crate::uni::{Uni, UniSubscriber, UniSubscription};

mod concat;
mod emit_on;
mod error;
mod filter;
mod flat_map;
mod ignore;
mod map;
mod multi;
mod on_failure;
mod overflow;
mod processor;
mod queue;
mod serialized;
mod signal;
mod skip;
mod sources;
mod subscription;
mod switch;
mod take;
mod take_last;
mod take_while;
mod uni;
