//! Typed publish/subscribe channels.
//!
//! A [`Channel`] fans each published message out to its subscribers. Every
//! subscriber is a policy object implementing [`Subscriber`]: it is handed
//! the message on the publishing thread and decides what to buffer and when
//! to move work onto its fiber.
//!
//! ## Behavior
//!
//! - **Per-pair FIFO**: messages from one producer thread reach one
//!   subscriber fiber in publish order.
//! - **Non-blocking publish**: fiber-bound delivery only enqueues. Producer
//!   thread subscriptions run inline and do block the publisher.
//! - **Snapshot isolation**: subscribing, unsubscribing or clearing while a
//!   publish is in flight never corrupts it.
//! - **`Clone` requirement**: a message may be delivered to many
//!   subscribers, so `T` must implement `Clone`.

mod batch;
mod keyed;
mod last;
mod recycling;
mod subscriber_list;
mod subscription;

use crate::command::Disposable;
use crate::fiber::Fiber;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

pub use batch::BatchSubscriber;
pub use keyed::KeyedBatchSubscriber;
pub use last::LastSubscriber;
pub use recycling::{MessageReader, RecyclingBatchSubscriber};
pub use subscriber_list::{Receiver, SubscriberId, SubscriberList};
pub use subscription::{ChannelSubscription, Filter};

/// A delivery policy attached to a channel.
pub trait Subscriber<T>: Send + Sync {
  /// The fiber the subscriber delivers on. Disposing it removes the
  /// subscription from the channel.
  fn fiber(&self) -> &Arc<dyn Fiber>;

  /// Called on the publishing thread for every message.
  fn on_message(&self, message: &T);
}

/// A typed publish/subscribe endpoint.
///
/// Cloning a channel yields another handle to the same subscriber list.
pub struct Channel<T> {
  subscribers: Arc<SubscriberList<T>>,
}

impl<T> Clone for Channel<T> {
  fn clone(&self) -> Self {
    Self {
      subscribers: self.subscribers.clone(),
    }
  }
}

impl<T> fmt::Debug for Channel<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Channel")
      .field("subscribers", &self.subscribers.len())
      .finish()
  }
}

impl<T> Default for Channel<T> {
  fn default() -> Self {
    Self {
      subscribers: Arc::new(SubscriberList::new()),
    }
  }
}

impl<T> Channel<T>
where
  T: Clone + Send + 'static,
{
  /// Creates a channel with no subscribers.
  pub fn new() -> Self {
    Self::default()
  }

  /// Delivers every message to `callback` on `fiber`.
  pub fn subscribe<C>(&self, fiber: Arc<dyn Fiber>, callback: C) -> Unsubscriber
  where
    C: Fn(T) + Send + Sync + 'static,
  {
    self.subscribe_with(ChannelSubscription::new(fiber, callback))
  }

  /// Delivers messages passing `filter` to `callback` on `fiber`. The filter
  /// runs on the publishing thread.
  pub fn subscribe_filtered<C, P>(&self, fiber: Arc<dyn Fiber>, callback: C, filter: P) -> Unsubscriber
  where
    C: Fn(T) + Send + Sync + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
  {
    self.subscribe_with(ChannelSubscription::new(fiber, callback).with_filter(filter))
  }

  /// Attaches any subscriber policy.
  pub fn subscribe_with<S>(&self, subscriber: S) -> Unsubscriber
  where
    S: Subscriber<T> + 'static,
  {
    let subscriber = Arc::new(subscriber);
    let fiber = subscriber.fiber().clone();
    self.attach(fiber, Arc::new(move |message: &T| subscriber.on_message(message)))
  }

  /// Runs `subscription`'s callback synchronously on the publishing thread,
  /// still subject to its filter. Its fiber only scopes the subscription:
  /// disposing the fiber unsubscribes.
  ///
  /// A panicking callback is caught and logged with `tracing::error!`;
  /// `publish` still reaches every other subscriber.
  pub fn subscribe_on_producer_thread(&self, subscription: ChannelSubscription<T>) -> Unsubscriber {
    let subscription = Arc::new(subscription);
    let fiber = subscription.fiber().clone();
    self.attach(
      fiber,
      Arc::new(move |message: &T| subscription.deliver_inline(message)),
    )
  }

  /// Hands `message` to every current subscriber.
  pub fn publish(&self, message: T) {
    self.subscribers.publish(&message);
  }

  /// Removes every subscriber. Deliveries already queued on fibers still run.
  pub fn clear_subscribers(&self) {
    self.subscribers.clear();
  }

  /// Number of active subscriptions.
  pub fn subscriber_count(&self) -> usize {
    self.subscribers.len()
  }

  fn attach(&self, fiber: Arc<dyn Fiber>, receiver: Receiver<T>) -> Unsubscriber {
    let id = self.subscribers.add(receiver);
    let registration = Arc::new(Registration {
      list: Arc::downgrade(&self.subscribers),
      id,
      fiber: Arc::downgrade(&fiber),
      disposed: AtomicBool::new(false),
    });
    fiber.register(registration.clone());
    Unsubscriber { registration }
  }
}

/// The fiber-side half of a subscription. Holds only weak references so a
/// fiber and a channel never keep each other alive.
struct Registration<T> {
  list: Weak<SubscriberList<T>>,
  id: SubscriberId,
  fiber: Weak<dyn Fiber>,
  disposed: AtomicBool,
}

impl<T: Send + 'static> Disposable for Registration<T> {
  fn dispose(&self) {
    if self.disposed.swap(true, Ordering::AcqRel) {
      return;
    }
    if let Some(list) = self.list.upgrade() {
      list.remove(self.id);
    }
    if let Some(fiber) = self.fiber.upgrade() {
      fiber.unregister(self);
    }
  }
}

/// Handle returned by every `subscribe*` call.
///
/// Disposing it removes exactly the one subscription it was returned for and
/// is idempotent. Dropping the handle does **not** unsubscribe.
pub struct Unsubscriber {
  registration: Arc<dyn Disposable>,
}

impl fmt::Debug for Unsubscriber {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Unsubscriber").finish_non_exhaustive()
  }
}

impl Disposable for Unsubscriber {
  fn dispose(&self) {
    self.registration.dispose();
  }
}
