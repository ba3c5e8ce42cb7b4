// fibers/src/channel/subscriber_list.rs

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// A receiver invoked on the publishing thread.
pub type Receiver<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

/// Identifies one registration in a [`SubscriberList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct Entry<T> {
  id: SubscriberId,
  receiver: Receiver<T>,
}

impl<T> Clone for Entry<T> {
  fn clone(&self) -> Self {
    Self {
      id: self.id,
      receiver: self.receiver.clone(),
    }
  }
}

struct ListState<T> {
  entries: Arc<Vec<Entry<T>>>,
  next_id: u64,
}

/// A copy-on-write list of receivers.
///
/// Writers copy the live vector, modify the copy and swap it in under a
/// short lock. Publishers take the lock only long enough to clone the `Arc`
/// of the live vector, then iterate that immutable snapshot with no lock
/// held, so receivers may add or remove subscriptions (including their own)
/// while a publish is in flight.
///
/// The same receiver may be added more than once; each addition is an
/// independent entry with its own [`SubscriberId`].
pub struct SubscriberList<T> {
  state: Mutex<ListState<T>>,
}

impl<T> fmt::Debug for SubscriberList<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SubscriberList")
      .field("len", &self.len())
      .finish()
  }
}

impl<T> Default for SubscriberList<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> SubscriberList<T> {
  /// Creates an empty list.
  pub fn new() -> Self {
    Self {
      state: Mutex::new(ListState {
        entries: Arc::new(Vec::new()),
        next_id: 0,
      }),
    }
  }

  /// Appends a receiver and returns the id of the new entry.
  pub fn add(&self, receiver: Receiver<T>) -> SubscriberId {
    let mut state = self.state.lock();
    let id = SubscriberId(state.next_id);
    state.next_id += 1;
    let mut entries = Vec::with_capacity(state.entries.len() + 1);
    entries.extend(state.entries.iter().cloned());
    entries.push(Entry { id, receiver });
    state.entries = Arc::new(entries);
    id
  }

  /// Removes the entry with `id`. Returns whether it was present.
  pub fn remove(&self, id: SubscriberId) -> bool {
    let mut state = self.state.lock();
    let Some(index) = state.entries.iter().position(|entry| entry.id == id) else {
      return false;
    };
    let mut entries: Vec<Entry<T>> = state.entries.iter().cloned().collect();
    entries.remove(index);
    state.entries = Arc::new(entries);
    true
  }

  /// Removes every entry at once. Publishes already iterating a snapshot
  /// finish against that snapshot.
  pub fn clear(&self) {
    let old = {
      let mut state = self.state.lock();
      std::mem::replace(&mut state.entries, Arc::new(Vec::new()))
    };
    // Receivers may own resources whose drop takes other locks.
    drop(old);
  }

  /// Invokes every receiver of the current snapshot with `message`.
  pub fn publish(&self, message: &T) {
    let snapshot = self.snapshot();
    for entry in snapshot.iter() {
      (entry.receiver)(message);
    }
  }

  /// Number of entries.
  pub fn len(&self) -> usize {
    self.state.lock().entries.len()
  }

  /// Returns `true` if there are no entries.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn snapshot(&self) -> Arc<Vec<Entry<T>>> {
    self.state.lock().entries.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn recorder() -> (Receiver<String>, Arc<Mutex<Vec<String>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let receiver: Receiver<String> = Arc::new(move |message: &String| sink.lock().push(message.clone()));
    (receiver, received)
  }

  #[test]
  fn add_and_remove() {
    let list = SubscriberList::new();
    let (cb, received) = recorder();

    let id = list.add(cb);
    assert_eq!(list.len(), 1);
    list.publish(&"hello".to_string());
    assert_eq!(received.lock().len(), 1);

    assert!(list.remove(id));
    assert!(list.is_empty());
    list.publish(&"bye".to_string());
    assert_eq!(received.lock().len(), 1);
    assert!(!list.remove(id));
  }

  #[test]
  fn duplicate_registrations_are_independent() {
    let list = SubscriberList::new();
    let (cb, received) = recorder();

    let first = list.add(cb.clone());
    let _second = list.add(cb);
    assert_eq!(list.len(), 2);
    list.publish(&"hello".to_string());
    assert_eq!(received.lock().len(), 2);

    assert!(list.remove(first));
    assert_eq!(list.len(), 1);
    list.publish(&"bye".to_string());
    assert_eq!(received.lock().len(), 3);
  }

  #[test]
  fn receiver_may_mutate_list_during_publish() {
    let list: Arc<SubscriberList<u32>> = Arc::new(SubscriberList::new());
    let count = Arc::new(Mutex::new(0));

    let inner_list = Arc::downgrade(&list);
    let inner_count = count.clone();
    list.add(Arc::new(move |_: &u32| {
      *inner_count.lock() += 1;
      if let Some(list) = inner_list.upgrade() {
        list.clear();
      }
    }));
    let tail_count = count.clone();
    list.add(Arc::new(move |_: &u32| *tail_count.lock() += 1));

    // Both receivers of the snapshot run even though the first clears the list.
    list.publish(&1);
    assert_eq!(*count.lock(), 2);
    list.publish(&2);
    assert_eq!(*count.lock(), 2);
  }
}
