use super::Disposable;

use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Default)]
struct RegistryState {
  entries: Vec<Arc<dyn Disposable>>,
  closed: bool,
}

/// The set of resources a fiber (or command queue) releases when it stops.
///
/// Entries are compared by address so the same resource may be registered
/// twice and removed one occurrence at a time. Once [`dispose_all`] has run
/// the registry is closed: later additions are disposed immediately instead
/// of being kept.
///
/// [`dispose_all`]: Self::dispose_all
#[derive(Default)]
pub(crate) struct DisposableRegistry {
  state: Mutex<RegistryState>,
}

impl DisposableRegistry {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Keeps `resource` until the registry is disposed. Returns `false`, after
  /// disposing `resource`, if the registry is already closed.
  pub(crate) fn add(&self, resource: Arc<dyn Disposable>) -> bool {
    {
      let mut state = self.state.lock();
      if !state.closed {
        state.entries.push(resource);
        return true;
      }
    }
    resource.dispose();
    false
  }

  /// Removes the first entry pointing at `resource`.
  pub(crate) fn remove(&self, resource: &dyn Disposable) -> bool {
    let target = resource as *const dyn Disposable;
    let mut state = self.state.lock();
    match state
      .entries
      .iter()
      .position(|entry| std::ptr::addr_eq(Arc::as_ptr(entry), target))
    {
      Some(index) => {
        state.entries.remove(index);
        true
      }
      None => false,
    }
  }

  /// Closes the registry and disposes every entry in registration order.
  /// Entries are disposed after the lock is released, so one may call back
  /// into `remove` while being disposed.
  pub(crate) fn dispose_all(&self) {
    let entries = {
      let mut state = self.state.lock();
      state.closed = true;
      std::mem::take(&mut state.entries)
    };
    for resource in entries {
      resource.dispose();
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.state.lock().entries.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct Counter(AtomicUsize);

  impl Disposable for Counter {
    fn dispose(&self) {
      self.0.fetch_add(1, Ordering::SeqCst);
    }
  }

  #[test]
  fn remove_takes_one_occurrence() {
    let registry = DisposableRegistry::new();
    let counter = Arc::new(Counter(AtomicUsize::new(0)));
    registry.add(counter.clone());
    registry.add(counter.clone());
    assert_eq!(registry.len(), 2);

    assert!(registry.remove(counter.as_ref()));
    assert_eq!(registry.len(), 1);

    registry.dispose_all();
    assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    assert_eq!(registry.len(), 0);
    assert!(!registry.remove(counter.as_ref()));
  }

  #[test]
  fn additions_after_dispose_are_released_at_once() {
    let registry = DisposableRegistry::new();
    let counter = Arc::new(Counter(AtomicUsize::new(0)));
    registry.dispose_all();

    assert!(!registry.add(counter.clone()));
    assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    assert_eq!(registry.len(), 0);

    // A second dispose finds nothing left to release.
    registry.dispose_all();
    assert_eq!(counter.0.load(Ordering::SeqCst), 1);
  }
}
