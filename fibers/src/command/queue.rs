// fibers/src/command/queue.rs

use super::registry::DisposableRegistry;
use super::runner::CommandRunner;
use super::{Command, Disposable};

use std::fmt;
use std::mem;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// The state guarded by the queue lock.
struct QueueState {
  commands: Vec<Command>,
  running: bool,
}

/// A thread-safe FIFO of pending commands with a blocking "drain all or wait"
/// operation. This is the engine of a dedicated-thread fiber.
///
/// Stopping is immediate: once [`stop`](Self::stop) has been called, draining
/// yields no more work even if commands are still buffered. Those commands are
/// discarded, never executed.
pub struct CommandQueue {
  state: Mutex<QueueState>,
  available: Condvar,
  on_stop: DisposableRegistry,
  runner: CommandRunner,
}

impl fmt::Debug for CommandQueue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("CommandQueue")
      .field("origin", &self.runner.origin())
      .field("pending", &state.commands.len())
      .field("running", &state.running)
      .field("stop_hooks", &self.on_stop.len())
      .finish()
  }
}

impl CommandQueue {
  /// Creates a running, empty queue whose commands are run by `runner`.
  pub fn new(runner: CommandRunner) -> Self {
    Self {
      state: Mutex::new(QueueState {
        commands: Vec::new(),
        running: true,
      }),
      available: Condvar::new(),
      on_stop: DisposableRegistry::new(),
      runner,
    }
  }

  /// Appends a command and wakes one waiting drainer.
  ///
  /// Always succeeds, even after [`stop`](Self::stop); such a command simply
  /// never runs.
  pub fn enqueue(&self, command: Command) {
    let mut state = self.state.lock();
    state.commands.push(command);
    self.available.notify_one();
  }

  /// Removes and returns every queued command, blocking while the queue is
  /// empty and still running.
  ///
  /// Returns `None` once the queue has been stopped.
  pub fn drain_all(&self) -> Option<Vec<Command>> {
    let mut state = self.state.lock();
    while state.commands.is_empty() && state.running {
      self.available.wait(&mut state);
    }
    if !state.running {
      return None;
    }
    Some(mem::take(&mut state.commands))
  }

  /// Drains one batch and runs it. Returns `false` when the queue is stopped.
  pub fn execute_next_batch(&self) -> bool {
    match self.drain_all() {
      Some(batch) => {
        self.runner.run_all(batch);
        true
      }
      None => false,
    }
  }

  /// Runs batches until the queue is stopped.
  pub fn run(&self) {
    while self.execute_next_batch() {}
  }

  /// Runs every stop hook once, in registration order, then marks the queue
  /// stopped and wakes all waiters.
  ///
  /// Hooks must not enqueue onto or stop this same queue.
  pub fn stop(&self) {
    self.on_stop.dispose_all();
    let mut state = self.state.lock();
    state.running = false;
    self.available.notify_all();
  }

  /// Registers a resource to dispose when the queue stops. A queue that is
  /// already stopping or stopped disposes it right away.
  pub fn add_on_stop(&self, hook: Arc<dyn Disposable>) {
    self.on_stop.add(hook);
  }

  /// Unregisters one occurrence of `hook`. Returns whether it was present.
  pub fn remove_on_stop(&self, hook: &dyn Disposable) -> bool {
    self.on_stop.remove(hook)
  }

  /// Returns `true` until [`stop`](Self::stop) is called.
  pub fn is_running(&self) -> bool {
    self.state.lock().running
  }

  /// Number of commands waiting to be drained.
  pub fn len(&self) -> usize {
    self.state.lock().commands.len()
  }

  /// Returns `true` if no command is waiting.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::thread;
  use std::time::Duration;

  fn queue() -> Arc<CommandQueue> {
    Arc::new(CommandQueue::new(CommandRunner::new("test-queue")))
  }

  #[test]
  fn drain_returns_commands_in_insertion_order() {
    let q = queue();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for i in 0..5 {
      let seen = seen.clone();
      q.enqueue(Box::new(move || seen.lock().push(i)));
    }
    assert_eq!(q.len(), 5);
    assert!(q.execute_next_batch());
    assert!(q.is_empty());
    assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
  }

  #[test]
  fn stop_discards_pending_commands() {
    let q = queue();
    let count = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
      let count = count.clone();
      q.enqueue(Box::new(move || {
        count.fetch_add(1, Ordering::SeqCst);
      }));
    }
    q.stop();

    // The loop terminates at once and none of the buffered commands run.
    q.run();
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert!(q.drain_all().is_none());

    // Enqueue after stop is accepted but never executed.
    q.enqueue(Box::new(|| unreachable!()));
    assert!(!q.execute_next_batch());
  }

  #[test]
  fn stop_wakes_blocked_drain() {
    let q = queue();
    let drainer = {
      let q = q.clone();
      thread::spawn(move || q.drain_all().is_none())
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!drainer.is_finished(), "drain should block on an empty queue");
    q.stop();
    assert!(drainer.join().unwrap());
  }

  #[test]
  fn stop_hooks_run_once_in_order() {
    struct Hook {
      id: usize,
      log: Arc<Mutex<Vec<usize>>>,
    }
    impl Disposable for Hook {
      fn dispose(&self) {
        self.log.lock().push(self.id);
      }
    }

    let q = queue();
    let log = Arc::new(Mutex::new(Vec::new()));
    let first: Arc<dyn Disposable> = Arc::new(Hook { id: 1, log: log.clone() });
    let second: Arc<dyn Disposable> = Arc::new(Hook { id: 2, log: log.clone() });
    let removed: Arc<dyn Disposable> = Arc::new(Hook { id: 3, log: log.clone() });
    q.add_on_stop(first);
    q.add_on_stop(second);
    q.add_on_stop(removed.clone());

    assert!(q.remove_on_stop(removed.as_ref()));
    assert!(!q.remove_on_stop(removed.as_ref()));

    q.stop();
    q.stop();
    assert_eq!(*log.lock(), vec![1, 2]);
    assert!(!q.is_running());

    // A hook registered after stop is released immediately.
    q.add_on_stop(Arc::new(Hook { id: 4, log: log.clone() }));
    assert_eq!(*log.lock(), vec![1, 2, 4]);
    assert!(!q.remove_on_stop(removed.as_ref()));
  }

  #[test]
  fn panicking_command_does_not_stop_the_loop() {
    let q = queue();
    let count = Arc::new(AtomicUsize::new(0));
    q.enqueue(Box::new(|| panic!("callback failure")));
    {
      let count = count.clone();
      q.enqueue(Box::new(move || {
        count.fetch_add(1, Ordering::SeqCst);
      }));
    }
    assert!(q.execute_next_batch());
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(q.is_running());
  }
}
