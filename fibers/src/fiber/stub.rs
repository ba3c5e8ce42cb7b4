use super::Fiber;
use crate::command::{Command, Disposable, DisposableRegistry, RepeatingCommand};
use crate::error::Result;
use crate::scheduler::TimerHandle;

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// A fiber that never runs anything on its own.
///
/// Executed commands go to a pending list and scheduled commands (whatever
/// their delay) to a scheduled list; the test decides when each list runs.
/// This makes batch windows and flushes fully deterministic.
pub struct StubFiber {
  pending: Mutex<Vec<Command>>,
  scheduled: Mutex<Vec<(TimerHandle, Command)>>,
  registry: DisposableRegistry,
  disposed: AtomicBool,
}

impl fmt::Debug for StubFiber {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StubFiber")
      .field("pending", &self.pending_count())
      .field("scheduled", &self.scheduled_count())
      .field("registered", &self.registered())
      .field("disposed", &self.is_disposed())
      .finish()
  }
}

impl Default for StubFiber {
  fn default() -> Self {
    Self::new()
  }
}

impl StubFiber {
  pub fn new() -> Self {
    Self {
      pending: Mutex::new(Vec::new()),
      scheduled: Mutex::new(Vec::new()),
      registry: DisposableRegistry::new(),
      disposed: AtomicBool::new(false),
    }
  }

  /// Number of executed commands not yet run.
  pub fn pending_count(&self) -> usize {
    self.pending.lock().len()
  }

  /// Number of scheduled commands not yet run.
  pub fn scheduled_count(&self) -> usize {
    self.scheduled.lock().len()
  }

  /// Number of resources tied to this fiber.
  pub fn registered(&self) -> usize {
    self.registry.len()
  }

  pub fn is_disposed(&self) -> bool {
    self.disposed.load(Ordering::Acquire)
  }

  /// Runs every pending command in order, including ones they enqueue.
  /// Returns how many ran.
  pub fn run_pending(&self) -> usize {
    let mut ran = 0;
    loop {
      let batch = mem::take(&mut *self.pending.lock());
      if batch.is_empty() {
        return ran;
      }
      for command in batch {
        command();
        ran += 1;
      }
    }
  }

  /// Runs the scheduled commands recorded so far, skipping cancelled ones.
  /// Commands they schedule are kept for the next call. Returns how many ran.
  pub fn run_scheduled(&self) -> usize {
    let batch = mem::take(&mut *self.scheduled.lock());
    let mut ran = 0;
    for (handle, command) in batch {
      if !handle.is_cancelled() {
        command();
        ran += 1;
      }
    }
    ran
  }

  /// Forgets every scheduled command without running it.
  pub fn clear_scheduled(&self) {
    let dropped = mem::take(&mut *self.scheduled.lock());
    drop(dropped);
  }
}

impl Fiber for StubFiber {
  fn name(&self) -> &str {
    "stub-fiber"
  }

  fn execute(&self, command: Command) {
    self.pending.lock().push(command);
  }

  fn schedule(&self, command: Command, _delay: Duration) -> TimerHandle {
    let handle = TimerHandle::new();
    self.scheduled.lock().push((handle.clone(), command));
    handle
  }

  /// Records a single run of `command`; the period is not simulated.
  fn schedule_at_fixed_rate(
    &self,
    command: RepeatingCommand,
    _initial_delay: Duration,
    _period: Duration,
  ) -> TimerHandle {
    let handle = TimerHandle::new();
    self
      .scheduled
      .lock()
      .push((handle.clone(), Box::new(move || command())));
    handle
  }

  fn register(&self, resource: Arc<dyn Disposable>) {
    self.registry.add(resource);
  }

  fn unregister(&self, resource: &dyn Disposable) -> bool {
    self.registry.remove(resource)
  }

  fn start(&self) -> Result<()> {
    Ok(())
  }

  fn dispose(&self) {
    if self.disposed.swap(true, Ordering::AcqRel) {
      return;
    }
    self.registry.dispose_all();
  }
}
