use super::{schedule_at_fixed_rate_on, schedule_on, CommandSink, Fiber};
use crate::command::{Command, CommandRunner, Disposable, DisposableRegistry, RepeatingCommand};
use crate::error::Result;
use crate::scheduler::{TimerHandle, TimerScheduler};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct SyncShared {
  running: AtomicBool,
  registry: DisposableRegistry,
  runner: CommandRunner,
}

impl CommandSink for SyncShared {
  fn enqueue(&self, command: Command) {
    if self.running.load(Ordering::Acquire) {
      self.runner.run(command);
    }
  }

  fn register(&self, resource: Arc<dyn Disposable>) {
    self.registry.add(resource);
  }

  fn unregister(&self, resource: &dyn Disposable) -> bool {
    self.registry.remove(resource)
  }
}

/// A fiber that runs every command inline, on whichever thread submits it.
///
/// Useful when the caller is already single-threaded, and in tests that
/// want delivery to happen before `publish` returns. Delayed commands fire
/// on the fiber's own timer thread, which is only started if needed. Once
/// disposed, commands are ignored.
pub struct SynchronousFiber {
  name: Arc<str>,
  shared: Arc<SyncShared>,
  timer: TimerScheduler,
}

impl fmt::Debug for SynchronousFiber {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SynchronousFiber")
      .field("name", &self.name)
      .field("running", &self.shared.running.load(Ordering::Relaxed))
      .field("registered", &self.shared.registry.len())
      .finish()
  }
}

impl SynchronousFiber {
  /// Creates a running inline fiber.
  pub fn new() -> Self {
    Self::named("sync-fiber")
  }

  /// Creates a running inline fiber named `name`.
  pub fn named(name: impl Into<Arc<str>>) -> Self {
    let name = name.into();
    Self {
      timer: TimerScheduler::new(format!("{}-timer", name)),
      shared: Arc::new(SyncShared {
        running: AtomicBool::new(true),
        registry: DisposableRegistry::new(),
        runner: CommandRunner::new(name.clone()),
      }),
      name,
    }
  }

  /// Number of resources currently tied to this fiber.
  pub fn registered(&self) -> usize {
    self.shared.registry.len()
  }
}

impl Default for SynchronousFiber {
  fn default() -> Self {
    Self::new()
  }
}

impl Fiber for SynchronousFiber {
  fn name(&self) -> &str {
    &self.name
  }

  fn execute(&self, command: Command) {
    self.shared.enqueue(command);
  }

  fn schedule(&self, command: Command, delay: Duration) -> TimerHandle {
    schedule_on(&self.shared, &self.timer, command, delay)
  }

  fn schedule_at_fixed_rate(
    &self,
    command: RepeatingCommand,
    initial_delay: Duration,
    period: Duration,
  ) -> TimerHandle {
    schedule_at_fixed_rate_on(&self.shared, &self.timer, command, initial_delay, period)
  }

  fn register(&self, resource: Arc<dyn Disposable>) {
    self.shared.register(resource);
  }

  fn unregister(&self, resource: &dyn Disposable) -> bool {
    self.shared.unregister(resource)
  }

  fn start(&self) -> Result<()> {
    Ok(())
  }

  fn dispose(&self) {
    if !self.shared.running.swap(false, Ordering::AcqRel) {
      return;
    }
    self.shared.registry.dispose_all();
    self.timer.shutdown();
  }
}
