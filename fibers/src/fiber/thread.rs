// fibers/src/fiber/thread.rs

use super::{schedule_at_fixed_rate_on, schedule_on, CommandSink, Fiber};
use crate::command::{Command, CommandQueue, CommandRunner, Disposable, PanicHook, RepeatingCommand};
use crate::error::{Error, Result};
use crate::scheduler::{Scheduler, TimerHandle, TimerScheduler};

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

static NEXT_THREAD_FIBER_ID: AtomicUsize = AtomicUsize::new(0);

/// State reachable from the fiber's thread and from its timers.
struct ThreadShared {
  name: Arc<str>,
  queue: CommandQueue,
}

impl CommandSink for ThreadShared {
  fn enqueue(&self, command: Command) {
    self.queue.enqueue(command);
  }

  fn register(&self, resource: Arc<dyn Disposable>) {
    self.queue.add_on_stop(resource);
  }

  fn unregister(&self, resource: &dyn Disposable) -> bool {
    self.queue.remove_on_stop(resource)
  }
}

/// A fiber backed by one exclusive, named thread running a [`CommandQueue`]
/// drain loop.
///
/// Dropping the fiber disposes it.
pub struct ThreadFiber {
  shared: Arc<ThreadShared>,
  scheduler: Arc<dyn Scheduler>,
  owned_timer: Option<Arc<TimerScheduler>>,
  thread: Mutex<Option<JoinHandle<()>>>,
  started: AtomicBool,
  disposed: AtomicBool,
}

impl fmt::Debug for ThreadFiber {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ThreadFiber")
      .field("name", &self.shared.name)
      .field("queue", &self.shared.queue)
      .field("started", &self.started.load(Ordering::Relaxed))
      .field("disposed", &self.disposed.load(Ordering::Relaxed))
      .field("owns_timer", &self.owned_timer.is_some())
      .finish()
  }
}

impl ThreadFiber {
  /// Creates an unstarted fiber with a generated name and its own timer.
  pub fn new() -> Self {
    Self::builder().build()
  }

  /// Returns a builder to configure the fiber.
  pub fn builder() -> ThreadFiberBuilder {
    ThreadFiberBuilder::default()
  }

  /// Number of commands waiting for the fiber thread.
  pub fn pending(&self) -> usize {
    self.shared.queue.len()
  }

  /// Returns `true` once [`dispose`](Fiber::dispose) has been called.
  pub fn is_disposed(&self) -> bool {
    self.disposed.load(Ordering::Acquire)
  }

  /// Waits for the fiber thread to exit.
  ///
  /// Returns immediately if the fiber was never started, was already joined,
  /// or if called from the fiber thread itself. Only returns once the fiber
  /// has been disposed and its current batch finished.
  pub fn join(&self) {
    let handle = {
      let mut slot = self.thread.lock();
      match slot.as_ref() {
        Some(handle) if handle.thread().id() == thread::current().id() => return,
        Some(_) => slot.take(),
        None => return,
      }
    };
    if let Some(handle) = handle {
      if handle.join().is_err() {
        tracing::warn!(fiber = %self.shared.name, "fiber thread exited abnormally");
      }
    }
  }
}

impl Default for ThreadFiber {
  fn default() -> Self {
    Self::new()
  }
}

impl Fiber for ThreadFiber {
  fn name(&self) -> &str {
    &self.shared.name
  }

  fn execute(&self, command: Command) {
    self.shared.enqueue(command);
  }

  fn schedule(&self, command: Command, delay: Duration) -> TimerHandle {
    schedule_on(&self.shared, self.scheduler.as_ref(), command, delay)
  }

  fn schedule_at_fixed_rate(
    &self,
    command: RepeatingCommand,
    initial_delay: Duration,
    period: Duration,
  ) -> TimerHandle {
    schedule_at_fixed_rate_on(
      &self.shared,
      self.scheduler.as_ref(),
      command,
      initial_delay,
      period,
    )
  }

  fn register(&self, resource: Arc<dyn Disposable>) {
    self.shared.register(resource);
  }

  fn unregister(&self, resource: &dyn Disposable) -> bool {
    self.shared.unregister(resource)
  }

  fn start(&self) -> Result<()> {
    if self.is_disposed() {
      return Err(Error::Disposed(self.shared.name.to_string()));
    }
    if self.started.swap(true, Ordering::AcqRel) {
      return Err(Error::AlreadyStarted(self.shared.name.to_string()));
    }

    let shared = self.shared.clone();
    let spawned = thread::Builder::new()
      .name(self.shared.name.to_string())
      .spawn(move || {
        shared.queue.run();
        tracing::debug!(fiber = %shared.name, "fiber thread exiting");
      });

    match spawned {
      Ok(handle) => {
        *self.thread.lock() = Some(handle);
        tracing::debug!(fiber = %self.shared.name, "thread fiber started");
        Ok(())
      }
      Err(source) => {
        self.started.store(false, Ordering::Release);
        Err(Error::Spawn {
          name: self.shared.name.to_string(),
          source,
        })
      }
    }
  }

  fn dispose(&self) {
    if self.disposed.swap(true, Ordering::AcqRel) {
      return;
    }
    self.shared.queue.stop();
    if let Some(timer) = &self.owned_timer {
      timer.shutdown();
    }
    tracing::debug!(fiber = %self.shared.name, "thread fiber disposed");
  }
}

impl Drop for ThreadFiber {
  fn drop(&mut self) {
    self.dispose();
  }
}

/// A builder for [`ThreadFiber`].
#[derive(Default)]
pub struct ThreadFiberBuilder {
  name: Option<String>,
  scheduler: Option<Arc<dyn Scheduler>>,
  panic_hook: Option<PanicHook>,
}

impl fmt::Debug for ThreadFiberBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ThreadFiberBuilder")
      .field("name", &self.name)
      .field("has_scheduler", &self.scheduler.is_some())
      .field("has_panic_hook", &self.panic_hook.is_some())
      .finish()
  }
}

impl ThreadFiberBuilder {
  /// Sets the fiber's name, also used as its thread name.
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  /// Shares an existing scheduler instead of giving the fiber its own timer
  /// thread.
  pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
    self.scheduler = Some(scheduler);
    self
  }

  /// Sets the hook that receives reports of panicking commands.
  ///
  /// Without one, panics are logged with `tracing::error!`.
  pub fn panic_hook<H>(mut self, hook: H) -> Self
  where
    H: Fn(&crate::CommandPanic) + Send + Sync + 'static,
  {
    self.panic_hook = Some(Arc::new(hook));
    self
  }

  /// Builds the fiber. It does not run anything until started.
  pub fn build(self) -> ThreadFiber {
    let name: Arc<str> = match self.name {
      Some(name) => name.into(),
      None => format!(
        "thread-fiber-{}",
        NEXT_THREAD_FIBER_ID.fetch_add(1, Ordering::Relaxed)
      )
      .into(),
    };

    let (scheduler, owned_timer) = match self.scheduler {
      Some(scheduler) => (scheduler, None),
      None => {
        let timer = Arc::new(TimerScheduler::with_panic_hook(
          format!("{}-timer", name),
          self.panic_hook.clone(),
        ));
        (timer.clone() as Arc<dyn Scheduler>, Some(timer))
      }
    };

    let runner = CommandRunner::with_hook(name.clone(), self.panic_hook);
    ThreadFiber {
      shared: Arc::new(ThreadShared {
        name,
        queue: CommandQueue::new(runner),
      }),
      scheduler,
      owned_timer,
      thread: Mutex::new(None),
      started: AtomicBool::new(false),
      disposed: AtomicBool::new(false),
    }
  }
}
