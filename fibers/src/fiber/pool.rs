// fibers/src/fiber/pool.rs

use super::{schedule_at_fixed_rate_on, schedule_on, CommandSink, Fiber};
use crate::command::{Command, CommandRunner, Disposable, DisposableRegistry, PanicHook, RepeatingCommand};
use crate::error::{CommandPanic, Error, Result};
use crate::scheduler::{Scheduler, TimerHandle, TimerScheduler};

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

/// The "submit a unit of work" capability of a worker pool.
///
/// Pool fibers submit at most one task at a time each, so the pool never
/// needs to know about fibers or ordering.
pub trait Executor: Send + Sync {
  /// Runs `task` on some worker, eventually.
  fn submit(&self, task: Command);
}

#[cfg(feature = "rayon")]
impl Executor for rayon::ThreadPool {
  fn submit(&self, task: Command) {
    self.spawn(task);
  }
}

#[cfg(feature = "tokio")]
impl Executor for tokio::runtime::Handle {
  fn submit(&self, task: Command) {
    // Fiber commands are synchronous and may block, so they go to the
    // blocking pool rather than onto the async workers.
    drop(self.spawn_blocking(task));
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
  Created,
  Running,
  Disposed,
}

struct PoolState {
  pending: Vec<Command>,
  /// `true` while a flush task is submitted or running.
  scheduled: bool,
  lifecycle: Lifecycle,
}

struct PoolShared {
  me: Weak<PoolShared>,
  name: Arc<str>,
  executor: Arc<dyn Executor>,
  state: Mutex<PoolState>,
  registry: DisposableRegistry,
  runner: CommandRunner,
}

impl PoolShared {
  fn submit_flush(&self) {
    if let Some(me) = self.me.upgrade() {
      self.executor.submit(Box::new(move || me.flush()));
    }
  }

  /// Runs everything queued so far, then either resubmits itself for work
  /// that arrived meanwhile or clears the `scheduled` flag.
  fn flush(&self) {
    let mut state = self.state.lock();
    if state.lifecycle != Lifecycle::Running {
      state.scheduled = false;
      let discarded = mem::take(&mut state.pending);
      drop(state);
      drop(discarded);
      return;
    }
    let batch = mem::take(&mut state.pending);
    drop(state);

    tracing::trace!(fiber = %self.name, commands = batch.len(), "pool fiber flush");
    self.runner.run_all(batch);

    let mut state = self.state.lock();
    if state.lifecycle == Lifecycle::Running && !state.pending.is_empty() {
      drop(state);
      self.submit_flush();
    } else {
      state.scheduled = false;
    }
  }
}

impl CommandSink for PoolShared {
  fn enqueue(&self, command: Command) {
    let mut state = self.state.lock();
    let lifecycle = state.lifecycle;
    match lifecycle {
      Lifecycle::Disposed => {
        drop(state);
        drop(command);
      }
      Lifecycle::Created => state.pending.push(command),
      Lifecycle::Running => {
        state.pending.push(command);
        if !state.scheduled {
          state.scheduled = true;
          drop(state);
          self.submit_flush();
        }
      }
    }
  }

  fn register(&self, resource: Arc<dyn Disposable>) {
    self.registry.add(resource);
  }

  fn unregister(&self, resource: &dyn Disposable) -> bool {
    self.registry.remove(resource)
  }
}

/// A fiber that runs on a shared worker pool instead of its own thread.
///
/// Commands are appended to the fiber's buffer; the first one after an idle
/// period submits a single flush task to the pool, and everything appended
/// before that task runs is executed by it. At most one worker runs a given
/// pool fiber at any instant, and commands run in the order they were
/// appended.
///
/// Commands executed before [`start`](Fiber::start) are held until the fiber
/// starts. Dropping the fiber disposes it.
pub struct PoolFiber {
  shared: Arc<PoolShared>,
  scheduler: Arc<dyn Scheduler>,
}

impl fmt::Debug for PoolFiber {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.shared.state.lock();
    f.debug_struct("PoolFiber")
      .field("name", &self.shared.name)
      .field("pending", &state.pending.len())
      .field("scheduled", &state.scheduled)
      .field("lifecycle", &state.lifecycle)
      .finish()
  }
}

impl PoolFiber {
  fn new(
    name: Arc<str>,
    executor: Arc<dyn Executor>,
    scheduler: Arc<dyn Scheduler>,
    panic_hook: Option<PanicHook>,
  ) -> Self {
    let runner = CommandRunner::with_hook(name.clone(), panic_hook);
    let shared = Arc::new_cyclic(|me| PoolShared {
      me: me.clone(),
      name,
      executor,
      state: Mutex::new(PoolState {
        pending: Vec::new(),
        scheduled: false,
        lifecycle: Lifecycle::Created,
      }),
      registry: DisposableRegistry::new(),
      runner,
    });
    Self { shared, scheduler }
  }

  /// Number of commands buffered and not yet taken by a flush.
  pub fn pending(&self) -> usize {
    self.shared.state.lock().pending.len()
  }

  /// Returns `true` once [`dispose`](Fiber::dispose) has been called.
  pub fn is_disposed(&self) -> bool {
    self.shared.state.lock().lifecycle == Lifecycle::Disposed
  }
}

impl Fiber for PoolFiber {
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
    let flush_now = {
      let mut state = self.shared.state.lock();
      match state.lifecycle {
        Lifecycle::Disposed => return Err(Error::Disposed(self.shared.name.to_string())),
        Lifecycle::Running => return Err(Error::AlreadyStarted(self.shared.name.to_string())),
        Lifecycle::Created => {
          state.lifecycle = Lifecycle::Running;
          if !state.pending.is_empty() && !state.scheduled {
            state.scheduled = true;
            true
          } else {
            false
          }
        }
      }
    };
    tracing::debug!(fiber = %self.shared.name, "pool fiber started");
    if flush_now {
      self.shared.submit_flush();
    }
    Ok(())
  }

  fn dispose(&self) {
    let discarded = {
      let mut state = self.shared.state.lock();
      if state.lifecycle == Lifecycle::Disposed {
        return;
      }
      state.lifecycle = Lifecycle::Disposed;
      mem::take(&mut state.pending)
    };
    drop(discarded);
    self.shared.registry.dispose_all();
    tracing::debug!(fiber = %self.shared.name, "pool fiber disposed");
  }
}

impl Drop for PoolFiber {
  fn drop(&mut self) {
    self.dispose();
  }
}

/// Creates [`PoolFiber`]s that share one executor and one scheduler.
pub struct PoolFiberFactory {
  executor: Arc<dyn Executor>,
  scheduler: Arc<dyn Scheduler>,
  owned_timer: Option<Arc<TimerScheduler>>,
  name_prefix: String,
  panic_hook: Option<PanicHook>,
  next_id: AtomicUsize,
  disposed: AtomicBool,
}

impl fmt::Debug for PoolFiberFactory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PoolFiberFactory")
      .field("name_prefix", &self.name_prefix)
      .field("created", &self.next_id.load(Ordering::Relaxed))
      .field("owns_timer", &self.owned_timer.is_some())
      .field("disposed", &self.disposed.load(Ordering::Relaxed))
      .finish_non_exhaustive()
  }
}

impl PoolFiberFactory {
  /// Creates a factory over `executor` with its own timer thread.
  pub fn new(executor: Arc<dyn Executor>) -> Self {
    Self::from_parts(executor, None, "pool-fiber".to_string(), None)
  }

  /// Creates a factory over `executor` and an existing scheduler.
  pub fn with_scheduler(executor: Arc<dyn Executor>, scheduler: Arc<dyn Scheduler>) -> Self {
    Self::from_parts(executor, Some(scheduler), "pool-fiber".to_string(), None)
  }

  /// Returns a builder to configure the factory.
  pub fn builder() -> PoolFiberFactoryBuilder {
    PoolFiberFactoryBuilder::default()
  }

  fn from_parts(
    executor: Arc<dyn Executor>,
    scheduler: Option<Arc<dyn Scheduler>>,
    name_prefix: String,
    panic_hook: Option<PanicHook>,
  ) -> Self {
    let (scheduler, owned_timer) = match scheduler {
      Some(scheduler) => (scheduler, None),
      None => {
        let timer = Arc::new(TimerScheduler::with_panic_hook(
          format!("{}-timer", name_prefix),
          panic_hook.clone(),
        ));
        (timer.clone() as Arc<dyn Scheduler>, Some(timer))
      }
    };
    Self {
      executor,
      scheduler,
      owned_timer,
      name_prefix,
      panic_hook,
      next_id: AtomicUsize::new(0),
      disposed: AtomicBool::new(false),
    }
  }

  /// Creates an unstarted fiber with a generated name.
  pub fn create(&self) -> PoolFiber {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    self.create_named(format!("{}-{}", self.name_prefix, id))
  }

  /// Creates an unstarted fiber named `name`.
  pub fn create_named(&self, name: impl Into<Arc<str>>) -> PoolFiber {
    if self.disposed.load(Ordering::Acquire) {
      tracing::warn!(prefix = %self.name_prefix, "fiber created from a disposed factory; its timers will not fire");
    }
    PoolFiber::new(
      name.into(),
      self.executor.clone(),
      self.scheduler.clone(),
      self.panic_hook.clone(),
    )
  }

  /// Shuts down the timer thread the factory owns, if any. Fibers already
  /// created keep running commands but their pending timers are dropped.
  pub fn dispose(&self) {
    if self.disposed.swap(true, Ordering::AcqRel) {
      return;
    }
    if let Some(timer) = &self.owned_timer {
      timer.shutdown();
    }
  }
}

impl Drop for PoolFiberFactory {
  fn drop(&mut self) {
    self.dispose();
  }
}

/// A builder for [`PoolFiberFactory`].
pub struct PoolFiberFactoryBuilder {
  threads: Option<usize>,
  executor: Option<Arc<dyn Executor>>,
  scheduler: Option<Arc<dyn Scheduler>>,
  name_prefix: String,
  panic_hook: Option<PanicHook>,
}

impl Default for PoolFiberFactoryBuilder {
  fn default() -> Self {
    Self {
      threads: None,
      executor: None,
      scheduler: None,
      name_prefix: "pool-fiber".to_string(),
      panic_hook: None,
    }
  }
}

impl fmt::Debug for PoolFiberFactoryBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PoolFiberFactoryBuilder")
      .field("threads", &self.threads)
      .field("has_executor", &self.executor.is_some())
      .field("has_scheduler", &self.scheduler.is_some())
      .field("name_prefix", &self.name_prefix)
      .field("has_panic_hook", &self.panic_hook.is_some())
      .finish()
  }
}

impl PoolFiberFactoryBuilder {
  /// Sets the number of worker threads of the pool the builder creates.
  /// Ignored when an executor is supplied.
  pub fn threads(mut self, threads: usize) -> Self {
    self.threads = Some(threads.max(1));
    self
  }

  /// Uses an existing executor instead of building a pool.
  pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
    self.executor = Some(executor);
    self
  }

  /// Shares an existing scheduler instead of starting a timer thread.
  pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
    self.scheduler = Some(scheduler);
    self
  }

  /// Sets the prefix of generated fiber names and of pool thread names.
  pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.name_prefix = prefix.into();
    self
  }

  /// Sets the hook that receives reports of panicking commands.
  pub fn panic_hook<H>(mut self, hook: H) -> Self
  where
    H: Fn(&CommandPanic) + Send + Sync + 'static,
  {
    self.panic_hook = Some(Arc::new(hook));
    self
  }

  /// Builds the factory, creating a worker pool if no executor was given.
  pub fn build(self) -> Result<PoolFiberFactory> {
    let executor = match self.executor {
      Some(executor) => executor,
      None => self.build_pool()?,
    };
    Ok(PoolFiberFactory::from_parts(
      executor,
      self.scheduler,
      self.name_prefix,
      self.panic_hook,
    ))
  }

  #[cfg(feature = "rayon")]
  fn build_pool(&self) -> Result<Arc<dyn Executor>> {
    let prefix = self.name_prefix.clone();
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(self.threads.unwrap_or(0))
      .thread_name(move |index| format!("{}-worker-{}", prefix, index))
      .build()?;
    Ok(Arc::new(pool))
  }

  #[cfg(not(feature = "rayon"))]
  fn build_pool(&self) -> Result<Arc<dyn Executor>> {
    Err(Error::NoExecutor)
  }
}
