#![cfg(feature = "rayon")]

mod common;
use common::*;

use fibre_fibers::{Channel, Command, Disposable, Error, Executor, Fiber, FiberExt, PoolFiberFactory};
use parking_lot::Mutex;
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn factory(threads: usize) -> PoolFiberFactory {
  PoolFiberFactory::builder()
    .threads(threads)
    .name_prefix("test-pool")
    .build()
    .unwrap()
}

/// Runs every submitted task on the submitting thread and counts submissions.
#[derive(Default)]
struct InlineExecutor {
  submitted: AtomicUsize,
}

impl Executor for InlineExecutor {
  fn submit(&self, task: Command) {
    self.submitted.fetch_add(1, Ordering::SeqCst);
    task();
  }
}

#[test]
fn factory_names_fibers_from_its_prefix() {
  let factory = factory(1);
  let first = factory.create();
  let second = factory.create();
  let named = factory.create_named("quotes");
  assert_eq!(first.name(), "test-pool-0");
  assert_eq!(second.name(), "test-pool-1");
  assert_eq!(named.name(), "quotes");
}

#[test]
fn pool_fiber_start_errors() {
  let factory = factory(1);
  let fiber = factory.create();
  fiber.start().unwrap();
  assert!(matches!(fiber.start(), Err(Error::AlreadyStarted(_))));
  fiber.dispose();
  assert!(fiber.is_disposed());
  assert!(matches!(fiber.start(), Err(Error::Disposed(_))));
}

#[test]
fn one_flush_task_per_idle_period() {
  let executor = Arc::new(InlineExecutor::default());
  let factory = PoolFiberFactory::new(executor.clone());
  let fiber = factory.create();

  let count = Arc::new(AtomicUsize::new(0));
  for _ in 0..3 {
    let count = count.clone();
    fiber.post(move || {
      count.fetch_add(1, Ordering::SeqCst);
    });
  }
  // Nothing runs, and nothing is submitted, before start.
  assert_eq!(fiber.pending(), 3);
  assert_eq!(executor.submitted.load(Ordering::SeqCst), 0);

  fiber.start().unwrap();
  assert_eq!(count.load(Ordering::SeqCst), 3);
  assert_eq!(executor.submitted.load(Ordering::SeqCst), 1);

  let count_again = count.clone();
  fiber.post(move || {
    count_again.fetch_add(1, Ordering::SeqCst);
  });
  assert_eq!(count.load(Ordering::SeqCst), 4);
  assert_eq!(executor.submitted.load(Ordering::SeqCst), 2);
}

#[test]
fn commands_enqueued_during_a_flush_are_picked_up_by_a_resubmit() {
  let executor = Arc::new(InlineExecutor::default());
  let factory = PoolFiberFactory::new(executor.clone());
  let fiber = Arc::new(factory.create());
  fiber.start().unwrap();

  let order = Arc::new(Mutex::new(Vec::new()));
  {
    let fiber_ref = fiber.clone();
    let order = order.clone();
    fiber.post(move || {
      order.lock().push(1);
      let order = order.clone();
      fiber_ref.post(move || order.lock().push(2));
    });
  }
  assert_eq!(*order.lock(), vec![1, 2]);
  // The nested command waited for the running flush to finish.
  assert_eq!(executor.submitted.load(Ordering::SeqCst), 2);
}

#[test]
fn disposed_pool_fiber_drops_commands() {
  let executor = Arc::new(InlineExecutor::default());
  let factory = PoolFiberFactory::new(executor.clone());
  let fiber = factory.create();
  fiber.start().unwrap();
  fiber.dispose();

  fiber.post(|| unreachable!());
  assert_eq!(fiber.pending(), 0);
  assert_eq!(executor.submitted.load(Ordering::SeqCst), 0);
}

#[test]
#[serial]
fn a_pool_fiber_never_runs_on_two_workers_at_once() {
  const PRODUCERS: usize = 4;
  let factory = factory(4);
  let fiber: Arc<dyn Fiber> = Arc::new(factory.create());
  fiber.start().unwrap();

  let active = Arc::new(AtomicUsize::new(0));
  let max_active = Arc::new(AtomicUsize::new(0));
  let delivered = Arc::new(AtomicUsize::new(0));
  let channel: Channel<usize> = Channel::new();
  {
    let (active, max_active, delivered) = (active.clone(), max_active.clone(), delivered.clone());
    channel.subscribe(fiber.clone(), move |_| {
      let now = active.fetch_add(1, Ordering::SeqCst) + 1;
      max_active.fetch_max(now, Ordering::SeqCst);
      thread::yield_now();
      active.fetch_sub(1, Ordering::SeqCst);
      delivered.fetch_add(1, Ordering::SeqCst);
    });
  }

  let producers: Vec<_> = (0..PRODUCERS)
    .map(|_| {
      let channel = channel.clone();
      thread::spawn(move || {
        for i in 0..ITEMS_MEDIUM {
          channel.publish(i);
        }
      })
    })
    .collect();
  for producer in producers {
    producer.join().unwrap();
  }

  assert!(wait_until(LONG_TIMEOUT, || delivered.load(Ordering::SeqCst) == PRODUCERS * ITEMS_MEDIUM));
  assert_eq!(max_active.load(Ordering::SeqCst), 1);
}

#[test]
#[serial]
fn pool_fiber_preserves_publish_order() {
  let factory = factory(2);
  let fiber: Arc<dyn Fiber> = Arc::new(factory.create());
  fiber.start().unwrap();

  let channel: Channel<usize> = Channel::new();
  let received = Arc::new(Mutex::new(Vec::new()));
  {
    let received = received.clone();
    channel.subscribe(fiber.clone(), move |n| received.lock().push(n));
  }
  for n in 0..ITEMS_HIGH {
    channel.publish(n);
  }

  assert!(wait_until(LONG_TIMEOUT, || received.lock().len() == ITEMS_HIGH));
  assert_eq!(*received.lock(), (0..ITEMS_HIGH).collect::<Vec<_>>());
}

#[test]
#[serial]
fn many_fibers_share_a_small_pool() {
  let factory = factory(2);
  let counts: Vec<_> = (0..10).map(|_| Arc::new(AtomicUsize::new(0))).collect();
  let fibers: Vec<_> = counts
    .iter()
    .map(|count| {
      let fiber = factory.create();
      fiber.start().unwrap();
      for _ in 0..ITEMS_LOW {
        let count = count.clone();
        fiber.post(move || {
          count.fetch_add(1, Ordering::SeqCst);
        });
      }
      fiber
    })
    .collect();

  assert!(wait_until(LONG_TIMEOUT, || counts
    .iter()
    .all(|count| count.load(Ordering::SeqCst) == ITEMS_LOW)));
  drop(fibers);
}

#[test]
#[serial]
fn pool_fiber_schedules_through_the_factory_timer() {
  let factory = factory(1);
  let fiber = factory.create();
  fiber.start().unwrap();

  let fired = Arc::new(AtomicUsize::new(0));
  let cancelled = {
    let fired = fired.clone();
    fiber.post_after(
      move || {
        fired.fetch_add(10, Ordering::SeqCst);
      },
      Duration::from_millis(30),
    )
  };
  {
    let fired = fired.clone();
    fiber.post_after(
      move || {
        fired.fetch_add(1, Ordering::SeqCst);
      },
      Duration::from_millis(15),
    );
  }
  cancelled.dispose();

  assert!(wait_until(LONG_TIMEOUT, || fired.load(Ordering::SeqCst) == 1));
  thread::sleep(SHORT_TIMEOUT);
  assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
#[serial]
fn subscriptions_racing_dispose_are_all_released() {
  const SUBSCRIBERS: usize = 4;
  for _ in 0..ITEMS_LOW {
    let factory = PoolFiberFactory::new(Arc::new(InlineExecutor::default()));
    let fiber: Arc<dyn Fiber> = Arc::new(factory.create());
    fiber.start().unwrap();
    let channel: Channel<u32> = Channel::new();

    let subscribers: Vec<_> = (0..SUBSCRIBERS)
      .map(|_| {
        let (channel, fiber) = (channel.clone(), fiber.clone());
        thread::spawn(move || {
          for _ in 0..ITEMS_LOW {
            channel.subscribe(fiber.clone(), |_: u32| {});
          }
        })
      })
      .collect();
    fiber.dispose();
    for subscriber in subscribers {
      subscriber.join().unwrap();
    }

    // Whichever side won each race, nothing outlives the fiber.
    assert_eq!(channel.subscriber_count(), 0);
  }
}
