use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use fibre_fibers::{BatchSubscriber, Channel, Fiber, PoolFiberFactory, ThreadFiber};

const MESSAGES: [usize; 2] = [1_000, 10_000];

// Publishes `messages` items and waits for the subscriber to see the last one.
fn publish_and_wait(channel: &Channel<usize>, done: &mpsc::Receiver<()>, messages: usize) -> Duration {
  let start = Instant::now();
  for n in 0..messages {
    channel.publish(n);
  }
  done.recv_timeout(Duration::from_secs(30)).unwrap();
  start.elapsed()
}

fn countdown(messages: usize) -> (mpsc::Receiver<()>, impl Fn(usize) + Send + Sync + 'static) {
  let (tx, rx) = mpsc::sync_channel(1);
  let seen = AtomicUsize::new(0);
  let callback = move |_: usize| {
    if seen.fetch_add(1, Ordering::Relaxed) + 1 == messages {
      seen.store(0, Ordering::Relaxed);
      let _ = tx.send(());
    }
  };
  (rx, callback)
}

fn bench_thread_fiber(c: &mut Criterion) {
  let mut group = c.benchmark_group("ThreadFiber");
  for &messages in &MESSAGES {
    group.throughput(Throughput::Elements(messages as u64));
    group.bench_with_input(BenchmarkId::new("direct", messages), &messages, |b, &messages| {
      let fiber: Arc<dyn Fiber> = Arc::new(ThreadFiber::new());
      fiber.start().unwrap();
      let channel = Channel::new();
      let (done, callback) = countdown(messages);
      channel.subscribe(fiber.clone(), callback);

      b.iter_custom(|iters| (0..iters).map(|_| publish_and_wait(&channel, &done, messages)).sum());
      fiber.dispose();
    });
  }
  group.finish();
}

fn bench_pool_fiber(c: &mut Criterion) {
  let factory = PoolFiberFactory::builder().threads(4).build().unwrap();
  let mut group = c.benchmark_group("PoolFiber");
  for &messages in &MESSAGES {
    group.throughput(Throughput::Elements(messages as u64));
    group.bench_with_input(BenchmarkId::new("direct", messages), &messages, |b, &messages| {
      let fiber: Arc<dyn Fiber> = Arc::new(factory.create());
      fiber.start().unwrap();
      let channel = Channel::new();
      let (done, callback) = countdown(messages);
      channel.subscribe(fiber.clone(), callback);

      b.iter_custom(|iters| (0..iters).map(|_| publish_and_wait(&channel, &done, messages)).sum());
      fiber.dispose();
    });
  }
  group.finish();
}

fn bench_batching(c: &mut Criterion) {
  let mut group = c.benchmark_group("BatchSubscriber");
  for &messages in &MESSAGES {
    group.throughput(Throughput::Elements(messages as u64));
    group.bench_with_input(BenchmarkId::new("1ms_window", messages), &messages, |b, &messages| {
      let fiber: Arc<dyn Fiber> = Arc::new(ThreadFiber::new());
      fiber.start().unwrap();
      let channel = Channel::new();
      let (done, callback) = countdown(messages);
      channel.subscribe_with(BatchSubscriber::new(
        fiber.clone(),
        move |batch: Vec<usize>| batch.into_iter().for_each(&callback),
        Duration::from_millis(1),
      ));

      b.iter_custom(|iters| (0..iters).map(|_| publish_and_wait(&channel, &done, messages)).sum());
      fiber.dispose();
    });
  }
  group.finish();
}

criterion_group!(benches, bench_thread_fiber, bench_pool_fiber, bench_batching);
criterion_main!(benches);
