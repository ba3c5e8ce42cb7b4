use fibre_fibers::{BatchSubscriber, Channel, Fiber, KeyedBatchSubscriber, LastSubscriber, PoolFiberFactory};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
struct Tick {
  symbol: &'static str,
  price: f64,
}

fn main() {
  // Three pool fibers multiplexed over two worker threads.
  let factory = PoolFiberFactory::builder()
    .threads(2)
    .name_prefix("md")
    .build()
    .expect("Failed to build the worker pool");

  let fibers: Vec<Arc<dyn Fiber>> = (0..3).map(|_| Arc::new(factory.create()) as Arc<dyn Fiber>).collect();
  for fiber in &fibers {
    fiber.start().expect("Failed to start pool fiber");
  }

  let ticks: Channel<Tick> = Channel::new();
  let window = Duration::from_millis(100);

  ticks.subscribe_with(BatchSubscriber::new(
    fibers[0].clone(),
    |batch: Vec<Tick>| println!("[batch] {} ticks in window", batch.len()),
    window,
  ));

  ticks.subscribe_with(KeyedBatchSubscriber::new(
    fibers[1].clone(),
    |latest: HashMap<&'static str, Tick>| {
      let mut symbols: Vec<_> = latest.values().collect();
      symbols.sort_by(|a, b| a.symbol.cmp(b.symbol));
      for tick in symbols {
        println!("[keyed] {} = {:.2}", tick.symbol, tick.price);
      }
    },
    window,
    |tick: &Tick| tick.symbol,
  ));

  ticks.subscribe_with(LastSubscriber::new(
    fibers[2].clone(),
    |tick: Tick| println!("[last] most recent: {} @ {:.2}", tick.symbol, tick.price),
    window,
  ));

  for i in 0..30 {
    let symbol = ["ABC", "XYZ", "QRS"][i % 3];
    ticks.publish(Tick {
      symbol,
      price: 100.0 + i as f64 * 0.25,
    });
  }

  std::thread::sleep(window * 3);
  for fiber in &fibers {
    fiber.dispose();
  }
}
