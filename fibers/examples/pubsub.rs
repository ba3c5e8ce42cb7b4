use fibre_fibers::{Channel, Disposable, Fiber, FiberExt, ThreadFiber};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
struct Order {
  id: u32,
  symbol: &'static str,
  qty: u32,
}

fn main() {
  // Each fiber owns one thread; its callbacks never run concurrently.
  let risk: Arc<dyn Fiber> = Arc::new(ThreadFiber::builder().name("risk").build());
  let audit: Arc<dyn Fiber> = Arc::new(ThreadFiber::builder().name("audit").build());
  risk.start().expect("Failed to start risk fiber");
  audit.start().expect("Failed to start audit fiber");

  let orders: Channel<Order> = Channel::new();
  let (done_tx, done_rx) = mpsc::sync_channel(1);

  // Risk only cares about large orders.
  orders.subscribe_filtered(
    risk.clone(),
    |order: Order| println!("[risk] checking large order #{} ({} x {})", order.id, order.qty, order.symbol),
    |order: &Order| order.qty >= 1_000,
  );

  let audit_sub = orders.subscribe(audit.clone(), move |order: Order| {
    println!("[audit] recorded order #{}", order.id);
    if order.id == 4 {
      let _ = done_tx.send(());
    }
  });

  for (id, (symbol, qty)) in [("ABC", 100), ("XYZ", 5_000), ("ABC", 2_500), ("QRS", 10), ("XYZ", 1)]
    .into_iter()
    .enumerate()
  {
    orders.publish(Order {
      id: id as u32,
      symbol,
      qty,
    });
  }

  done_rx
    .recv_timeout(Duration::from_secs(5))
    .expect("audit fiber did not see every order");

  // Unsubscribing affects only the audit subscription.
  audit_sub.dispose();
  println!("subscribers left: {}", orders.subscriber_count());

  risk.post_after(|| println!("[risk] end of day"), Duration::from_millis(50));
  std::thread::sleep(Duration::from_millis(100));

  risk.dispose();
  audit.dispose();
}
