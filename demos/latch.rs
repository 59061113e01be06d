//! Five tasks finish at random times; the main thread waits for all of them
//! on a count down latch.

use conductor::sync::latch::CountDownLatch;
use conductor::sync::scheduler::SchedulerType;
use conductor::sync::service::ExecutorService;
use conductor::utils::sink::{Sink, Stdout};

use rand::Rng;

use std::sync::Arc;
use std::time::Duration;

fn main() -> conductor::Result<()> {
  let sink: Arc<dyn Sink> = Arc::new(Stdout);
  let service = ExecutorService::named("latch", SchedulerType::Pool(5))?;
  let latch = CountDownLatch::new(5);
  for i in 0..5 {
    let (sink, latch) = (sink.clone(), latch.clone());
    service.execute(move || {
      let pause = rand::thread_rng().gen_range(10..200);
      std::thread::sleep(Duration::from_millis(pause));
      sink.emit(&format!("task {} done after {}ms", i, pause));
      latch.count_down();
    })?;
  }
  latch.wait()?;
  sink.emit("all tasks done");
  service.shutdown();
  service.await_termination(Duration::from_secs(5))?;
  Ok(())
}
