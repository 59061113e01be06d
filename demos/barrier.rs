//! Five parties meet at a barrier over two rounds. The barrier action prints a
//! separator every time the last party arrives.

use conductor::sync::barrier::CyclicBarrier;
use conductor::sync::scheduler::SchedulerType;
use conductor::sync::service::ExecutorService;
use conductor::utils::sink::{Sink, Stdout};

use rand::Rng;

use std::sync::Arc;
use std::time::Duration;

const PARTIES: usize = 5;

fn main() -> conductor::Result<()> {
  let sink: Arc<dyn Sink> = Arc::new(Stdout);
  let separator = sink.clone();
  let barrier = CyclicBarrier::with_action(PARTIES, move || separator.emit("================"))?;
  let service = ExecutorService::named("barrier", SchedulerType::Pool(PARTIES))?;
  for party in 0..PARTIES {
    let (sink, barrier) = (sink.clone(), barrier.clone());
    service.execute(move || {
      for round in 0..2 {
        let pause = rand::thread_rng().gen_range(10..200);
        std::thread::sleep(Duration::from_millis(pause));
        sink.emit(&format!(
          "party {} round {}: {} already waiting",
          party,
          round,
          barrier.number_waiting()
        ));
        if let Err(cause) = barrier.wait() {
          sink.emit(&format!("party {} gave up: {}", party, cause));
          return;
        }
        sink.emit(&format!("party {} round {} released", party, round));
      }
    })?;
  }
  service.shutdown();
  service.await_termination(Duration::from_secs(10))?;
  Ok(())
}
