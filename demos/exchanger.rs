//! A producer and a consumer swap values through an exchanger: the producer
//! offers 100, 200, ... and always gets 0 back.

use conductor::sync::exchanger::Exchanger;
use conductor::sync::scheduler::SchedulerType;
use conductor::sync::service::ExecutorService;
use conductor::sync::task::Task;
use conductor::utils::sink::{Sink, Stdout};

use rand::Rng;

use std::sync::Arc;
use std::time::Duration;

const ROUNDS: u32 = 5;

fn main() -> conductor::Result<()> {
  let sink: Arc<dyn Sink> = Arc::new(Stdout);
  let exchanger = Exchanger::new();
  let service = ExecutorService::named("exchanger", SchedulerType::Pool(2))?;

  let (producer_sink, producer_exchanger) = (sink.clone(), exchanger.clone());
  let producer = service.submit(Task::new(move || {
    for i in 0..ROUNDS {
      let data = 100 * (i + 1);
      producer_sink.emit(&format!("producer before: {}", data));
      let data = producer_exchanger.exchange(data)?;
      producer_sink.emit(&format!("producer after: {}", data));
      let pause = rand::thread_rng().gen_range(10..100);
      std::thread::sleep(Duration::from_millis(pause));
    }
    Ok::<_, conductor::Error>(())
  }))?;

  let consumer_sink = sink.clone();
  let consumer = service.submit(Task::new(move || {
    let mut received = Vec::new();
    for _ in 0..ROUNDS {
      consumer_sink.emit("consumer before: 0");
      let data = exchanger.exchange(0)?;
      consumer_sink.emit(&format!("consumer after: {}", data));
      received.push(data);
    }
    Ok::<_, conductor::Error>(received)
  }))?;

  producer.get()?;
  sink.emit(&format!("consumer received {:?}", consumer.get()?));
  service.shutdown();
  service.await_termination(Duration::from_secs(5))?;
  Ok(())
}
