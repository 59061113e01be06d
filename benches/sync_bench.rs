#![feature(test)]
use conductor::sync::runtime::Runtime;
use conductor::sync::scheduler::SchedulerType;
use conductor::sync::service::ExecutorService;
use conductor::sync::task::Task;

extern crate test;
use test::Bencher;

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

#[bench]
fn runtime_benchmark(bencher: &mut Bencher) {
  bencher.iter(|| {
    let counter = Arc::new(AtomicI32::new(0));
    let handles: Vec<_> = (0..100)
      .map(|_| {
        let cloned = counter.clone();
        Runtime::submit(move || {
          cloned.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap()
      })
      .collect();
    for handle in handles {
      handle.get().unwrap();
    }
    assert_eq!(counter.load(Ordering::Relaxed), 100);
  })
}

#[bench]
fn invoke_all_benchmark(bencher: &mut Bencher) {
  let service = ExecutorService::new(SchedulerType::Pool(4)).unwrap();
  bencher.iter(|| {
    let handles = service
      .invoke_all((0..100).map(|i| Task::from_fn(move || i)))
      .unwrap();
    assert_eq!(handles.len(), 100);
  });
  service.shutdown();
}
