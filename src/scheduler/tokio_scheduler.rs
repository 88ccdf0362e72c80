use std::time::{Duration, Instant};

use tokio::runtime::Handle;

use super::{RepeatingTask, Scheduler, Task, TaskHandle};
use crate::error::SchedulerError;

/// Runs tasks on a tokio runtime.
#[derive(Clone, Debug)]
pub struct TokioScheduler {
  handle: Handle,
}

impl TokioScheduler {
  pub fn new(handle: Handle) -> Self { Self { handle } }

  /// Schedules on the runtime the caller is running in.
  pub fn current() -> Result<Self, SchedulerError> {
    Handle::try_current()
      .map(Self::new)
      .map_err(|_| SchedulerError::NoRuntime)
  }
}

impl Scheduler for TokioScheduler {
  fn now(&self) -> Instant { tokio::time::Instant::now().into_std() }

  fn schedule_after(&self, delay: Duration, task: Task) -> Result<TaskHandle, SchedulerError> {
    let handle = TaskHandle::new();
    let cancelled = handle.clone();
    self.handle.spawn(async move {
      tokio::time::sleep(delay).await;
      if !cancelled.is_cancelled() {
        task();
      }
    });
    Ok(handle)
  }

  fn schedule_repeating(&self, interval: Duration, mut task: RepeatingTask) -> Result<TaskHandle, SchedulerError> {
    let handle = TaskHandle::new();
    let cancelled = handle.clone();
    self.handle.spawn(async move {
      let start = tokio::time::Instant::now() + interval;
      let mut ticks = tokio::time::interval_at(start, interval);
      loop {
        ticks.tick().await;
        if cancelled.is_cancelled() {
          break;
        }
        task();
      }
    });
    Ok(handle)
  }
}

#[cfg(test)]
mod test {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use super::*;

  #[test]
  fn no_runtime_outside_tokio() {
    assert!(matches!(TokioScheduler::current(), Err(SchedulerError::NoRuntime)));
  }

  #[tokio::test(start_paused = true)]
  async fn repeating_ticks() {
    let scheduler = TokioScheduler::current().unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let handle = scheduler
      .schedule_repeating(Duration::from_millis(10), Box::new(move || {
        c.fetch_add(1, Ordering::SeqCst);
      }))
      .unwrap();

    tokio::time::sleep(Duration::from_millis(35)).await;
    handle.cancel();
    let seen = count.load(Ordering::SeqCst);
    assert_eq!(seen, 3);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), seen);
  }
}
