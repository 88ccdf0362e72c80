use std::{
  thread,
  time::{Duration, Instant},
};

use super::{RepeatingTask, Scheduler, Task, TaskHandle};
use crate::error::SchedulerError;

/// Runs every scheduled task on a new OS thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadScheduler;

impl ThreadScheduler {
  pub fn new() -> Self { Self }

  fn spawn(f: impl FnOnce() + Send + 'static) -> Result<(), SchedulerError> {
    thread::Builder::new()
      .name("rxdemand-timer".into())
      .spawn(f)?;
    Ok(())
  }
}

impl Scheduler for ThreadScheduler {
  fn now(&self) -> Instant { Instant::now() }

  fn schedule_after(&self, delay: Duration, task: Task) -> Result<TaskHandle, SchedulerError> {
    let handle = TaskHandle::new();
    let cancelled = handle.clone();
    Self::spawn(move || {
      thread::sleep(delay);
      if !cancelled.is_cancelled() {
        task();
      }
    })?;
    Ok(handle)
  }

  fn schedule_repeating(&self, interval: Duration, mut task: RepeatingTask) -> Result<TaskHandle, SchedulerError> {
    let handle = TaskHandle::new();
    let cancelled = handle.clone();
    Self::spawn(move || {
      // Deadlines advance by whole intervals so a slow task does not drift.
      let mut next = Instant::now() + interval;
      loop {
        thread::sleep(next.saturating_duration_since(Instant::now()));
        if cancelled.is_cancelled() {
          break;
        }
        task();
        next += interval;
      }
    })?;
    Ok(handle)
  }
}
