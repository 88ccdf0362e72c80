//! Virtual-time scheduler for deterministic tests of timed publishers.
//!
//! Time only moves when the test says so. Tasks run synchronously on the
//! calling thread from inside [`TestScheduler::advance_by`] or
//! [`TestScheduler::flush`].
//!
//! ```rust
//! use std::time::Duration;
//!
//! use rxdemand::scheduler::{Scheduler, TestScheduler};
//!
//! let scheduler = TestScheduler::new();
//! let handle = scheduler
//!   .schedule_after(Duration::from_millis(100), Box::new(|| println!("fired")))
//!   .unwrap();
//! assert_eq!(scheduler.pending_count(), 1);
//!
//! scheduler.advance_by(Duration::from_millis(100));
//! assert_eq!(scheduler.pending_count(), 0);
//! # drop(handle);
//! ```

use std::{
  cmp::Ordering,
  collections::BinaryHeap,
  sync::Arc,
  time::{Duration, Instant},
};

use super::{RepeatingTask, Scheduler, Task, TaskHandle};
use crate::{error::SchedulerError, lock::Lock};

enum Job {
  Once(Task),
  Repeat(Duration, RepeatingTask),
}

struct ScheduledTask {
  due: Duration,
  seq: usize,
  job: Job,
  handle: TaskHandle,
}

impl PartialEq for ScheduledTask {
  fn eq(&self, other: &Self) -> bool { self.due == other.due && self.seq == other.seq }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for ScheduledTask {
  fn cmp(&self, other: &Self) -> Ordering {
    // Min-heap: earlier times first, then FIFO by sequence number
    other
      .due
      .cmp(&self.due)
      .then_with(|| other.seq.cmp(&self.seq))
  }
}

struct State {
  elapsed: Duration,
  queue: BinaryHeap<ScheduledTask>,
  next_seq: usize,
}

impl State {
  fn push(&mut self, due: Duration, job: Job, handle: TaskHandle) {
    let seq = self.next_seq;
    self.next_seq += 1;
    self.queue.push(ScheduledTask { due, seq, job, handle });
  }
}

/// A virtual time scheduler.
///
/// Clones share the same clock and task queue.
#[derive(Clone)]
pub struct TestScheduler {
  origin: Instant,
  state: Arc<Lock<State>>,
}

impl Default for TestScheduler {
  fn default() -> Self {
    Self {
      origin: Instant::now(),
      state: Arc::new(Lock::new(State { elapsed: Duration::ZERO, queue: BinaryHeap::new(), next_seq: 0 })),
    }
  }
}

impl TestScheduler {
  pub fn new() -> Self { Self::default() }

  /// Virtual time elapsed since the scheduler was created.
  pub fn elapsed(&self) -> Duration { self.state.lock().elapsed }

  /// Number of scheduled tasks that were not cancelled.
  pub fn pending_count(&self) -> usize {
    self
      .state
      .lock()
      .queue
      .iter()
      .filter(|t| !t.handle.is_cancelled())
      .count()
  }

  pub fn is_empty(&self) -> bool { self.pending_count() == 0 }

  /// Advances virtual time by `duration`, running every task that becomes
  /// due on the way, in time order.
  pub fn advance_by(&self, duration: Duration) {
    let target = self.elapsed() + duration;
    self.run_until(target);
  }

  /// Runs every one-shot task, advancing time to the last of them.
  /// Repeating tasks fire as often as that time span allows.
  pub fn flush(&self) {
    while let Some(last) = self.last_one_shot() {
      self.run_until(last);
    }
  }

  fn last_one_shot(&self) -> Option<Duration> {
    self
      .state
      .lock()
      .queue
      .iter()
      .filter(|t| matches!(t.job, Job::Once(_)) && !t.handle.is_cancelled())
      .map(|t| t.due)
      .max()
  }

  fn run_until(&self, target: Duration) {
    loop {
      let next = self.state.with(|st| {
        let due = st.queue.peek().is_some_and(|t| t.due <= target);
        if !due {
          st.elapsed = st.elapsed.max(target);
          return None;
        }
        let task = st.queue.pop()?;
        st.elapsed = task.due;
        Some(task)
      });
      let Some(ScheduledTask { due, job, handle, .. }) = next else {
        break;
      };
      if handle.is_cancelled() {
        continue;
      }
      match job {
        Job::Once(task) => task(),
        Job::Repeat(interval, mut task) => {
          task();
          if !handle.is_cancelled() {
            self
              .state
              .with(|st| st.push(due + interval, Job::Repeat(interval, task), handle));
          }
        }
      }
    }
  }
}

impl Scheduler for TestScheduler {
  fn now(&self) -> Instant { self.origin + self.elapsed() }

  fn schedule_after(&self, delay: Duration, task: Task) -> Result<TaskHandle, SchedulerError> {
    let handle = TaskHandle::new();
    self.state.with(|st| {
      let due = st.elapsed + delay;
      st.push(due, Job::Once(task), handle.clone())
    });
    Ok(handle)
  }

  fn schedule_repeating(&self, interval: Duration, task: RepeatingTask) -> Result<TaskHandle, SchedulerError> {
    let handle = TaskHandle::new();
    self.state.with(|st| {
      let due = st.elapsed + interval;
      st.push(due, Job::Repeat(interval, task), handle.clone())
    });
    Ok(handle)
  }
}
