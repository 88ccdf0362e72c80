//! Schedulers drive time: the timer publisher and delayed retries.
//!
//! The demand engine itself never schedules anything. Delivery happens
//! synchronously in whatever context produced the event, so a scheduler only
//! decides *where* a timer tick or a delayed resubscription starts.
//!
//! - [`ThreadScheduler`]: one OS thread per scheduled task.
//! - [`TestScheduler`]: virtual time, advanced by hand.
//! - `TokioScheduler`: tasks on a tokio runtime (`tokio-scheduler` feature).

use std::{
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
  time::{Duration, Instant},
};

use crate::{demand::Demand, error::SchedulerError, subscription::Subscription};

mod test_scheduler;
mod thread_scheduler;
#[cfg(feature = "tokio-scheduler")]
mod tokio_scheduler;

pub use test_scheduler::TestScheduler;
pub use thread_scheduler::ThreadScheduler;
#[cfg(feature = "tokio-scheduler")]
pub use tokio_scheduler::TokioScheduler;

/// A task run once.
pub type Task = Box<dyn FnOnce() + Send>;

/// A task run on every period.
pub type RepeatingTask = Box<dyn FnMut() + Send>;

/// Orders tasks in time.
pub trait Scheduler: Send + Sync {
  /// The scheduler's notion of the current time.
  fn now(&self) -> Instant;

  /// Runs `task` once, after `delay`.
  fn schedule_after(&self, delay: Duration, task: Task) -> Result<TaskHandle, SchedulerError>;

  /// Runs `task` every `interval`, first after one `interval`, until the
  /// returned handle is cancelled.
  fn schedule_repeating(&self, interval: Duration, task: RepeatingTask) -> Result<TaskHandle, SchedulerError>;
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
  fn now(&self) -> Instant { (**self).now() }

  fn schedule_after(&self, delay: Duration, task: Task) -> Result<TaskHandle, SchedulerError> {
    (**self).schedule_after(delay, task)
  }

  fn schedule_repeating(&self, interval: Duration, task: RepeatingTask) -> Result<TaskHandle, SchedulerError> {
    (**self).schedule_repeating(interval, task)
  }
}

/// Cancellation handle of a scheduled task.
///
/// Cancelling marks the task; a task that already started runs to the end
/// of its current invocation.
#[derive(Clone, Debug, Default)]
pub struct TaskHandle(Arc<AtomicBool>);

impl TaskHandle {
  pub fn new() -> Self { Self::default() }

  pub fn cancel(&self) { self.0.store(true, Ordering::Release) }

  pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::Acquire) }
}

/// A task handle can stand in for a subscription, so a user's
/// [`Cancellable`](crate::subscription::Cancellable) can stop it.
impl Subscription for TaskHandle {
  fn request(&self, _demand: Demand) {}

  fn cancel(&self) { TaskHandle::cancel(self) }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::subscription::Cancellable;

  #[test]
  fn handle_cancels_through_cancellable() {
    let handle = TaskHandle::new();
    let token = Cancellable::new();
    token.set(Arc::new(handle.clone()));
    assert!(!handle.is_cancelled());
    token.cancel();
    assert!(handle.is_cancelled());
  }
}
