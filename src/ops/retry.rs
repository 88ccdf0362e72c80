//! Resubscribe to a publisher when it fails.
//!
//! Every attempt is a fresh subscription to a clone of the source, feeding
//! the same [`DemandBuffer`]. Values already delivered stay delivered, and
//! the demand the downstream still has open is requested again from the new
//! attempt.
//!
//! Simple retry with a count:
//!
//! ```rust
//! use rxdemand::{prelude::*, testing::{TestPublisher, TestSubscriber}};
//!
//! let source = TestPublisher::<i32, &str>::new();
//! let sub = TestSubscriber::new(Demand::unlimited());
//! source.clone().retry(2).subscribe(sub.clone());
//!
//! source.send(1);
//! source.send_completion(Completion::Failed("reset"));
//! source.send(2);
//! source.send_completion(Completion::Finished);
//! assert_eq!(sub.values(), vec![1, 2]);
//! assert_eq!(source.subscriptions(), 2);
//! ```
//!
//! Backoff on a scheduler:
//!
//! ```rust
//! use std::time::Duration;
//!
//! use rxdemand::{
//!   ops::retry::{RetryConfig, RetryDelay},
//!   prelude::*,
//!   scheduler::TestScheduler,
//!   testing::TestSubscriber,
//! };
//!
//! let scheduler = TestScheduler::new();
//! let sub = TestSubscriber::<i32, &str>::new(Demand::unlimited());
//! fail("down")
//!   .retry_with(
//!     RetryConfig::new().count(3).delay(RetryDelay::Exponential {
//!       initial: Duration::from_millis(10),
//!       factor: 2,
//!       max: Duration::from_secs(1),
//!     }),
//!     scheduler.clone(),
//!   )
//!   .subscribe(sub.clone());
//!
//! scheduler.flush();
//! assert_eq!(sub.completion(), Some(Completion::Failed("down")));
//! assert_eq!(scheduler.elapsed(), Duration::from_millis(70));
//! ```

use std::{
  fmt,
  sync::{Arc, Weak},
  time::Duration,
};

use tracing::{debug, warn};

use crate::{
  completion::Completion,
  demand::Demand,
  demand_buffer::DemandBuffer,
  lock::Lock,
  publisher::Publisher,
  scheduler::{Scheduler, TaskHandle, ThreadScheduler},
  subscriber::Subscriber,
  subscription::{Subscription, SubscriptionHandle},
};

/// Decides whether a failure is retried, and after how long.
///
/// ```rust
/// use std::time::Duration;
///
/// use rxdemand::ops::retry::RetryPolicy;
///
/// #[derive(Clone)]
/// struct ServerErrors;
///
/// impl RetryPolicy<u16> for ServerErrors {
///   fn should_retry(&self, status: &u16, attempt: usize) -> Option<Duration> {
///     match status {
///       500..=599 if attempt < 3 => Some(Duration::from_millis(500)),
///       429 => Some(Duration::from_secs(2)),
///       _ => None,
///     }
///   }
/// }
///
/// assert_eq!(ServerErrors.should_retry(&503, 0), Some(Duration::from_millis(500)));
/// assert_eq!(ServerErrors.should_retry(&404, 0), None);
/// ```
pub trait RetryPolicy<Err>: Clone {
  /// `Some(delay)` to resubscribe after `delay`, `None` to pass the failure
  /// on. `attempt` counts the retries made so far, starting at 0.
  fn should_retry(&self, err: &Err, attempt: usize) -> Option<Duration>;

  /// Whether a delivered value resets the attempt counter.
  fn reset_on_success(&self) -> bool { false }
}

/// Retry immediately, at most `n` times.
impl<Err> RetryPolicy<Err> for usize {
  fn should_retry(&self, _err: &Err, attempt: usize) -> Option<Duration> {
    if attempt < *self { Some(Duration::ZERO) } else { None }
  }
}

/// How long to wait before a retry.
#[derive(Clone)]
pub enum RetryDelay {
  Immediate,
  Fixed(Duration),
  /// `initial + step * attempt`
  Linear { initial: Duration, step: Duration },
  /// `initial * factor^attempt`, capped at `max`.
  Exponential { initial: Duration, factor: u32, max: Duration },
  Custom(Arc<dyn Fn(usize) -> Duration + Send + Sync>),
}

impl RetryDelay {
  pub fn custom(f: impl Fn(usize) -> Duration + Send + Sync + 'static) -> Self { RetryDelay::Custom(Arc::new(f)) }

  /// The delay before retry number `attempt` (0-based).
  pub fn delay_for(&self, attempt: usize) -> Duration {
    let times = u32::try_from(attempt).unwrap_or(u32::MAX);
    match self {
      RetryDelay::Immediate => Duration::ZERO,
      RetryDelay::Fixed(delay) => *delay,
      RetryDelay::Linear { initial, step } => initial.saturating_add(step.saturating_mul(times)),
      RetryDelay::Exponential { initial, factor, max } => factor
        .checked_pow(times)
        .and_then(|scale| initial.checked_mul(scale))
        .map_or(*max, |delay| delay.min(*max)),
      RetryDelay::Custom(f) => f(attempt),
    }
  }
}

impl From<Duration> for RetryDelay {
  fn from(delay: Duration) -> Self { RetryDelay::Fixed(delay) }
}

impl fmt::Debug for RetryDelay {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RetryDelay::Immediate => f.write_str("Immediate"),
      RetryDelay::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
      RetryDelay::Linear { initial, step } => f
        .debug_struct("Linear")
        .field("initial", initial)
        .field("step", step)
        .finish(),
      RetryDelay::Exponential { initial, factor, max } => f
        .debug_struct("Exponential")
        .field("initial", initial)
        .field("factor", factor)
        .field("max", max)
        .finish(),
      RetryDelay::Custom(_) => f.write_str("Custom"),
    }
  }
}

/// Builder for the common retry policies.
///
/// `count(3)` allows three retries, so at most four subscriptions in total.
/// Without a count, failures are retried forever.
///
/// ```rust
/// use std::time::Duration;
///
/// use rxdemand::ops::retry::{RetryConfig, RetryPolicy};
///
/// let config = RetryConfig::new()
///   .count(5)
///   .delay(Duration::from_secs(1))
///   .reset_on_success();
/// assert_eq!(RetryPolicy::<()>::should_retry(&config, &(), 4), Some(Duration::from_secs(1)));
/// assert_eq!(RetryPolicy::<()>::should_retry(&config, &(), 5), None);
/// ```
#[derive(Clone, Debug)]
pub struct RetryConfig {
  count: Option<usize>,
  delay: RetryDelay,
  reset_on_success: bool,
}

impl RetryConfig {
  pub fn new() -> Self { Self { count: None, delay: RetryDelay::Immediate, reset_on_success: false } }

  pub fn count(mut self, count: usize) -> Self {
    self.count = Some(count);
    self
  }

  pub fn delay(mut self, delay: impl Into<RetryDelay>) -> Self {
    self.delay = delay.into();
    self
  }

  /// Reset the attempt counter whenever the source delivers a value.
  pub fn reset_on_success(mut self) -> Self {
    self.reset_on_success = true;
    self
  }
}

impl Default for RetryConfig {
  fn default() -> Self { Self::new() }
}

impl<Err> RetryPolicy<Err> for RetryConfig {
  fn should_retry(&self, _err: &Err, attempt: usize) -> Option<Duration> {
    if self.count.is_some_and(|count| attempt >= count) {
      return None;
    }
    Some(self.delay.delay_for(attempt))
  }

  fn reset_on_success(&self) -> bool { self.reset_on_success }
}

/// Created by [`PublisherExt::retry`](crate::publisher::PublisherExt::retry)
/// and [`PublisherExt::retry_with`](crate::publisher::PublisherExt::retry_with).
#[derive(Clone)]
pub struct Retry<P, R> {
  source: P,
  policy: R,
  scheduler: Arc<dyn Scheduler>,
}

impl<P, R> Retry<P, R> {
  pub(crate) fn new(source: P, policy: R) -> Self { Self::with_scheduler(source, policy, ThreadScheduler::new()) }

  pub(crate) fn with_scheduler<Sch>(source: P, policy: R, scheduler: Sch) -> Self
  where
    Sch: Scheduler + 'static,
  {
    Self { source, policy, scheduler: Arc::new(scheduler) }
  }
}

struct RetryState {
  attempt: usize,
  generation: u64,
  current: Option<SubscriptionHandle>,
  scheduled: Option<TaskHandle>,
  subscribing: bool,
  subscribe_again: bool,
  terminated: bool,
}

struct RetryCore<P: Publisher, R, S> {
  me: Weak<Self>,
  source: Lock<P>,
  policy: R,
  scheduler: Arc<dyn Scheduler>,
  buffer: DemandBuffer<P::Item, P::Err, S>,
  state: Lock<RetryState>,
}

impl<P, R, S> RetryCore<P, R, S>
where
  P: Publisher + Clone + Send + 'static,
  P::Item: Send + 'static,
  P::Err: Send + 'static,
  R: RetryPolicy<P::Err> + Send + Sync + 'static,
  S: Subscriber<P::Item, P::Err> + Send + 'static,
{
  fn is_current(&self, generation: u64) -> bool {
    let st = self.state.lock();
    !st.terminated && st.generation == generation
  }

  /// Starts a new attempt. An attempt failing synchronously with a zero
  /// delay asks for the next one from inside this call; that request is
  /// picked up by the loop instead of recursing.
  fn subscribe_next(&self) {
    let start = self.state.with(|st| {
      st.scheduled = None;
      if st.terminated {
        return false;
      }
      if st.subscribing {
        st.subscribe_again = true;
        return false;
      }
      st.subscribing = true;
      true
    });
    if !start {
      return;
    }

    loop {
      let generation = self.state.with(|st| {
        st.subscribe_again = false;
        st.generation += 1;
        st.current = None;
        st.generation
      });
      let source = self.source.lock().clone();
      source.subscribe(AttemptSubscriber { core: self.me.clone(), generation });

      let again = self.state.with(|st| {
        if st.subscribe_again && !st.terminated {
          return true;
        }
        st.subscribing = false;
        false
      });
      if !again {
        break;
      }
    }
  }

  fn on_failure(&self, err: P::Err) {
    let attempt = self.state.with(|st| {
      st.current = None;
      st.attempt
    });
    let Some(delay) = self.policy.should_retry(&err, attempt) else {
      self.finish(Completion::Failed(err));
      return;
    };
    self.state.with(|st| st.attempt += 1);
    debug!(attempt = attempt + 1, ?delay, "retrying after failure");

    if delay.is_zero() {
      self.subscribe_next();
      return;
    }
    let core = self.me.clone();
    let scheduled = self.scheduler.schedule_after(
      delay,
      Box::new(move || {
        if let Some(core) = core.upgrade() {
          core.subscribe_next();
        }
      }),
    );
    match scheduled {
      Ok(handle) => {
        let stale = self.state.with(|st| {
          if st.terminated {
            return true;
          }
          st.scheduled = Some(handle.clone());
          false
        });
        if stale {
          handle.cancel();
        }
      }
      Err(schedule_err) => {
        warn!(%schedule_err, "cannot schedule retry, passing the failure on");
        self.finish(Completion::Failed(err));
      }
    }
  }

  fn finish(&self, completion: Completion<P::Err>) {
    let done = self.state.with(|st| {
      if st.terminated {
        return false;
      }
      st.terminated = true;
      st.current = None;
      true
    });
    if done {
      self.buffer.complete(completion);
    }
  }
}

impl<P, R, S> Subscription for RetryCore<P, R, S>
where
  P: Publisher + Clone + Send + 'static,
  P::Item: Send + 'static,
  P::Err: Send + 'static,
  R: RetryPolicy<P::Err> + Send + Sync + 'static,
  S: Subscriber<P::Item, P::Err> + Send + 'static,
{
  fn request(&self, demand: Demand) {
    let owed = self.buffer.demand(demand);
    if owed.is_none() {
      return;
    }
    let current = self.state.lock().current.clone();
    if let Some(current) = current {
      current.request(owed);
    }
  }

  fn cancel(&self) {
    let (current, scheduled) = self.state.with(|st| {
      st.terminated = true;
      (st.current.take(), st.scheduled.take())
    });
    if let Some(scheduled) = scheduled {
      scheduled.cancel();
    }
    if let Some(current) = current {
      current.cancel();
    }
    self.buffer.cancel();
  }
}

struct AttemptSubscriber<P: Publisher, R, S> {
  core: Weak<RetryCore<P, R, S>>,
  generation: u64,
}

impl<P, R, S> Subscriber<P::Item, P::Err> for AttemptSubscriber<P, R, S>
where
  P: Publisher + Clone + Send + 'static,
  P::Item: Send + 'static,
  P::Err: Send + 'static,
  R: RetryPolicy<P::Err> + Send + Sync + 'static,
  S: Subscriber<P::Item, P::Err> + Send + 'static,
{
  fn receive_subscription(&mut self, subscription: SubscriptionHandle) {
    let Some(core) = self.core.upgrade() else {
      subscription.cancel();
      return;
    };
    let accepted = core.state.with(|st| {
      if st.terminated || st.generation != self.generation || st.current.is_some() {
        return false;
      }
      st.current = Some(subscription.clone());
      true
    });
    if !accepted {
      subscription.cancel();
      return;
    }
    let demand = core.buffer.resubscribe_demand();
    if demand.has_demand() {
      subscription.request(demand);
    }
  }

  fn receive(&mut self, value: P::Item) -> Demand {
    let Some(core) = self.core.upgrade() else {
      return Demand::none();
    };
    if !core.is_current(self.generation) {
      return Demand::none();
    }
    if core.policy.reset_on_success() {
      core.state.with(|st| st.attempt = 0);
    }
    core.buffer.buffer(value)
  }

  fn receive_completion(self, completion: Completion<P::Err>) {
    let Some(core) = self.core.upgrade() else {
      return;
    };
    if !core.is_current(self.generation) {
      return;
    }
    match completion {
      Completion::Finished => core.finish(Completion::Finished),
      Completion::Failed(err) => core.on_failure(err),
    }
  }
}

impl<P, R> Publisher for Retry<P, R>
where
  P: Publisher + Clone + Send + 'static,
  P::Item: Send + 'static,
  P::Err: Send + 'static,
  R: RetryPolicy<P::Err> + Send + Sync + 'static,
{
  type Item = P::Item;
  type Err = P::Err;

  fn subscribe<S>(self, subscriber: S)
  where
    S: Subscriber<P::Item, P::Err> + Send + 'static,
  {
    let core = Arc::new_cyclic(|me| RetryCore {
      me: me.clone(),
      source: Lock::new(self.source),
      policy: self.policy,
      scheduler: self.scheduler,
      buffer: DemandBuffer::new(subscriber),
      state: Lock::new(RetryState {
        attempt: 0,
        generation: 0,
        current: None,
        scheduled: None,
        subscribing: false,
        subscribe_again: false,
        terminated: false,
      }),
    });
    // The first attempt asks for the open demand when it subscribes.
    let _ = core.buffer.attach(core.clone());
    core.subscribe_next();
  }
}
