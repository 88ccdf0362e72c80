//! A connectable timer shared by any number of subscribers.

use std::{
  convert::Infallible,
  fmt,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
  time::{Duration, Instant},
};

use tracing::{trace, warn};

use crate::{
  demand_buffer::{BufferConfig, OverflowPolicy},
  error::SchedulerError,
  lock::Lock,
  publisher::Publisher,
  scheduler::Scheduler,
  subject::subscribers::{Conduit, Subscribers},
  subscriber::Subscriber,
  subscription::Cancellable,
};

struct TimerInner<Sch> {
  interval: Duration,
  scheduler: Sch,
  subscribers: Lock<Subscribers<Arc<Conduit<Instant, Infallible>>>>,
  connection: Lock<Option<Cancellable>>,
  autoconnect: AtomicBool,
}

impl<Sch: Scheduler> TimerInner<Sch> {
  fn tick(&self) {
    let now = self.scheduler.now();
    let conduits = self.subscribers.lock().snapshot(Arc::clone);
    for conduit in conduits {
      let _ = conduit.buffer().buffer(now);
    }
  }
}

/// Emits the current [`Instant`] every `interval` to every subscriber that
/// has demand at that moment.
///
/// Nothing is scheduled until [`connect`](TimerPublisher::connect) is called,
/// or until the first subscriber arrives when the publisher was made
/// [`autoconnect`](TimerPublisher::autoconnect). A tick is never queued: a
/// subscriber without outstanding demand simply misses it.
///
/// ```rust
/// use std::time::Duration;
///
/// use rxdemand::{prelude::*, scheduler::TestScheduler, testing::TestSubscriber};
///
/// let scheduler = TestScheduler::new();
/// let timer = TimerPublisher::new(Duration::from_secs(1), scheduler.clone());
/// let sub = TestSubscriber::new(Demand::max(2));
/// timer.clone().subscribe(sub.clone());
///
/// let connection = timer.connect().unwrap();
/// scheduler.advance_by(Duration::from_secs(5));
/// assert_eq!(sub.values().len(), 2);
/// connection.cancel();
/// ```
pub struct TimerPublisher<Sch> {
  inner: Arc<TimerInner<Sch>>,
}

impl<Sch> Clone for TimerPublisher<Sch> {
  fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

impl<Sch> TimerPublisher<Sch>
where
  Sch: Scheduler + 'static,
{
  pub fn new(interval: Duration, scheduler: Sch) -> Self {
    Self {
      inner: Arc::new(TimerInner {
        interval,
        scheduler,
        subscribers: Lock::new(Subscribers::default()),
        connection: Lock::new(None),
        autoconnect: AtomicBool::new(false),
      }),
    }
  }

  /// Connects as soon as the first subscriber arrives.
  pub fn autoconnect(self) -> Self {
    self.inner.autoconnect.store(true, Ordering::Release);
    self
  }

  /// Starts ticking. Connecting an already connected timer returns the
  /// existing connection; cancelling the connection stops the ticks.
  /// Subscribers are not completed.
  pub fn connect(&self) -> Result<Cancellable, SchedulerError> {
    let mut connection = self.inner.connection.lock();
    if let Some(live) = connection.as_ref().filter(|c| !c.is_cancelled()) {
      return Ok(live.clone());
    }
    let timer = Arc::downgrade(&self.inner);
    let handle = self.inner.scheduler.schedule_repeating(
      self.inner.interval,
      Box::new(move || {
        if let Some(timer) = timer.upgrade() {
          timer.tick();
        }
      }),
    )?;
    let cancellable = Cancellable::new();
    cancellable.set(Arc::new(handle));
    *connection = Some(cancellable.clone());
    Ok(cancellable)
  }

  pub fn is_connected(&self) -> bool { self.inner.connection.lock().as_ref().is_some_and(|c| !c.is_cancelled()) }

  pub fn subscriber_count(&self) -> usize { self.inner.subscribers.lock().len() }
}

impl<Sch> Publisher for TimerPublisher<Sch>
where
  Sch: Scheduler + 'static,
{
  type Item = Instant;
  type Err = Infallible;

  fn subscribe<S>(self, subscriber: S)
  where
    S: Subscriber<Instant, Infallible> + Send + 'static,
  {
    let registry = Arc::downgrade(&self.inner);
    let config = BufferConfig::new()
      .capacity(0)
      .overflow(OverflowPolicy::DropNewest);
    let conduit = self.inner.subscribers.with(|subs| {
      let id = subs.reserve_id();
      let conduit = Arc::new(Conduit::new(id, Box::new(subscriber), config, move |id| {
        if let Some(timer) = registry.upgrade() {
          let removed = timer.subscribers.with(|subs| subs.remove(id));
          if removed.is_some() {
            trace!(id, "timer subscriber removed");
          }
          drop(removed);
        }
      }));
      subs.insert(id, conduit.clone());
      conduit
    });
    let _ = conduit.buffer().attach(conduit.clone());

    if self.inner.autoconnect.swap(false, Ordering::AcqRel) {
      if let Err(err) = self.connect() {
        warn!(%err, "timer failed to autoconnect");
      }
    }
  }
}

impl<Sch> fmt::Debug for TimerPublisher<Sch> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TimerPublisher")
      .field("interval", &self.inner.interval)
      .field("subscribers", &self.inner.subscribers.lock().len())
      .finish()
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::{demand::Demand, scheduler::TestScheduler, testing::TestSubscriber};

  fn timer(scheduler: &TestScheduler) -> TimerPublisher<TestScheduler> {
    TimerPublisher::new(Duration::from_millis(100), scheduler.clone())
  }

  #[test]
  fn nothing_before_connect() {
    let scheduler = TestScheduler::new();
    let timer = timer(&scheduler);
    let sub = TestSubscriber::new(Demand::unlimited());
    timer.clone().subscribe(sub.clone());
    scheduler.advance_by(Duration::from_secs(1));
    assert!(sub.values().is_empty());
    assert!(scheduler.is_empty());
  }

  #[test]
  fn ticks_only_with_demand() {
    let scheduler = TestScheduler::new();
    let timer = timer(&scheduler);
    let sub = TestSubscriber::new(Demand::max(1));
    timer.clone().subscribe(sub.clone());
    timer.connect().unwrap();

    scheduler.advance_by(Duration::from_millis(350));
    assert_eq!(sub.values().len(), 1);

    // Missed ticks are not queued up.
    sub.request(Demand::max(1));
    assert_eq!(sub.values().len(), 1);
    scheduler.advance_by(Duration::from_millis(100));
    assert_eq!(sub.values().len(), 2);
  }

  #[test]
  fn fans_out_to_every_subscriber() {
    let scheduler = TestScheduler::new();
    let timer = timer(&scheduler);
    let start = scheduler.now();
    let a = TestSubscriber::new(Demand::unlimited());
    let b = TestSubscriber::new(Demand::max(2));
    timer.clone().subscribe(a.clone());
    timer.clone().subscribe(b.clone());
    timer.connect().unwrap();

    scheduler.advance_by(Duration::from_millis(300));
    assert_eq!(a.values().len(), 3);
    assert_eq!(b.values().len(), 2);
    assert_eq!(a.values()[0] - start, Duration::from_millis(100));
    assert_eq!(a.values()[..2], b.values()[..]);
  }

  #[test]
  fn cancel_connection_stops_ticks_without_completion() {
    let scheduler = TestScheduler::new();
    let timer = timer(&scheduler);
    let sub = TestSubscriber::new(Demand::unlimited());
    timer.clone().subscribe(sub.clone());
    let connection = timer.connect().unwrap();
    scheduler.advance_by(Duration::from_millis(100));
    connection.cancel();
    connection.cancel();
    scheduler.advance_by(Duration::from_secs(1));

    assert_eq!(sub.values().len(), 1);
    assert_eq!(sub.completion(), None);
    assert!(!timer.is_connected());
  }

  #[test]
  fn connect_is_shared() {
    let scheduler = TestScheduler::new();
    let timer = timer(&scheduler);
    let first = timer.connect().unwrap();
    let _second = timer.connect().unwrap();
    assert_eq!(scheduler.pending_count(), 1);
    first.cancel();
    assert!(!timer.is_connected());
  }

  #[test]
  fn autoconnect_on_first_subscriber() {
    let scheduler = TestScheduler::new();
    let timer = timer(&scheduler).autoconnect();
    assert!(!timer.is_connected());

    let sub = TestSubscriber::new(Demand::unlimited());
    timer.clone().subscribe(sub.clone());
    assert!(timer.is_connected());
    scheduler.advance_by(Duration::from_millis(200));
    assert_eq!(sub.values().len(), 2);
  }

  #[test]
  fn cancelled_subscriber_is_removed() {
    let scheduler = TestScheduler::new();
    let timer = timer(&scheduler);
    let sub = TestSubscriber::new(Demand::unlimited());
    timer.clone().subscribe(sub.clone());
    assert_eq!(timer.subscriber_count(), 1);
    sub.cancel();
    assert_eq!(timer.subscriber_count(), 0);
  }
}
