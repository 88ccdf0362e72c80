//! Demand-gated FIFO between a producer and one downstream subscriber.
//!
//! Values handed to [`DemandBuffer::buffer`] are delivered in order as soon
//! as the downstream has outstanding demand and queued otherwise. The
//! terminal event is delivered once, after every queued value.
//!
//! # Re-entrancy
//!
//! Delivering a value runs downstream code, which may call straight back into
//! [`demand`](DemandBuffer::demand) (or cause the producer to call
//! [`buffer`](DemandBuffer::buffer) / [`complete`](DemandBuffer::complete)).
//! Only one caller drains at a time: the `draining` flag marks the active
//! loop, nested or concurrent calls just update the state and return, and
//! the active loop re-checks the state after every delivery. The downstream
//! is moved out of the locked state while it is being called, so no lock is
//! held across a callback.

use std::{collections::VecDeque, fmt, mem};

use tracing::{debug, trace};

use crate::{
  completion::Completion,
  demand::Demand,
  lock::{Lock, LockGuard},
  subscriber::Subscriber,
  subscription::SubscriptionHandle,
};

/// What to drop when a bounded buffer is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
  /// Discard the value being buffered.
  #[default]
  DropNewest,
  /// Discard the oldest queued value to make room.
  DropOldest,
}

/// Configuration of a [`DemandBuffer`].
///
/// The default is unbounded: a producer that ignores the returned demand
/// makes the queue grow without limit.
///
/// ```rust
/// use rxdemand::demand_buffer::{BufferConfig, OverflowPolicy};
///
/// let config = BufferConfig::new()
///   .capacity(16)
///   .overflow(OverflowPolicy::DropOldest);
/// assert_eq!(config.capacity_limit(), Some(16));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BufferConfig {
  capacity: Option<usize>,
  overflow: OverflowPolicy,
}

impl BufferConfig {
  pub fn new() -> Self { Self::default() }

  /// Bound the number of values queued beyond the outstanding demand.
  pub fn capacity(mut self, capacity: usize) -> Self {
    self.capacity = Some(capacity);
    self
  }

  pub fn overflow(mut self, policy: OverflowPolicy) -> Self {
    self.overflow = policy;
    self
  }

  pub fn capacity_limit(&self) -> Option<usize> { self.capacity }

  pub fn overflow_policy(&self) -> OverflowPolicy { self.overflow }
}

enum Terminal<Err> {
  Open,
  Pending(Completion<Err>),
  Delivered,
}

struct BufferState<Item, Err, D> {
  queue: VecDeque<Item>,
  /// Demand the downstream still has open.
  outstanding: Demand,
  /// Cumulative demand granted by the downstream.
  requested: Demand,
  /// Cumulative demand already passed on to the producer.
  sent: Demand,
  terminal: Terminal<Err>,
  downstream: Option<D>,
  attached: bool,
  draining: bool,
  cancelled: bool,
  config: BufferConfig,
}

impl<Item, Err, D> BufferState<Item, Err, D> {
  #[inline]
  fn is_open(&self) -> bool { !self.cancelled && matches!(self.terminal, Terminal::Open) }

  fn grant(&mut self, demand: Demand) {
    self.outstanding += demand;
    self.requested += demand;
  }

  /// Queues `value` unless the capacity policy rejects it.
  fn enqueue(&mut self, value: Item) -> Result<(), Item> {
    if let Some(capacity) = self.config.capacity {
      let room = match self.outstanding {
        Demand::Unlimited => usize::MAX,
        Demand::Finite(n) => n.saturating_add(capacity),
      };
      if self.queue.len() >= room {
        match self.config.overflow {
          OverflowPolicy::DropNewest => return Err(value),
          OverflowPolicy::DropOldest => {
            if self.queue.pop_front().is_none() {
              return Err(value);
            }
            trace!("buffer full, dropped oldest value");
          }
        }
      }
    }
    self.queue.push_back(value);
    Ok(())
  }

  fn take_terminal(&mut self) -> Option<Completion<Err>> {
    if !self.queue.is_empty() || !matches!(self.terminal, Terminal::Pending(_)) {
      return None;
    }
    match mem::replace(&mut self.terminal, Terminal::Delivered) {
      Terminal::Pending(completion) => Some(completion),
      _ => None,
    }
  }

  /// Demand the producer has not been asked for yet, marked as asked.
  fn owed(&mut self) -> Demand {
    if !self.queue.is_empty() || !self.is_open() || self.sent.is_unlimited() {
      return Demand::none();
    }
    let owed = self.requested - self.sent;
    self.sent = self.requested;
    owed
  }
}

/// FIFO value buffer that honours the downstream's demand.
pub struct DemandBuffer<Item, Err, D> {
  state: Lock<BufferState<Item, Err, D>>,
}

impl<Item, Err, D> DemandBuffer<Item, Err, D>
where
  D: Subscriber<Item, Err>,
{
  pub fn new(downstream: D) -> Self { Self::with_config(downstream, BufferConfig::default()) }

  pub fn with_config(downstream: D, config: BufferConfig) -> Self {
    Self {
      state: Lock::new(BufferState {
        queue: VecDeque::new(),
        outstanding: Demand::none(),
        requested: Demand::none(),
        sent: Demand::none(),
        terminal: Terminal::Open,
        downstream: Some(downstream),
        attached: false,
        draining: false,
        cancelled: false,
        config,
      }),
    }
  }

  /// Hands `subscription` to the downstream. Nothing is delivered before
  /// this call. Demand the downstream requests from inside
  /// `receive_subscription` is recorded and served once it returns.
  ///
  /// Returns the demand now owed by the producer.
  pub fn attach(&self, subscription: SubscriptionHandle) -> Demand {
    let mut st = self.state.lock();
    if st.attached || st.draining {
      return Demand::none();
    }
    let Some(mut downstream) = st.downstream.take() else {
      return Demand::none();
    };
    st.attached = true;
    st.draining = true;
    drop(st);

    downstream.receive_subscription(subscription);
    let st = self.state.lock();
    self.run(st, downstream)
  }

  /// Marks the buffer as attached when the downstream was handed its
  /// subscription by someone else (a downstream shared by several buffers).
  pub fn assume_attached(&self) -> Demand {
    let mut st = self.state.lock();
    st.attached = true;
    self.drain(st)
  }

  /// Enqueues `value` and delivers as much as the outstanding demand allows.
  ///
  /// Returns `none` while values remain queued, otherwise the additional
  /// demand the producer is now owed.
  pub fn buffer(&self, value: Item) -> Demand {
    let mut st = self.state.lock();
    if !st.is_open() {
      drop(st);
      debug!("value received after terminal event, ignored");
      return Demand::none();
    }
    if st.enqueue(value).is_err() {
      drop(st);
      trace!("buffer full, dropped newest value");
      return Demand::none();
    }
    self.drain(st)
  }

  /// Adds `requested` to the outstanding demand and delivers what it allows.
  pub fn demand(&self, requested: Demand) -> Demand {
    let mut st = self.state.lock();
    if st.cancelled || matches!(st.terminal, Terminal::Delivered) {
      return Demand::none();
    }
    st.grant(requested);
    self.drain(st)
  }

  /// Records the terminal event. The first call wins; it is delivered as
  /// soon as the queue is empty.
  pub fn complete(&self, completion: Completion<Err>) {
    let mut st = self.state.lock();
    if !st.is_open() {
      drop(st);
      debug!("duplicate terminal event ignored");
      return;
    }
    st.terminal = Terminal::Pending(completion);
    let _ = self.drain(st);
  }

  /// The outstanding demand, marked as passed on. Used when a new producer
  /// takes over from one that went away.
  pub fn resubscribe_demand(&self) -> Demand {
    self.state.with(|st| {
      if !st.is_open() {
        return Demand::none();
      }
      st.sent = st.requested;
      st.outstanding - st.queue.len()
    })
  }

  fn drain<'a>(&'a self, mut st: LockGuard<'a, BufferState<Item, Err, D>>) -> Demand {
    if st.draining || !st.attached {
      return Demand::none();
    }
    match st.downstream.take() {
      Some(downstream) => {
        st.draining = true;
        self.run(st, downstream)
      }
      None => Demand::none(),
    }
  }

  /// The drain loop. Entered with `draining` set and the downstream moved
  /// out of the state.
  fn run<'a>(&'a self, mut st: LockGuard<'a, BufferState<Item, Err, D>>, mut downstream: D) -> Demand {
    loop {
      if st.cancelled {
        st.draining = false;
        drop(st);
        drop(downstream);
        return Demand::none();
      }

      if st.outstanding.has_demand() {
        if let Some(value) = st.queue.pop_front() {
          st.outstanding.take_one();
          drop(st);
          let more = downstream.receive(value);
          st = self.state.lock();
          st.grant(more);
          continue;
        }
      }

      if let Some(completion) = st.take_terminal() {
        st.draining = false;
        drop(st);
        downstream.receive_completion(completion);
        return Demand::none();
      }

      st.draining = false;
      st.downstream = Some(downstream);
      return st.owed();
    }
  }
}

impl<Item, Err, D> DemandBuffer<Item, Err, D> {
  /// Drops queued values and the downstream. Every later call is a no-op.
  /// Safe to call from inside a delivery.
  pub fn cancel(&self) {
    let (queue, downstream) = self.state.with(|st| {
      if st.cancelled {
        return (VecDeque::new(), None);
      }
      st.cancelled = true;
      (mem::take(&mut st.queue), st.downstream.take())
    });
    drop(queue);
    drop(downstream);
  }

  pub fn outstanding(&self) -> Demand { self.state.lock().outstanding }

  pub fn len(&self) -> usize { self.state.lock().queue.len() }

  pub fn is_empty(&self) -> bool { self.state.lock().queue.is_empty() }

  /// `true` once a terminal event was recorded or the buffer was cancelled.
  pub fn is_terminated(&self) -> bool { !self.state.lock().is_open() }

  pub fn is_cancelled(&self) -> bool { self.state.lock().cancelled }
}

impl<Item, Err, D> fmt::Debug for DemandBuffer<Item, Err, D> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let st = self.state.lock();
    f.debug_struct("DemandBuffer")
      .field("queued", &st.queue.len())
      .field("outstanding", &st.outstanding)
      .field("requested", &st.requested)
      .field("sent", &st.sent)
      .field("draining", &st.draining)
      .field("cancelled", &st.cancelled)
      .finish()
  }
}
