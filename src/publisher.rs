//! Publisher trait and operator extension methods.
//!
//! A [`Publisher`] is a description of a stream: nothing happens until a
//! subscriber is handed to [`Publisher::subscribe`]. Every operator in this
//! crate is reached through [`PublisherExt`], implemented for all publishers.

use crate::{
  completion::Completion,
  ops::{
    amb::Amb,
    concat_map::ConcatMap,
    into_stream::PublisherStream,
    map::{FilterMap, Map, MapErr},
    retry::{Retry, RetryPolicy},
    share_replay::ShareReplay,
    with_latest_from::WithLatestFrom,
  },
  scheduler::Scheduler,
  subscriber::{BoxedSubscriber, FnSubscriber, Subscriber},
  subscription::Cancellable,
};

mod sequence;
mod timer;
mod trivial;

pub use sequence::{from_iter, just, FromIter};
pub use timer::TimerPublisher;
pub use trivial::{empty, fail, never, Empty, Fail, Never};

// ============================================================================
// Publisher Trait
// ============================================================================

pub trait Publisher {
  type Item;
  type Err;

  /// Attaches `subscriber`. The subscriber is handed a subscription before
  /// anything else, and nothing is delivered beyond the demand it requests.
  fn subscribe<S>(self, subscriber: S)
  where
    S: Subscriber<Self::Item, Self::Err> + Send + 'static;
}

// ============================================================================
// DynPublisher Trait - Object-safe Publisher
// ============================================================================

/// Object-safe mirror of [`Publisher`]: `subscribe` is generic and consumes
/// `self`, so the boxed form takes a boxed subscriber and a boxed receiver.
pub trait DynPublisher<Item, Err> {
  fn box_subscribe(self: Box<Self>, subscriber: BoxedSubscriber<Item, Err>);
}

impl<P> DynPublisher<P::Item, P::Err> for P
where
  P: Publisher,
  P::Item: 'static,
  P::Err: 'static,
{
  #[inline]
  fn box_subscribe(self: Box<Self>, subscriber: BoxedSubscriber<P::Item, P::Err>) { (*self).subscribe(subscriber) }
}

/// Type-erased publisher that can cross threads.
pub type BoxedPublisher<Item, Err> = Box<dyn DynPublisher<Item, Err> + Send>;

impl<Item, Err> Publisher for BoxedPublisher<Item, Err> {
  type Item = Item;
  type Err = Err;

  #[inline]
  fn subscribe<S>(self, subscriber: S)
  where
    S: Subscriber<Item, Err> + Send + 'static,
  {
    self.box_subscribe(Box::new(subscriber))
  }
}

// ============================================================================
// PublisherExt - operators
// ============================================================================

pub trait PublisherExt: Publisher + Sized {
  /// Erases the publisher's type.
  #[inline]
  fn boxed(self) -> BoxedPublisher<Self::Item, Self::Err>
  where
    Self: Send + 'static,
    Self::Item: 'static,
    Self::Err: 'static,
  {
    Box::new(self)
  }

  /// Subscribes with closures and unlimited demand.
  ///
  /// The returned [`Cancellable`] stops the subscription; dropping it does
  /// not. Use [`Cancellable::cancel_on_drop`] for that.
  fn sink<N, C>(self, on_value: N, on_completion: C) -> Cancellable
  where
    N: FnMut(Self::Item) + Send + 'static,
    C: FnOnce(Completion<Self::Err>) + Send + 'static,
  {
    let subscriber = FnSubscriber::new(on_value, on_completion);
    let cancellable = subscriber.cancellable();
    self.subscribe(subscriber);
    cancellable
  }

  /// Like [`sink`](PublisherExt::sink), ignoring the terminal event.
  fn sink_value<N>(self, on_value: N) -> Cancellable
  where
    N: FnMut(Self::Item) + Send + 'static,
  {
    self.sink(on_value, |_| {})
  }

  /// Transforms every value.
  #[inline]
  fn map<F, Out>(self, f: F) -> Map<Self, F>
  where
    F: Fn(Self::Item) -> Out + Send + Sync + 'static,
  {
    Map::new(self, f)
  }

  /// Transforms every value, dropping those mapped to `None`. A dropped
  /// value gives its unit of demand back to the source.
  #[inline]
  fn filter_map<F, Out>(self, f: F) -> FilterMap<Self, F>
  where
    F: Fn(Self::Item) -> Option<Out> + Send + Sync + 'static,
  {
    FilterMap::new(self, f)
  }

  /// Transforms the failure.
  #[inline]
  fn map_err<F, E2>(self, f: F) -> MapErr<Self, F>
  where
    F: Fn(Self::Err) -> E2 + Send + Sync + 'static,
  {
    MapErr::new(self, f)
  }

  /// Mirrors whichever of `self` and `other` produces an event first and
  /// cancels the other one.
  ///
  /// ```rust
  /// use rxdemand::{prelude::*, testing::{TestPublisher, TestSubscriber}};
  ///
  /// let a = TestPublisher::<i32, ()>::new();
  /// let b = TestPublisher::<i32, ()>::new();
  /// let sub = TestSubscriber::new(Demand::unlimited());
  /// a.clone().amb(b.clone()).subscribe(sub.clone());
  ///
  /// a.send(1);
  /// b.send(2);
  /// assert_eq!(sub.values(), vec![1]);
  /// assert!(b.is_cancelled());
  /// ```
  #[inline]
  fn amb<P>(self, other: P) -> Amb<Self, P>
  where
    P: Publisher<Item = Self::Item, Err = Self::Err>,
  {
    Amb::new(self, other)
  }

  /// Maps every value to a publisher and concatenates them in order: one
  /// inner publisher runs at a time, the next starts when it finishes.
  #[inline]
  fn concat_map<F, Inner>(self, f: F) -> ConcatMap<Self, F>
  where
    F: Fn(Self::Item) -> Inner + Send + 'static,
    Inner: Publisher<Err = Self::Err>,
  {
    ConcatMap::new(self, f)
  }

  /// Pairs each value with the latest value of `other`. Values arriving
  /// before `other` produced anything are dropped.
  #[inline]
  fn with_latest_from<P>(self, other: P) -> WithLatestFrom<Self, P>
  where
    P: Publisher<Err = Self::Err>,
    P::Item: Clone,
  {
    WithLatestFrom::new(self, other)
  }

  /// Resubscribes on failure as long as `policy` allows. Delays are run on
  /// a [`ThreadScheduler`](crate::scheduler::ThreadScheduler).
  #[inline]
  fn retry<R>(self, policy: R) -> Retry<Self, R>
  where
    Self: Clone,
    R: RetryPolicy<Self::Err>,
  {
    Retry::new(self, policy)
  }

  /// Like [`retry`](PublisherExt::retry), waiting on `scheduler`.
  #[inline]
  fn retry_with<R, Sch>(self, policy: R, scheduler: Sch) -> Retry<Self, R>
  where
    Self: Clone,
    R: RetryPolicy<Self::Err>,
    Sch: Scheduler + 'static,
  {
    Retry::with_scheduler(self, policy, scheduler)
  }

  /// Shares one subscription to `self` between all subscribers, replaying the
  /// last `max_size` values to late ones. The source is subscribed when the
  /// first subscriber arrives.
  #[inline]
  fn share_replay(self, max_size: usize) -> ShareReplay<Self>
  where
    Self::Item: Clone,
    Self::Err: Clone,
  {
    ShareReplay::new(self, max_size)
  }

  /// Converts into a [`futures::Stream`] of `Result<Item, Err>`, requesting
  /// one value per poll.
  #[inline]
  fn into_stream(self) -> PublisherStream<Self::Item, Self::Err>
  where
    Self::Item: Send + 'static,
    Self::Err: Send + 'static,
  {
    PublisherStream::new(self)
  }
}

impl<P: Publisher> PublisherExt for P {}
