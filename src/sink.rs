//! Sink: one upstream subscription bridged into one [`DemandBuffer`].
//!
//! A sink exclusively owns its upstream subscription and is the only thing
//! allowed to cancel it. The downstream is reached only through the buffer.
//! Operators hold sinks in an `Arc`; the upstream sees a [`SinkSubscriber`]
//! holding a weak reference, so a pending upstream callback never keeps a
//! sink alive and finds nothing to do once the sink is gone.

use std::{
  fmt,
  sync::{Arc, Weak},
};

use tracing::trace;

use crate::{
  completion::Completion,
  demand::Demand,
  demand_buffer::{BufferConfig, DemandBuffer},
  lock::Lock,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::{Subscription, SubscriptionHandle},
};

type Transform<In, Out> = Box<dyn Fn(In) -> Option<Out> + Send + Sync>;
type FailureTransform<InErr, Err> = Box<dyn Fn(InErr) -> Err + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LinkState {
  /// No upstream subscription yet.
  Waiting,
  Active,
  /// The upstream sent its terminal event.
  Terminated,
  Cancelled,
}

struct Link {
  state: LinkState,
  subscription: Option<SubscriptionHandle>,
  /// Demand decided before the upstream subscription arrived.
  pending: Demand,
}

/// Adapts one upstream into demand-gated delivery to one downstream.
///
/// `transform` maps each upstream value; returning `None` drops the value and
/// hands its unit of demand back upstream. `transform_failure` maps the
/// upstream error.
pub struct Sink<In, InErr, Out, Err, D> {
  buffer: DemandBuffer<Out, Err, D>,
  link: Lock<Link>,
  transform: Transform<In, Out>,
  transform_failure: FailureTransform<InErr, Err>,
}

impl<In, InErr, Out, Err, D> Sink<In, InErr, Out, Err, D>
where
  D: Subscriber<Out, Err>,
{
  pub fn new<F, G>(downstream: D, transform: F, transform_failure: G) -> Arc<Self>
  where
    F: Fn(In) -> Option<Out> + Send + Sync + 'static,
    G: Fn(InErr) -> Err + Send + Sync + 'static,
  {
    Self::with_config(downstream, BufferConfig::default(), transform, transform_failure)
  }

  pub fn with_config<F, G>(downstream: D, config: BufferConfig, transform: F, transform_failure: G) -> Arc<Self>
  where
    F: Fn(In) -> Option<Out> + Send + Sync + 'static,
    G: Fn(InErr) -> Err + Send + Sync + 'static,
  {
    Arc::new(Self {
      buffer: DemandBuffer::with_config(downstream, config),
      link: Lock::new(Link { state: LinkState::Waiting, subscription: None, pending: Demand::none() }),
      transform: Box::new(transform),
      transform_failure: Box::new(transform_failure),
    })
  }

  /// Builds a sink and subscribes it to `upstream`.
  pub fn connect<P, F, G>(upstream: P, downstream: D, transform: F, transform_failure: G) -> Arc<Self>
  where
    P: Publisher<Item = In, Err = InErr>,
    F: Fn(In) -> Option<Out> + Send + Sync + 'static,
    G: Fn(InErr) -> Err + Send + Sync + 'static,
    Self: Send + Sync + 'static,
  {
    let sink = Self::new(downstream, transform, transform_failure);
    sink.subscribe_to(upstream);
    sink
  }

  /// Subscribes to `upstream` through a weak adapter.
  pub fn subscribe_to<P>(self: &Arc<Self>, upstream: P)
  where
    P: Publisher<Item = In, Err = InErr>,
    Self: Send + Sync + 'static,
  {
    upstream.subscribe(SinkSubscriber(Arc::downgrade(self)));
  }

  /// Stores the upstream subscription. No demand of its own is requested,
  /// only what callers already passed to [`demand`](Self::demand).
  pub fn receive_subscription(&self, subscription: SubscriptionHandle) {
    let accepted = self.link.with(|link| match link.state {
      LinkState::Waiting => {
        link.state = LinkState::Active;
        link.subscription = Some(subscription.clone());
        Some(std::mem::take(&mut link.pending))
      }
      _ => None,
    });
    match accepted {
      Some(pending) if pending.has_demand() => subscription.request(pending),
      Some(_) => {}
      None => {
        trace!("sink no longer accepts an upstream, cancelling it");
        subscription.cancel();
      }
    }
  }

  pub fn receive(&self, value: In) -> Demand {
    if !self.is_live() {
      return Demand::none();
    }
    match (self.transform)(value) {
      Some(value) => self.buffer.buffer(value),
      None => Demand::max(1),
    }
  }

  pub fn receive_completion(&self, completion: Completion<InErr>) {
    let live = self.link.with(|link| match link.state {
      LinkState::Terminated | LinkState::Cancelled => false,
      _ => {
        link.state = LinkState::Terminated;
        link.subscription = None;
        true
      }
    });
    if live {
      self.buffer.complete(completion.map_err(|err| (self.transform_failure)(err)));
    }
  }

  /// Forwards downstream demand into the buffer and whatever it is owed to
  /// the upstream.
  pub fn demand(&self, requested: Demand) {
    let owed = self.buffer.demand(requested);
    self.request_upstream(owed);
  }

  /// Requests `demand` from the upstream directly, bypassing the buffer.
  pub fn request_upstream(&self, demand: Demand) {
    if demand.is_none() {
      return;
    }
    let upstream = self.link.with(|link| match link.state {
      LinkState::Waiting => {
        link.pending += demand;
        None
      }
      LinkState::Active => link.subscription.clone(),
      LinkState::Terminated | LinkState::Cancelled => None,
    });
    if let Some(upstream) = upstream {
      upstream.request(demand);
    }
  }

  /// Hands `subscription` to the downstream and requests what that makes
  /// the upstream owe.
  pub fn attach(&self, subscription: SubscriptionHandle) {
    let owed = self.buffer.attach(subscription);
    self.request_upstream(owed);
  }

  /// See [`DemandBuffer::assume_attached`].
  pub fn assume_attached(&self) {
    let owed = self.buffer.assume_attached();
    self.request_upstream(owed);
  }

  pub fn buffer(&self) -> &DemandBuffer<Out, Err, D> { &self.buffer }
}

impl<In, InErr, Out, Err, D> Sink<In, InErr, Out, Err, D> {
  /// Cancels and forgets the upstream subscription. Idempotent. Events the
  /// upstream still delivers afterwards are ignored.
  pub fn cancel_upstream(&self) {
    let upstream = self.link.with(|link| {
      if link.state == LinkState::Cancelled {
        return None;
      }
      link.state = LinkState::Cancelled;
      link.subscription.take()
    });
    if let Some(upstream) = upstream {
      trace!("cancelling upstream subscription");
      upstream.cancel();
    }
  }

  /// Cancels the upstream and drops everything queued for the downstream.
  pub fn cancel(&self) {
    self.cancel_upstream();
    self.buffer.cancel();
  }

  pub fn is_cancelled(&self) -> bool { self.link.lock().state == LinkState::Cancelled }

  fn is_live(&self) -> bool { matches!(self.link.lock().state, LinkState::Waiting | LinkState::Active) }
}

impl<T, E, D> Sink<T, E, T, E, D>
where
  T: 'static,
  E: 'static,
  D: Subscriber<T, E>,
{
  /// A sink that passes values and failures through unchanged.
  pub fn passthrough(downstream: D) -> Arc<Self> { Self::new(downstream, Some, |err| err) }
}

impl<In, InErr, Out, Err, D> Drop for Sink<In, InErr, Out, Err, D> {
  fn drop(&mut self) {
    if let Some(upstream) = self.link.get_mut().subscription.take() {
      upstream.cancel();
    }
  }
}

impl<In, InErr, Out, Err, D> fmt::Debug for Sink<In, InErr, Out, Err, D> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Sink")
      .field("state", &self.link.lock().state)
      .field("buffer", &self.buffer)
      .finish()
  }
}

/// A sink is also the subscription its downstream drives.
impl<In, InErr, Out, Err, D> Subscription for Sink<In, InErr, Out, Err, D>
where
  D: Subscriber<Out, Err> + Send,
  Out: Send,
  Err: Send,
{
  fn request(&self, demand: Demand) { self.demand(demand) }

  fn cancel(&self) { Sink::cancel(self) }
}

/// The subscriber a sink hands to its upstream.
pub struct SinkSubscriber<In, InErr, Out, Err, D>(Weak<Sink<In, InErr, Out, Err, D>>);

impl<In, InErr, Out, Err, D> SinkSubscriber<In, InErr, Out, Err, D> {
  pub fn new(sink: &Arc<Sink<In, InErr, Out, Err, D>>) -> Self { Self(Arc::downgrade(sink)) }
}

impl<In, InErr, Out, Err, D> Subscriber<In, InErr> for SinkSubscriber<In, InErr, Out, Err, D>
where
  D: Subscriber<Out, Err>,
{
  fn receive_subscription(&mut self, subscription: SubscriptionHandle) {
    match self.0.upgrade() {
      Some(sink) => sink.receive_subscription(subscription),
      None => subscription.cancel(),
    }
  }

  fn receive(&mut self, value: In) -> Demand { self.0.upgrade().map_or(Demand::none(), |sink| sink.receive(value)) }

  fn receive_completion(self, completion: Completion<InErr>) {
    if let Some(sink) = self.0.upgrade() {
      sink.receive_completion(completion);
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::testing::{TestPublisher, TestSubscriber};

  type TestSink = Sink<i32, &'static str, i32, &'static str, TestSubscriber<i32, &'static str>>;

  fn pipeline(sub: &TestSubscriber<i32, &'static str>) -> (TestPublisher<i32, &'static str>, Arc<TestSink>) {
    let upstream = TestPublisher::new();
    let sink = Sink::passthrough(sub.clone());
    sink.subscribe_to(upstream.clone());
    sink.attach(sink.clone());
    (upstream, sink)
  }

  #[test]
  fn demand_reaches_upstream() {
    let sub = TestSubscriber::new(Demand::max(2));
    let (upstream, _sink) = pipeline(&sub);
    assert_eq!(upstream.requested(), Demand::max(2));

    sub.request(Demand::max(3));
    assert_eq!(upstream.requested(), Demand::max(5));
  }

  #[test]
  fn demand_before_upstream_is_kept() {
    let sub = TestSubscriber::new(Demand::max(4));
    let sink: Arc<TestSink> = Sink::passthrough(sub.clone());
    sink.attach(sink.clone());

    let upstream = TestPublisher::new();
    sink.subscribe_to(upstream.clone());
    assert_eq!(upstream.requested(), Demand::max(4));
  }

  #[test]
  fn values_are_buffered_until_requested() {
    let sub = TestSubscriber::new(Demand::max(1));
    let (upstream, _sink) = pipeline(&sub);
    upstream.send(1);
    upstream.send(2);
    upstream.send(3);
    assert_eq!(sub.values(), vec![1]);

    sub.request(Demand::max(5));
    assert_eq!(sub.values(), vec![1, 2, 3]);
  }

  #[test]
  fn transforms_apply_once() {
    let sub = TestSubscriber::new(Demand::unlimited());
    let upstream = TestPublisher::<i32, &'static str>::new();
    let sink = Sink::connect(
      upstream.clone(),
      sub.clone(),
      |v: i32| if v % 2 == 0 { Some(v * 10) } else { None },
      |err: &'static str| if err == "io" { "mapped" } else { err },
    );
    sink.attach(sink.clone());

    assert_eq!(upstream.send(1), Demand::max(1));
    upstream.send(2);
    upstream.send(4);
    upstream.send_completion(Completion::Failed("io"));
    assert_eq!(sub.values(), vec![20, 40]);
    assert_eq!(sub.completion(), Some(Completion::Failed("mapped")));
  }

  #[test]
  fn events_after_completion_are_ignored() {
    let sub = TestSubscriber::new(Demand::unlimited());
    let sink: Arc<TestSink> = Sink::passthrough(sub.clone());
    sink.attach(sink.clone());
    sink.receive(1);
    sink.receive_completion(Completion::Finished);
    assert_eq!(sink.receive(2), Demand::none());
    sink.receive_completion(Completion::Failed("late"));
    assert_eq!(sub.values(), vec![1]);
    assert_eq!(sub.completions(), 1);
  }

  #[test]
  fn cancel_upstream_is_idempotent() {
    let sub = TestSubscriber::new(Demand::max(1));
    let (upstream, sink) = pipeline(&sub);
    sink.cancel_upstream();
    sink.cancel_upstream();
    assert_eq!(upstream.cancels(), 1);
    assert!(sink.is_cancelled());
    assert_eq!(sink.receive(1), Demand::none());
    assert!(sub.values().is_empty());
  }

  #[test]
  fn downstream_cancel_stops_delivery() {
    let sub = TestSubscriber::new(Demand::unlimited());
    let (upstream, _sink) = pipeline(&sub);
    upstream.send(1);
    sub.cancel();
    sub.cancel();
    upstream.send(2);
    assert_eq!(sub.values(), vec![1]);
    assert_eq!(upstream.cancels(), 1);
  }

  #[test]
  fn cancel_inside_receive() {
    let sub = TestSubscriber::new(Demand::unlimited()).with_cancel_after(1);
    let (upstream, sink) = pipeline(&sub);
    assert_eq!(upstream.send(1), Demand::none());
    assert_eq!(upstream.send(2), Demand::none());
    upstream.send_completion(Completion::Finished);
    assert_eq!(sub.values(), vec![1]);
    assert_eq!(sub.completion(), None);
    assert_eq!(upstream.cancels(), 1);
    assert!(sink.is_cancelled());
  }

  #[test]
  fn cancel_inside_receive_drops_queued_values() {
    let sub = TestSubscriber::new(Demand::none()).with_cancel_after(1);
    let (upstream, sink) = pipeline(&sub);
    for v in 1..=3 {
      upstream.send(v);
    }
    assert_eq!(sink.buffer().len(), 3);

    sub.request(Demand::max(3));
    assert_eq!(sub.values(), vec![1]);
    assert!(sink.buffer().is_empty());
    assert_eq!(upstream.cancels(), 1);
  }

  #[test]
  fn late_subscription_after_cancel_is_cancelled() {
    let sub = TestSubscriber::new(Demand::max(1));
    let sink: Arc<TestSink> = Sink::passthrough(sub);
    sink.cancel();

    let upstream = TestPublisher::new();
    sink.subscribe_to(upstream.clone());
    assert_eq!(upstream.cancels(), 1);
  }

  #[test]
  fn dropping_the_sink_cancels_upstream() {
    let upstream = TestPublisher::<i32, &'static str>::new();
    {
      let sink: Arc<TestSink> = Sink::passthrough(TestSubscriber::new(Demand::none()));
      sink.subscribe_to(upstream.clone());
    }
    assert_eq!(upstream.cancels(), 1);
    assert_eq!(upstream.send(1), Demand::none());
  }
}
