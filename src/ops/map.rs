use crate::{publisher::Publisher, sink::Sink, subscriber::Subscriber};

/// Created by [`PublisherExt::map`](crate::publisher::PublisherExt::map).
#[derive(Clone)]
pub struct Map<P, F> {
  source: P,
  f: F,
}

impl<P, F> Map<P, F> {
  pub(crate) fn new(source: P, f: F) -> Self { Self { source, f } }
}

/// Created by
/// [`PublisherExt::filter_map`](crate::publisher::PublisherExt::filter_map).
#[derive(Clone)]
pub struct FilterMap<P, F> {
  source: P,
  f: F,
}

impl<P, F> FilterMap<P, F> {
  pub(crate) fn new(source: P, f: F) -> Self { Self { source, f } }
}

/// Created by [`PublisherExt::map_err`](crate::publisher::PublisherExt::map_err).
#[derive(Clone)]
pub struct MapErr<P, F> {
  source: P,
  f: F,
}

impl<P, F> MapErr<P, F> {
  pub(crate) fn new(source: P, f: F) -> Self { Self { source, f } }
}

impl<P, F, Out> Publisher for Map<P, F>
where
  P: Publisher,
  P::Item: 'static,
  P::Err: Send + 'static,
  F: Fn(P::Item) -> Out + Send + Sync + 'static,
  Out: Send + 'static,
{
  type Item = Out;
  type Err = P::Err;

  fn subscribe<S>(self, subscriber: S)
  where
    S: Subscriber<Out, P::Err> + Send + 'static,
  {
    let f = self.f;
    let sink = Sink::new(subscriber, move |v| Some(f(v)), |err| err);
    sink.subscribe_to(self.source);
    sink.attach(sink.clone());
  }
}

impl<P, F, Out> Publisher for FilterMap<P, F>
where
  P: Publisher,
  P::Item: 'static,
  P::Err: Send + 'static,
  F: Fn(P::Item) -> Option<Out> + Send + Sync + 'static,
  Out: Send + 'static,
{
  type Item = Out;
  type Err = P::Err;

  fn subscribe<S>(self, subscriber: S)
  where
    S: Subscriber<Out, P::Err> + Send + 'static,
  {
    let sink = Sink::new(subscriber, self.f, |err| err);
    sink.subscribe_to(self.source);
    sink.attach(sink.clone());
  }
}

impl<P, F, E2> Publisher for MapErr<P, F>
where
  P: Publisher,
  P::Item: Send + 'static,
  P::Err: 'static,
  F: Fn(P::Err) -> E2 + Send + Sync + 'static,
  E2: Send + 'static,
{
  type Item = P::Item;
  type Err = E2;

  fn subscribe<S>(self, subscriber: S)
  where
    S: Subscriber<P::Item, E2> + Send + 'static,
  {
    let sink = Sink::new(subscriber, Some, self.f);
    sink.subscribe_to(self.source);
    sink.attach(sink.clone());
  }
}

#[cfg(test)]
mod test {
  use crate::{
    completion::Completion,
    demand::Demand,
    publisher::{fail, from_iter, Publisher, PublisherExt},
    testing::{TestPublisher, TestSubscriber},
  };

  #[test]
  fn map_values() {
    let sub = TestSubscriber::new(Demand::unlimited());
    from_iter::<_, ()>(1..=3).map(|v| v * 2).subscribe(sub.clone());
    assert_eq!(sub.values(), vec![2, 4, 6]);
    assert!(sub.is_finished());
  }

  #[test]
  fn map_respects_demand() {
    let sub = TestSubscriber::new(Demand::max(2));
    from_iter::<_, ()>(0..).map(|v| v + 1).subscribe(sub.clone());
    assert_eq!(sub.values(), vec![1, 2]);
    sub.request(Demand::max(1));
    assert_eq!(sub.values(), vec![1, 2, 3]);
  }

  #[test]
  fn filter_map_keeps_demand_flowing() {
    let source = TestPublisher::<i32, ()>::new();
    let sub = TestSubscriber::new(Demand::max(2));
    source
      .clone()
      .filter_map(|v| (v % 3 == 0).then_some(v))
      .subscribe(sub.clone());
    for v in 1..=6 {
      source.send(v);
    }
    assert_eq!(sub.values(), vec![3, 6]);
    // Four dropped values each handed their unit of demand back.
    assert_eq!(source.requested(), Demand::max(6));
  }

  #[test]
  fn filter_map_over_iterator() {
    let sub = TestSubscriber::new(Demand::max(3));
    from_iter::<_, ()>(0..)
      .filter_map(|v| (v % 2 == 1).then_some(v))
      .subscribe(sub.clone());
    assert_eq!(sub.values(), vec![1, 3, 5]);
  }

  #[test]
  fn map_err_maps_failure() {
    let sub = TestSubscriber::<i32, String>::new(Demand::unlimited());
    fail("io").map_err(|e: &str| format!("wrapped {e}")).subscribe(sub.clone());
    assert_eq!(sub.completion(), Some(Completion::Failed("wrapped io".to_string())));
  }

  #[test]
  fn cancel_reaches_source() {
    let source = TestPublisher::<i32, ()>::new();
    let sub = TestSubscriber::new(Demand::unlimited());
    source.clone().map(|v| v).subscribe(sub.clone());
    source.send(1);
    sub.cancel();
    source.send(2);
    assert_eq!(sub.values(), vec![1]);
    assert_eq!(source.cancels(), 1);
  }
}
