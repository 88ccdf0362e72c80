//! Race two publishers: the first to produce an event wins.
//!
//! Both sides run through their own [`Sink`], sharing one downstream. Before
//! the race is decided each side is granted a single value directly, and the
//! downstream's demand is held back; the winner then receives that demand
//! and the loser is cancelled.

use std::{
  mem,
  sync::{Arc, Weak},
};

use tracing::trace;

use crate::{
  completion::Completion,
  demand::Demand,
  lock::{Lock, MutArc},
  publisher::{empty, BoxedPublisher, Publisher, PublisherExt},
  sink::Sink,
  subscriber::Subscriber,
  subscription::{Subscription, SubscriptionHandle},
};

/// Created by [`PublisherExt::amb`].
#[derive(Clone)]
pub struct Amb<A, B> {
  a: A,
  b: B,
}

impl<A, B> Amb<A, B> {
  pub(crate) fn new(a: A, b: B) -> Self { Self { a, b } }
}

/// Races any number of publishers, combined as a balanced tree of pairwise
/// races so an event crosses at most `log2(n)` levels. No publishers at all
/// gives a publisher that finishes immediately.
pub fn amb_all<Item, Err, I>(publishers: I) -> BoxedPublisher<Item, Err>
where
  I: IntoIterator<Item = BoxedPublisher<Item, Err>>,
  Item: Send + 'static,
  Err: Send + 'static,
{
  fn build<Item, Err>(mut list: Vec<BoxedPublisher<Item, Err>>) -> BoxedPublisher<Item, Err>
  where
    Item: Send + 'static,
    Err: Send + 'static,
  {
    if list.len() <= 1 {
      return list.pop().unwrap_or_else(|| empty().boxed());
    }
    let right = list.split_off(list.len() / 2);
    Amb::new(build(list), build(right)).boxed()
  }
  build(publishers.into_iter().collect())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
  Left,
  Right,
}

impl Side {
  fn other(self) -> Side {
    match self {
      Side::Left => Side::Right,
      Side::Right => Side::Left,
    }
  }
}

type SideSink<Item, Err, S> = Sink<Item, Err, Item, Err, MutArc<Option<S>>>;

struct RaceState<Item, Err, S> {
  decision: Option<Side>,
  /// Downstream demand received before the decision.
  held: Demand,
  /// The winner already used the unit granted to every contender, so the
  /// first demand forwarded to it is one unit short.
  credit: bool,
  left: Option<Arc<SideSink<Item, Err, S>>>,
  right: Option<Arc<SideSink<Item, Err, S>>>,
}

impl<Item, Err, S> RaceState<Item, Err, S> {
  fn slot(&mut self, side: Side) -> &mut Option<Arc<SideSink<Item, Err, S>>> {
    match side {
      Side::Left => &mut self.left,
      Side::Right => &mut self.right,
    }
  }
}

struct Race<Item, Err, S> {
  state: Lock<RaceState<Item, Err, S>>,
}

impl<Item, Err, S> Race<Item, Err, S>
where
  S: Subscriber<Item, Err>,
{
  fn sink(&self, side: Side) -> Option<Arc<SideSink<Item, Err, S>>> { self.state.lock().slot(side).clone() }

  /// Settles the race in favour of `side` unless it is already settled.
  /// Returns whether `side` is the winner.
  fn decide(&self, side: Side) -> bool {
    let outcome = self.state.with(|st| match st.decision {
      Some(winner) => Err(winner == side),
      None => {
        st.decision = Some(side);
        st.credit = true;
        let loser = st.slot(side.other()).take();
        let winner = st.slot(side).clone();
        Ok((loser, winner, mem::take(&mut st.held)))
      }
    });
    match outcome {
      Err(won) => won,
      Ok((loser, winner, held)) => {
        trace!(?side, "race decided");
        if let Some(loser) = loser {
          loser.cancel();
        }
        if let (Some(winner), true) = (winner, held.has_demand()) {
          self.forward(&winner, held);
        }
        true
      }
    }
  }

  fn forward(&self, winner: &SideSink<Item, Err, S>, demand: Demand) {
    let owed = winner.buffer().demand(demand);
    if owed.has_demand() && self.state.with(|st| mem::take(&mut st.credit)) {
      winner.request_upstream(owed - 1);
    } else {
      winner.request_upstream(owed);
    }
  }
}

impl<Item, Err, S> Subscription for Race<Item, Err, S>
where
  Item: Send,
  Err: Send,
  S: Subscriber<Item, Err> + Send,
{
  fn request(&self, demand: Demand) {
    let winner = self.state.with(|st| match st.decision {
      Some(side) => st.slot(side).clone(),
      None => {
        st.held += demand;
        None
      }
    });
    if let Some(winner) = winner {
      self.forward(&winner, demand);
    }
  }

  fn cancel(&self) {
    let (left, right) = self.state.with(|st| (st.left.take(), st.right.take()));
    for sink in [left, right].into_iter().flatten() {
      sink.cancel();
    }
  }
}

/// Subscriber for one side of the race.
struct Contender<Item, Err, S> {
  race: Weak<Race<Item, Err, S>>,
  side: Side,
}

impl<Item, Err, S> Subscriber<Item, Err> for Contender<Item, Err, S>
where
  S: Subscriber<Item, Err>,
{
  fn receive_subscription(&mut self, subscription: SubscriptionHandle) {
    match self.race.upgrade().and_then(|race| race.sink(self.side)) {
      Some(sink) => {
        sink.receive_subscription(subscription);
        sink.request_upstream(Demand::max(1));
      }
      None => subscription.cancel(),
    }
  }

  fn receive(&mut self, value: Item) -> Demand {
    let Some(race) = self.race.upgrade() else {
      return Demand::none();
    };
    if !race.decide(self.side) {
      return Demand::none();
    }
    race
      .sink(self.side)
      .map_or(Demand::none(), |sink| sink.receive(value))
  }

  fn receive_completion(self, completion: Completion<Err>) {
    let Some(race) = self.race.upgrade() else {
      return;
    };
    if race.decide(self.side) {
      if let Some(sink) = race.sink(self.side) {
        sink.receive_completion(completion);
      }
    }
  }
}

impl<A, B> Publisher for Amb<A, B>
where
  A: Publisher,
  B: Publisher<Item = A::Item, Err = A::Err>,
  A::Item: Send + 'static,
  A::Err: Send + 'static,
{
  type Item = A::Item;
  type Err = A::Err;

  fn subscribe<S>(self, subscriber: S)
  where
    S: Subscriber<A::Item, A::Err> + Send + 'static,
  {
    let mut downstream = MutArc::own(Some(subscriber));
    let left = Sink::passthrough(downstream.clone());
    let right = Sink::passthrough(downstream.clone());
    let race = Arc::new(Race {
      state: Lock::new(RaceState {
        decision: None,
        held: Demand::none(),
        credit: false,
        left: Some(left.clone()),
        right: Some(right.clone()),
      }),
    });

    // The downstream shares one subscription for both sides, so the sinks'
    // buffers only need to be marked as attached.
    downstream.receive_subscription(race.clone());
    left.assume_attached();
    right.assume_attached();

    self.a.subscribe(Contender { race: Arc::downgrade(&race), side: Side::Left });
    self.b.subscribe(Contender { race: Arc::downgrade(&race), side: Side::Right });
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::{
    publisher::{fail, from_iter, never},
    testing::{TestPublisher, TestSubscriber},
  };

  type Source = TestPublisher<i32, &'static str>;

  fn race(demand: Demand) -> (Source, Source, TestSubscriber<i32, &'static str>) {
    let (a, b) = (Source::new(), Source::new());
    let sub = TestSubscriber::new(demand);
    a.clone().amb(b.clone()).subscribe(sub.clone());
    (a, b, sub)
  }

  #[test]
  fn first_value_wins() {
    let (a, b, sub) = race(Demand::unlimited());
    a.send(1);
    b.send(2);
    a.send(3);
    assert_eq!(sub.values(), vec![1, 3]);
    assert!(b.is_cancelled());
    assert!(!a.is_cancelled());
  }

  #[test]
  fn right_side_can_win() {
    let (a, b, sub) = race(Demand::unlimited());
    b.send(7);
    a.send(1);
    assert_eq!(sub.values(), vec![7]);
    assert!(a.is_cancelled());
  }

  #[test]
  fn each_side_is_granted_one_before_decision() {
    let (a, b, _sub) = race(Demand::none());
    assert_eq!(a.requested(), Demand::max(1));
    assert_eq!(b.requested(), Demand::max(1));
  }

  #[test]
  fn held_demand_goes_to_winner() {
    let (a, b, sub) = race(Demand::max(3));
    a.send(1);
    assert_eq!(a.requested(), Demand::max(3));
    assert_eq!(b.requested(), Demand::max(1));
    a.send(2);
    a.send(3);
    a.send(4);
    assert_eq!(sub.values(), vec![1, 2, 3]);

    sub.request(Demand::max(1));
    assert_eq!(sub.values(), vec![1, 2, 3, 4]);
  }

  #[test]
  fn winner_is_not_asked_for_more_than_downstream_wants() {
    let (a, _b, sub) = race(Demand::none());
    a.send(1);
    assert_eq!(a.requested(), Demand::max(1));

    sub.request(Demand::max(2));
    assert_eq!(sub.values(), vec![1]);
    assert_eq!(a.requested(), Demand::max(2));
    sub.request(Demand::max(1));
    assert_eq!(a.requested(), Demand::max(3));
  }

  #[test]
  fn terminal_event_decides() {
    let (a, b, sub) = race(Demand::unlimited());
    b.send_completion(Completion::Failed("b"));
    a.send(1);
    assert!(sub.values().is_empty());
    assert_eq!(sub.completion(), Some(Completion::Failed("b")));
    assert!(a.is_cancelled());
  }

  #[test]
  fn winner_completion_reaches_downstream_once() {
    let (a, b, sub) = race(Demand::unlimited());
    a.send(1);
    a.send_completion(Completion::Finished);
    b.send_completion(Completion::Failed("late"));
    assert_eq!(sub.completions(), 1);
    assert!(sub.is_finished());
  }

  #[test]
  fn cancel_stops_both() {
    let (a, b, sub) = race(Demand::unlimited());
    sub.cancel();
    sub.cancel();
    assert_eq!(a.cancels(), 1);
    assert_eq!(b.cancels(), 1);
  }

  #[test]
  fn cancel_inside_receive() {
    let (a, b) = (Source::new(), Source::new());
    let sub = TestSubscriber::new(Demand::unlimited()).with_cancel_after(1);
    a.clone().amb(b.clone()).map(|v| v * 10).subscribe(sub.clone());

    a.send(1);
    a.send(2);
    b.send(3);
    assert_eq!(sub.values(), vec![10]);
    assert_eq!(sub.completion(), None);
    assert_eq!(a.cancels(), 1);
    assert_eq!(b.cancels(), 1);
  }

  #[test]
  fn synchronous_sources() {
    let sub = TestSubscriber::new(Demand::unlimited());
    from_iter::<_, &str>(vec![1, 2])
      .amb(fail("never seen"))
      .subscribe(sub.clone());
    assert_eq!(sub.values(), vec![1, 2]);
    assert!(sub.is_finished());
  }

  #[test]
  fn race_of_many() {
    let sources: Vec<Source> = (0..5).map(|_| Source::new()).collect();
    let sub = TestSubscriber::new(Demand::unlimited());
    amb_all(sources.iter().cloned().map(|s| s.boxed())).subscribe(sub.clone());

    sources[3].send(30);
    for (i, s) in sources.iter().enumerate() {
      s.send(i as i32);
    }
    assert_eq!(sub.values(), vec![30, 3]);
    for (i, s) in sources.iter().enumerate() {
      assert_eq!(s.is_cancelled(), i != 3, "source {i}");
    }
  }

  #[test]
  fn race_of_none_finishes() {
    let sub = TestSubscriber::<i32, ()>::new(Demand::unlimited());
    amb_all(Vec::new()).subscribe(sub.clone());
    assert!(sub.is_finished());
  }

  #[test]
  fn never_loses_to_a_live_source() {
    let sub = TestSubscriber::<i32, ()>::new(Demand::max(1));
    amb_all(vec![never().boxed(), from_iter(vec![4, 5]).boxed()]).subscribe(sub.clone());
    assert_eq!(sub.values(), vec![4]);
  }
}
