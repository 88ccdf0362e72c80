use std::sync::{Arc, Weak};

use crate::{
  completion::Completion,
  demand::Demand,
  lock::Lock,
  publisher::Publisher,
  sink::Sink,
  subscriber::Subscriber,
  subscription::{Subscription, SubscriptionHandle},
};

/// Created by
/// [`PublisherExt::with_latest_from`](crate::publisher::PublisherExt::with_latest_from).
///
/// The second publisher is subscribed first, with unlimited demand; only its
/// most recent value is kept. Values of the source that arrive before the
/// second publisher produced anything are dropped and their demand handed
/// back to the source. The second publisher finishing changes nothing, its
/// failure fails the whole operator.
#[derive(Clone)]
pub struct WithLatestFrom<A, B> {
  source: A,
  other: B,
}

impl<A, B> WithLatestFrom<A, B> {
  pub(crate) fn new(source: A, other: B) -> Self { Self { source, other } }
}

struct OtherLink {
  subscription: Option<SubscriptionHandle>,
  closed: bool,
}

type TriggerSink<A, B, Err, S> = Sink<A, Err, (A, B), Err, S>;

struct Latest<A, B, Err, S> {
  trigger: Arc<TriggerSink<A, B, Err, S>>,
  other: Lock<OtherLink>,
}

impl<A, B, Err, S> Latest<A, B, Err, S> {
  fn close_other(&self) {
    let subscription = self.other.with(|link| {
      link.closed = true;
      link.subscription.take()
    });
    if let Some(subscription) = subscription {
      subscription.cancel();
    }
  }
}

impl<A, B, Err, S> Drop for Latest<A, B, Err, S> {
  fn drop(&mut self) { self.close_other() }
}

impl<A, B, Err, S> Subscription for Latest<A, B, Err, S>
where
  A: Send,
  B: Send,
  Err: Send,
  S: Subscriber<(A, B), Err> + Send,
{
  fn request(&self, demand: Demand) { self.trigger.demand(demand) }

  fn cancel(&self) {
    self.trigger.cancel();
    self.close_other();
  }
}

struct OtherSubscriber<A, B, Err, S> {
  core: Weak<Latest<A, B, Err, S>>,
  latest: Arc<Lock<Option<B>>>,
}

impl<A, B, Err, S> Subscriber<B, Err> for OtherSubscriber<A, B, Err, S>
where
  S: Subscriber<(A, B), Err>,
{
  fn receive_subscription(&mut self, subscription: SubscriptionHandle) {
    let accepted = self.core.upgrade().is_some_and(|core| {
      core.other.with(|link| {
        if link.closed || link.subscription.is_some() {
          return false;
        }
        link.subscription = Some(subscription.clone());
        true
      })
    });
    if accepted {
      subscription.request(Demand::unlimited());
    } else {
      subscription.cancel();
    }
  }

  fn receive(&mut self, value: B) -> Demand {
    *self.latest.lock() = Some(value);
    Demand::none()
  }

  fn receive_completion(self, completion: Completion<Err>) {
    let Some(core) = self.core.upgrade() else {
      return;
    };
    core.other.with(|link| {
      link.closed = true;
      link.subscription = None;
    });
    if let Completion::Failed(err) = completion {
      core.trigger.cancel_upstream();
      core.trigger.buffer().complete(Completion::Failed(err));
    }
  }
}

/// Forwards the source into the trigger sink and releases the second
/// publisher once the source terminates.
struct TriggerSubscriber<A, B, Err, S>(Weak<Latest<A, B, Err, S>>);

impl<A, B, Err, S> Subscriber<A, Err> for TriggerSubscriber<A, B, Err, S>
where
  S: Subscriber<(A, B), Err>,
{
  fn receive_subscription(&mut self, subscription: SubscriptionHandle) {
    match self.0.upgrade() {
      Some(core) => core.trigger.receive_subscription(subscription),
      None => subscription.cancel(),
    }
  }

  fn receive(&mut self, value: A) -> Demand {
    self
      .0
      .upgrade()
      .map_or(Demand::none(), |core| core.trigger.receive(value))
  }

  fn receive_completion(self, completion: Completion<Err>) {
    if let Some(core) = self.0.upgrade() {
      core.close_other();
      core.trigger.receive_completion(completion);
    }
  }
}

impl<PA, PB> Publisher for WithLatestFrom<PA, PB>
where
  PA: Publisher,
  PB: Publisher<Err = PA::Err>,
  PA::Item: Send + 'static,
  PB::Item: Clone + Send + 'static,
  PA::Err: Send + 'static,
{
  type Item = (PA::Item, PB::Item);
  type Err = PA::Err;

  fn subscribe<S>(self, subscriber: S)
  where
    S: Subscriber<Self::Item, PA::Err> + Send + 'static,
  {
    let latest = Arc::new(Lock::new(None::<PB::Item>));
    let current = latest.clone();
    let trigger = Sink::new(
      subscriber,
      move |value: PA::Item| current.lock().clone().map(|other| (value, other)),
      |err| err,
    );
    let core = Arc::new(Latest {
      trigger,
      other: Lock::new(OtherLink { subscription: None, closed: false }),
    });

    self.other.subscribe(OtherSubscriber { core: Arc::downgrade(&core), latest });
    self.source.subscribe(TriggerSubscriber(Arc::downgrade(&core)));
    core.trigger.attach(core.clone());
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::{
    publisher::{from_iter, Publisher, PublisherExt},
    testing::{TestPublisher, TestSubscriber},
  };

  type Source = TestPublisher<i32, &'static str>;

  fn gate(demand: Demand) -> (Source, Source, TestSubscriber<(i32, i32), &'static str>) {
    let (a, b) = (Source::new(), Source::new());
    let sub = TestSubscriber::new(demand);
    a.clone().with_latest_from(b.clone()).subscribe(sub.clone());
    (a, b, sub)
  }

  #[test]
  fn pairs_with_latest() {
    let (a, b, sub) = gate(Demand::unlimited());
    b.send(10);
    a.send(1);
    b.send(20);
    b.send(30);
    a.send(2);
    assert_eq!(sub.values(), vec![(1, 10), (2, 30)]);
  }

  #[test]
  fn source_before_other_is_dropped() {
    let (a, b, sub) = gate(Demand::max(2));
    assert_eq!(a.requested(), Demand::max(2));
    assert_eq!(b.requested(), Demand::unlimited());

    a.send(1);
    assert!(sub.values().is_empty());
    assert_eq!(a.requested(), Demand::max(3));
    b.send(5);
    a.send(2);
    assert_eq!(sub.values(), vec![(2, 5)]);
  }

  #[test]
  fn other_is_subscribed_first() {
    let sub = TestSubscriber::<(char, i32), ()>::new(Demand::unlimited());
    from_iter(vec!['a', 'b'])
      .with_latest_from(from_iter(vec![1, 2, 3]))
      .subscribe(sub.clone());
    assert_eq!(sub.values(), vec![('a', 3), ('b', 3)]);
    assert!(sub.is_finished());
  }

  #[test]
  fn other_finishing_is_ignored() {
    let (a, b, sub) = gate(Demand::unlimited());
    b.send(1);
    b.send_completion(Completion::Finished);
    a.send(7);
    assert_eq!(sub.values(), vec![(7, 1)]);
    assert_eq!(sub.completion(), None);
  }

  #[test]
  fn other_failure_fails_and_cancels_source() {
    let (a, b, sub) = gate(Demand::unlimited());
    b.send(1);
    b.send_completion(Completion::Failed("other"));
    assert!(a.is_cancelled());
    a.send(2);
    assert!(sub.values().is_empty());
    assert_eq!(sub.completion(), Some(Completion::Failed("other")));
  }

  #[test]
  fn source_finishing_cancels_other() {
    let (a, b, sub) = gate(Demand::unlimited());
    a.send_completion(Completion::Finished);
    assert!(b.is_cancelled());
    assert!(sub.is_finished());
  }

  #[test]
  fn cancel_reaches_both_once() {
    let (a, b, sub) = gate(Demand::unlimited());
    sub.cancel();
    sub.cancel();
    assert_eq!(a.cancels(), 1);
    assert_eq!(b.cancels(), 1);
  }

  #[test]
  fn each_source_subscribed_once() {
    let (a, b, _sub) = gate(Demand::unlimited());
    assert_eq!(a.subscriptions(), 1);
    assert_eq!(b.subscriptions(), 1);
  }
}
