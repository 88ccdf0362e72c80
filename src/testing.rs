//! Helpers for testing publishers and operators.
//!
//! [`TestSubscriber`] records what it receives and lets a test script its
//! demand. [`TestPublisher`] is driven by hand and records the demand and
//! cancellation it sees.

use std::sync::Arc;

use crate::{
  completion::Completion,
  demand::Demand,
  demand_buffer::DemandBuffer,
  lock::{Lock, MutArc},
  publisher::Publisher,
  subscriber::{BoxedSubscriber, Subscriber, SubscriberId},
  subscription::{Subscription, SubscriptionHandle},
};

// ============================================================================
// TestSubscriber
// ============================================================================

struct Record<Item, Err> {
  values: Vec<Item>,
  completion: Option<Completion<Err>>,
  completions: usize,
  subscriptions: usize,
  subscription: Option<SubscriptionHandle>,
}

#[derive(Clone, Copy)]
struct Script {
  initial: Demand,
  per_value: Demand,
  reentrant: Demand,
  cancel_after: Option<usize>,
}

/// A subscriber that records every event.
///
/// Clones share the same record and the same [`SubscriberId`], so a test can
/// keep one clone and hand the other to a publisher.
pub struct TestSubscriber<Item, Err> {
  record: MutArc<Record<Item, Err>>,
  script: Script,
  id: SubscriberId,
}

impl<Item, Err> Clone for TestSubscriber<Item, Err> {
  fn clone(&self) -> Self { Self { record: self.record.clone(), script: self.script, id: self.id.clone() } }
}

impl<Item, Err> TestSubscriber<Item, Err> {
  /// Requests `initial` as soon as the subscription arrives.
  pub fn new(initial: Demand) -> Self {
    Self {
      record: MutArc::own(Record {
        values: vec![],
        completion: None,
        completions: 0,
        subscriptions: 0,
        subscription: None,
      }),
      script: Script { initial, per_value: Demand::none(), reentrant: Demand::none(), cancel_after: None },
      id: SubscriberId::new(),
    }
  }

  /// Demand returned from every `receive`.
  pub fn with_demand_per_value(mut self, demand: Demand) -> Self {
    self.script.per_value = demand;
    self
  }

  /// Demand requested through the subscription from inside every `receive`.
  pub fn with_reentrant_request(mut self, demand: Demand) -> Self {
    self.script.reentrant = demand;
    self
  }

  /// Cancels twice from inside `receive` once `count` values arrived.
  pub fn with_cancel_after(mut self, count: usize) -> Self {
    self.script.cancel_after = Some(count);
    self
  }

  /// A subscriber with an empty record of its own but the same identity.
  pub fn with_same_identity(&self) -> Self {
    Self { record: TestSubscriber::new(self.script.initial).record, script: self.script, id: self.id.clone() }
  }

  pub fn id(&self) -> SubscriberId { self.id.clone() }

  pub fn values(&self) -> Vec<Item>
  where
    Item: Clone,
  {
    self.record.lock().values.clone()
  }

  pub fn completion(&self) -> Option<Completion<Err>>
  where
    Err: Clone,
  {
    self.record.lock().completion.clone()
  }

  pub fn completions(&self) -> usize { self.record.lock().completions }

  pub fn subscriptions(&self) -> usize { self.record.lock().subscriptions }

  pub fn is_finished(&self) -> bool { matches!(self.record.lock().completion, Some(Completion::Finished)) }

  /// Requests `demand` through the received subscription.
  pub fn request(&self, demand: Demand) {
    let subscription = self.record.lock().subscription.clone();
    if let Some(subscription) = subscription {
      subscription.request(demand);
    }
  }

  /// Cancels the received subscription. The handle is kept, so calling this
  /// again cancels it again.
  pub fn cancel(&self) {
    let subscription = self.record.lock().subscription.clone();
    if let Some(subscription) = subscription {
      subscription.cancel();
    }
  }
}

impl<Item, Err> Subscriber<Item, Err> for TestSubscriber<Item, Err> {
  fn receive_subscription(&mut self, subscription: SubscriptionHandle) {
    self.record.with(|r| {
      r.subscriptions += 1;
      r.subscription = Some(subscription.clone());
    });
    if self.script.initial.has_demand() {
      subscription.request(self.script.initial);
    }
  }

  fn receive(&mut self, value: Item) -> Demand {
    let received = self.record.with(|r| {
      r.values.push(value);
      r.values.len()
    });
    if self.script.cancel_after == Some(received) {
      self.cancel();
      self.cancel();
      return Demand::none();
    }
    if self.script.reentrant.has_demand() {
      self.request(self.script.reentrant);
    }
    self.script.per_value
  }

  fn receive_completion(self, completion: Completion<Err>) {
    let subscription = self.record.with(|r| {
      r.completions += 1;
      r.completion.get_or_insert(completion);
      r.subscription.take()
    });
    drop(subscription);
  }

  fn identity(&self) -> Option<SubscriberId> { Some(self.id.clone()) }
}

// ============================================================================
// TestPublisher
// ============================================================================

struct PublisherState<Item, Err> {
  subscriber: Option<BoxedSubscriber<Item, Err>>,
  requested: Demand,
  cancels: usize,
  subscriptions: usize,
}

/// A publisher driven by hand. It accepts one subscriber at a time and
/// ignores demand: [`send`](TestPublisher::send) always delivers.
pub struct TestPublisher<Item, Err>(Arc<Lock<PublisherState<Item, Err>>>);

impl<Item, Err> Clone for TestPublisher<Item, Err> {
  fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<Item, Err> Default for TestPublisher<Item, Err> {
  fn default() -> Self {
    Self(Arc::new(Lock::new(PublisherState {
      subscriber: None,
      requested: Demand::none(),
      cancels: 0,
      subscriptions: 0,
    })))
  }
}

struct TestPublisherSubscription<Item, Err>(Arc<Lock<PublisherState<Item, Err>>>);

impl<Item, Err> Subscription for TestPublisherSubscription<Item, Err>
where
  Item: Send,
  Err: Send,
{
  fn request(&self, demand: Demand) { self.0.with(|st| st.requested += demand) }

  fn cancel(&self) {
    let subscriber = self.0.with(|st| {
      st.cancels += 1;
      st.subscriber.take()
    });
    drop(subscriber);
  }
}

impl<Item, Err> TestPublisher<Item, Err> {
  pub fn new() -> Self { Self::default() }

  /// Total demand requested by subscribers.
  pub fn requested(&self) -> Demand { self.0.lock().requested }

  /// How many times `cancel` was called on a subscription.
  pub fn cancels(&self) -> usize { self.0.lock().cancels }

  pub fn is_cancelled(&self) -> bool { self.cancels() > 0 }

  pub fn subscriptions(&self) -> usize { self.0.lock().subscriptions }

  pub fn has_subscriber(&self) -> bool { self.0.lock().subscriber.is_some() }

  /// Delivers `value` to the current subscriber, returning its demand.
  pub fn send(&self, value: Item) -> Demand {
    let subscriber = self.0.lock().subscriber.take();
    match subscriber {
      Some(mut subscriber) => {
        let demand = subscriber.receive(value);
        self.0.with(|st| {
          if st.cancels == 0 {
            st.requested += demand;
            st.subscriber = Some(subscriber);
          }
        });
        demand
      }
      None => Demand::none(),
    }
  }

  pub fn send_completion(&self, completion: Completion<Err>) {
    let subscriber = self.0.lock().subscriber.take();
    if let Some(subscriber) = subscriber {
      subscriber.receive_completion(completion);
    }
  }
}

impl<Item, Err> Publisher for TestPublisher<Item, Err>
where
  Item: Send + 'static,
  Err: Send + 'static,
{
  type Item = Item;
  type Err = Err;

  fn subscribe<S>(self, subscriber: S)
  where
    S: Subscriber<Item, Err> + Send + 'static,
  {
    let mut subscriber: BoxedSubscriber<Item, Err> = Box::new(subscriber);
    self.0.with(|st| {
      st.subscriptions += 1;
      st.cancels = 0;
    });
    subscriber.receive_subscription(Arc::new(TestPublisherSubscription(self.0.clone())));
    self.0.with(|st| {
      if st.cancels == 0 {
        st.subscriber = Some(subscriber);
      }
    });
  }
}

// ============================================================================
// BufferSubscription
// ============================================================================

/// Routes a downstream's requests straight into a [`DemandBuffer`], for
/// driving a buffer without an operator around it.
pub struct BufferSubscription<Item, Err, D>(pub Arc<DemandBuffer<Item, Err, D>>);

impl<Item, Err, D> Subscription for BufferSubscription<Item, Err, D>
where
  Item: Send,
  Err: Send,
  D: Subscriber<Item, Err> + Send,
{
  fn request(&self, demand: Demand) { let _ = self.0.demand(demand); }

  fn cancel(&self) { self.0.cancel() }
}
