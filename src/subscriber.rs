//! Subscriber trait and implementations
//!
//! A subscriber is the consumer side of the protocol. It is handed a
//! [`Subscription`](crate::subscription::Subscription) first, then receives
//! values it asked for, then at most one terminal event.

use std::{
  fmt,
  hash::{Hash, Hasher},
  sync::Arc,
};

use crate::{
  completion::Completion,
  demand::Demand,
  lock::MutArc,
  subscription::{Cancellable, SubscriptionHandle},
};

// ============================================================================
// Subscriber Trait
// ============================================================================

pub trait Subscriber<Item, Err> {
  /// Called once, before any value, with the handle used to request values.
  fn receive_subscription(&mut self, subscription: SubscriptionHandle);

  /// Receive a value. The returned demand is *added* to what the subscriber
  /// has already requested.
  fn receive(&mut self, value: Item) -> Demand;

  /// Receive the terminal event.
  ///
  /// This consumes the subscriber, as nothing can be delivered after it.
  fn receive_completion(self, completion: Completion<Err>);

  /// Identity of the logical consumer, used to reject double subscription.
  fn identity(&self) -> Option<SubscriberId> { None }
}

// ============================================================================
// SubscriberId
// ============================================================================

/// Opaque identity token of a logical subscriber.
///
/// Two ids are equal only if one was cloned from the other, so a subscriber
/// and its clones share an identity.
#[derive(Clone, Default)]
pub struct SubscriberId(Arc<()>);

impl SubscriberId {
  pub fn new() -> Self { Self::default() }

  #[inline]
  fn addr(&self) -> usize { Arc::as_ptr(&self.0) as usize }
}

impl PartialEq for SubscriberId {
  #[inline]
  fn eq(&self, other: &Self) -> bool { Arc::ptr_eq(&self.0, &other.0) }
}

impl Eq for SubscriberId {}

impl Hash for SubscriberId {
  fn hash<H: Hasher>(&self, state: &mut H) { self.addr().hash(state) }
}

impl fmt::Debug for SubscriberId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "SubscriberId({:#x})", self.addr()) }
}

// ============================================================================
// DynSubscriber Trait - Object-safe Subscriber
// ============================================================================

/// Helper trait to enable object-safe subscribers (`Box<dyn ...>`).
///
/// `Subscriber` is not object-safe because `receive_completion` takes `self`
/// by value. This mirrors the interface with a boxed receiver.
pub trait DynSubscriber<Item, Err> {
  fn box_receive_subscription(&mut self, subscription: SubscriptionHandle);
  fn box_receive(&mut self, value: Item) -> Demand;
  fn box_receive_completion(self: Box<Self>, completion: Completion<Err>);
  fn box_identity(&self) -> Option<SubscriberId>;
}

impl<T, Item, Err> DynSubscriber<Item, Err> for T
where
  T: Subscriber<Item, Err>,
{
  fn box_receive_subscription(&mut self, subscription: SubscriptionHandle) { self.receive_subscription(subscription) }
  fn box_receive(&mut self, value: Item) -> Demand { self.receive(value) }
  fn box_receive_completion(self: Box<Self>, completion: Completion<Err>) { self.receive_completion(completion) }
  fn box_identity(&self) -> Option<SubscriberId> { self.identity() }
}

/// Boxed subscriber that can cross threads.
pub type BoxedSubscriber<Item, Err> = Box<dyn DynSubscriber<Item, Err> + Send>;

impl<Item, Err> Subscriber<Item, Err> for BoxedSubscriber<Item, Err> {
  #[inline]
  fn receive_subscription(&mut self, subscription: SubscriptionHandle) {
    (**self).box_receive_subscription(subscription)
  }

  #[inline]
  fn receive(&mut self, value: Item) -> Demand { (**self).box_receive(value) }

  #[inline]
  fn receive_completion(self, completion: Completion<Err>) { self.box_receive_completion(completion) }

  #[inline]
  fn identity(&self) -> Option<SubscriberId> { (**self).box_identity() }
}

// ============================================================================
// Shared subscriber
// ============================================================================

/// One downstream shared by several producers.
///
/// The inner subscriber is moved out of the lock for the duration of each
/// call, so a callback never runs under the lock. Callers must ensure only
/// one producer delivers at a time; a call that finds the slot empty is
/// dropped.
impl<S, Item, Err> Subscriber<Item, Err> for MutArc<Option<S>>
where
  S: Subscriber<Item, Err>,
{
  fn receive_subscription(&mut self, subscription: SubscriptionHandle) {
    let inner = self.lock().take();
    if let Some(mut inner) = inner {
      inner.receive_subscription(subscription);
      self.with(|slot| *slot = Some(inner));
    }
  }

  fn receive(&mut self, value: Item) -> Demand {
    let inner = self.lock().take();
    match inner {
      Some(mut inner) => {
        let demand = inner.receive(value);
        self.with(|slot| *slot = Some(inner));
        demand
      }
      None => Demand::none(),
    }
  }

  fn receive_completion(self, completion: Completion<Err>) {
    let inner = self.lock().take();
    if let Some(inner) = inner {
      inner.receive_completion(completion);
    }
  }

  fn identity(&self) -> Option<SubscriberId> {
    self.lock().as_ref().and_then(|inner| Subscriber::<Item, Err>::identity(inner))
  }
}

// ============================================================================
// FnSubscriber - Closure adapter
// ============================================================================

/// Subscriber built from closures. Requests unlimited demand as soon as it
/// is subscribed.
///
/// Created by [`PublisherExt::sink`](crate::publisher::PublisherExt::sink).
pub struct FnSubscriber<N, C> {
  on_value: N,
  on_completion: C,
  cancellable: Cancellable,
}

impl<N, C> FnSubscriber<N, C> {
  pub fn new(on_value: N, on_completion: C) -> Self {
    Self { on_value, on_completion, cancellable: Cancellable::new() }
  }

  pub fn cancellable(&self) -> Cancellable { self.cancellable.clone() }
}

impl<Item, Err, N, C> Subscriber<Item, Err> for FnSubscriber<N, C>
where
  N: FnMut(Item),
  C: FnOnce(Completion<Err>),
{
  fn receive_subscription(&mut self, subscription: SubscriptionHandle) {
    self.cancellable.set(subscription.clone());
    if !self.cancellable.is_cancelled() {
      subscription.request(Demand::unlimited());
    }
  }

  #[inline]
  fn receive(&mut self, value: Item) -> Demand {
    (self.on_value)(value);
    Demand::none()
  }

  fn receive_completion(self, completion: Completion<Err>) {
    self.cancellable.release();
    (self.on_completion)(completion);
  }
}

#[cfg(test)]
mod test {
  use std::collections::HashSet;

  use super::*;
  use crate::subscription::EmptySubscription;

  struct Collect(Vec<i32>);

  impl Subscriber<i32, ()> for Collect {
    fn receive_subscription(&mut self, _: SubscriptionHandle) {}

    fn receive(&mut self, value: i32) -> Demand {
      self.0.push(value);
      Demand::max(1)
    }

    fn receive_completion(self, _: Completion<()>) {}
  }

  #[test]
  fn identity_follows_clones() {
    let a = SubscriberId::new();
    let b = a.clone();
    let c = SubscriberId::new();
    assert_eq!(a, b);
    assert_ne!(a, c);

    let set: HashSet<_> = [a, b, c].into_iter().collect();
    assert_eq!(set.len(), 2);
  }

  #[test]
  fn boxed_forwards() {
    let mut boxed: BoxedSubscriber<i32, ()> = Box::new(Collect(vec![]));
    boxed.receive_subscription(EmptySubscription::handle());
    assert_eq!(boxed.receive(1), Demand::max(1));
    assert!(boxed.identity().is_none());
    boxed.receive_completion(Completion::Finished);
  }

  #[test]
  fn shared_slot_empties_on_completion() {
    let slot = MutArc::own(Some(Collect(vec![])));
    let mut a = slot.clone();
    assert_eq!(a.receive(3), Demand::max(1));
    a.receive_completion(Completion::Finished);
    assert!(slot.lock().is_none());

    let mut b = slot.clone();
    assert_eq!(b.receive(4), Demand::none());
  }

  #[test]
  fn closure_subscriber() {
    let mut values = vec![];
    let mut done = None;
    {
      let mut sub = FnSubscriber::new(|v: i32| values.push(v), |c: Completion<()>| done = Some(c));
      sub.receive_subscription(EmptySubscription::handle());
      sub.receive(1);
      sub.receive(2);
      sub.receive_completion(Completion::Finished);
    }
    assert_eq!(values, vec![1, 2]);
    assert_eq!(done, Some(Completion::Finished));
  }
}
