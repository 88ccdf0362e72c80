//! Subscription: the link a subscriber uses to pull values and to cancel.

use std::{
  fmt::{Debug, Formatter},
  sync::Arc,
};

use crate::{demand::Demand, lock::Lock};

/// Returned to a subscriber in `receive_subscription`.
///
/// Both methods take `&self`: a subscription is shared between the
/// subscriber that drives it and the operator that feeds it, and either side
/// may call in from any thread or from inside a delivery callback.
pub trait Subscription: Send + Sync {
  /// Ask for `demand` more values.
  fn request(&self, demand: Demand);

  /// Stop the flow of events. Must be idempotent.
  fn cancel(&self);
}

/// Shared handle to a subscription.
pub type SubscriptionHandle = Arc<dyn Subscription>;

impl Debug for dyn Subscription {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str("dyn Subscription") }
}

/// A subscription that ignores every call. Handed out with a terminal event
/// that is delivered immediately.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptySubscription;

impl Subscription for EmptySubscription {
  #[inline]
  fn request(&self, _demand: Demand) {}

  #[inline]
  fn cancel(&self) {}
}

impl EmptySubscription {
  pub fn handle() -> SubscriptionHandle { Arc::new(EmptySubscription) }
}

/// User-facing cancellation token.
///
/// The slot is filled once the subscription arrives, which may be after the
/// token has been handed out. Cancelling before that point cancels the
/// subscription as soon as it lands.
#[derive(Clone, Default)]
pub struct Cancellable(Arc<Lock<CancelSlot>>);

#[derive(Default)]
enum CancelSlot {
  #[default]
  Pending,
  Active(SubscriptionHandle),
  Cancelled,
}

impl Cancellable {
  pub fn new() -> Self { Self::default() }

  /// Stores the subscription this token controls.
  pub fn set(&self, subscription: SubscriptionHandle) {
    let cancel_now = self.0.with(|slot| match slot {
      CancelSlot::Cancelled => true,
      _ => {
        *slot = CancelSlot::Active(subscription.clone());
        false
      }
    });
    if cancel_now {
      subscription.cancel();
    }
  }

  /// Forgets the subscription without cancelling it, after a terminal event.
  pub(crate) fn release(&self) {
    self.0.with(|slot| {
      if matches!(slot, CancelSlot::Active(_)) {
        *slot = CancelSlot::Pending;
      }
    })
  }

  pub fn cancel(&self) {
    let prev = self.0.with(|slot| std::mem::replace(slot, CancelSlot::Cancelled));
    if let CancelSlot::Active(subscription) = prev {
      subscription.cancel();
    }
  }

  pub fn is_cancelled(&self) -> bool { matches!(*self.0.lock(), CancelSlot::Cancelled) }

  /// Activates "RAII" behavior: the subscription is cancelled as soon as the
  /// returned guard goes out of scope.
  #[must_use]
  pub fn cancel_on_drop(self) -> CancelGuard { CancelGuard(self) }
}

impl Debug for Cancellable {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Cancellable")
      .field("is_cancelled", &self.is_cancelled())
      .finish()
  }
}

/// Cancels the wrapped subscription when dropped.
#[derive(Debug)]
#[must_use]
pub struct CancelGuard(Cancellable);

impl CancelGuard {
  pub fn cancellable(&self) -> &Cancellable { &self.0 }
}

impl Drop for CancelGuard {
  fn drop(&mut self) { self.0.cancel() }
}

#[cfg(test)]
mod test {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;

  #[derive(Default)]
  struct CountCancel(AtomicUsize);

  impl Subscription for CountCancel {
    fn request(&self, _: Demand) {}
    fn cancel(&self) { self.0.fetch_add(1, Ordering::SeqCst); }
  }

  #[test]
  fn cancel_before_set() {
    let token = Cancellable::new();
    token.cancel();
    let sub = Arc::new(CountCancel::default());
    token.set(sub.clone());
    assert_eq!(sub.0.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn cancel_twice_cancels_once() {
    let token = Cancellable::new();
    let sub = Arc::new(CountCancel::default());
    token.set(sub.clone());
    token.cancel();
    token.cancel();
    assert_eq!(sub.0.load(Ordering::SeqCst), 1);
    assert!(token.is_cancelled());
  }

  #[test]
  fn guard_cancels_on_drop() {
    let sub = Arc::new(CountCancel::default());
    {
      let token = Cancellable::new();
      token.set(sub.clone());
      let _guard = token.cancel_on_drop();
    }
    assert_eq!(sub.0.load(Ordering::SeqCst), 1);
  }
}
