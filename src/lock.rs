//! Mutual exclusion for state shared between producers and consumers.
//!
//! Critical sections guarded by these types only ever mutate counters and
//! collections. No subscriber or subscription callback may run while a lock
//! from this module is held: re-entrant demand from inside a callback would
//! otherwise deadlock.

use std::{fmt, sync::Arc};

use parking_lot::{Mutex, MutexGuard};

pub type LockGuard<'a, T> = MutexGuard<'a, T>;

/// A non-reentrant lock around `T`.
#[derive(Default)]
pub struct Lock<T>(Mutex<T>);

impl<T> Lock<T> {
  #[inline]
  pub const fn new(value: T) -> Self { Self(Mutex::new(value)) }

  #[inline]
  pub fn lock(&self) -> LockGuard<'_, T> { self.0.lock() }

  /// Runs `f` inside the critical section and returns its result.
  #[inline]
  pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R { f(&mut self.0.lock()) }

  #[inline]
  pub fn get_mut(&mut self) -> &mut T { self.0.get_mut() }

  #[inline]
  pub fn into_inner(self) -> T { self.0.into_inner() }
}

impl<T: fmt::Debug> fmt::Debug for Lock<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.0.try_lock() {
      Some(guard) => f.debug_tuple("Lock").field(&*guard).finish(),
      None => f.write_str("Lock(<locked>)"),
    }
  }
}

/// Shared ownership of a [`Lock`].
#[derive(Default)]
pub struct MutArc<T>(Arc<Lock<T>>);

impl<T> MutArc<T> {
  #[inline]
  pub fn own(t: T) -> Self { Self(Arc::new(Lock::new(t))) }

  #[inline]
  pub fn lock(&self) -> LockGuard<'_, T> { self.0.lock() }

  #[inline]
  pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R { self.0.with(f) }

  #[inline]
  pub fn ptr_eq(&self, other: &Self) -> bool { Arc::ptr_eq(&self.0, &other.0) }
}

impl<T> Clone for MutArc<T> {
  #[inline]
  fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T: fmt::Debug> fmt::Debug for MutArc<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.debug_tuple("MutArc").field(&*self.0).finish() }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn shared_mutation() {
    let a = MutArc::own(0);
    let b = a.clone();
    b.with(|v| *v += 2);
    *a.lock() += 1;
    assert_eq!(*b.lock(), 3);
    assert!(a.ptr_eq(&b));
    assert!(!a.ptr_eq(&MutArc::own(3)));
  }

  #[test]
  fn lock_is_released_between_calls() {
    let lock = Lock::new(vec![1]);
    lock.with(|v| v.push(2));
    lock.with(|v| v.push(3));
    assert_eq!(lock.into_inner(), vec![1, 2, 3]);
  }
}
